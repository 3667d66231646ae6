// FILE: crates/cli/src/main.rs

use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};

mod commands;
mod simulation;

fn build_cli() -> Command {
    Command::new("storystream")
        .version(env!("CARGO_PKG_VERSION"))
        .author("StoryStream Team")
        .about("Reading-order audiobook playback")
        .arg(
            Arg::new("config-dir")
                .short('c')
                .long("config-dir")
                .value_name("DIR")
                .help("Directory holding config.toml (defaults to the platform config directory)")
                .global(true),
        )
        .subcommand(
            Command::new("simulate")
                .about("Play a generated book with a simulated engine and downloader")
                .arg(
                    Arg::new("segments")
                        .short('s')
                        .long("segments")
                        .value_name("SECS,SECS,...")
                        .help("Segment durations in seconds")
                        .default_value("100,200,150"),
                )
                .arg(
                    Arg::new("download-delay")
                        .short('d')
                        .long("download-delay")
                        .value_name("MS")
                        .help("Download time of the first segment; later segments take longer")
                        .value_parser(value_parser!(u64))
                        .default_value("1000"),
                )
                .arg(
                    Arg::new("time-scale")
                        .short('t')
                        .long("time-scale")
                        .value_name("FACTOR")
                        .help("How much faster than real time the engine plays")
                        .value_parser(value_parser!(f64))
                        .default_value("60"),
                )
                .arg(
                    Arg::new("rate")
                        .short('r')
                        .long("rate")
                        .value_name("RATE")
                        .help("Playback rate (0.5 to 3.0)")
                        .value_parser(value_parser!(f32)),
                )
                .arg(
                    Arg::new("stream")
                        .long("stream")
                        .help("Allow streaming segments that are not downloaded")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no-download")
                        .long("no-download")
                        .help("Do not start any downloads")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("fail-segment")
                        .long("fail-segment")
                        .value_name("INDEX")
                        .help("Make the download of this segment fail")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("bookmarks")
                        .short('b')
                        .long("bookmarks")
                        .value_name("FILE")
                        .help("Persist bookmarks to this JSON file"),
                )
                .arg(
                    Arg::new("book")
                        .long("book")
                        .value_name("ID")
                        .requires("bookmarks")
                        .help("Resume this book from its last-read bookmark"),
                )
                .arg(
                    Arg::new("sleep")
                        .long("sleep")
                        .value_name("MINUTES|chapter")
                        .help("Pause after this many minutes, or at the end of the current chapter"),
                )
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .help("Print progress updates too")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the configuration file")
                .subcommand(Command::new("init").about("Write a default config if none exists"))
                .subcommand(Command::new("show").about("Print the effective configuration"))
                .subcommand(Command::new("validate").about("Check the config file for invalid values"))
                .subcommand(Command::new("reset").about("Overwrite the config with defaults"))
                .subcommand(Command::new("path").about("Print the config file location")),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let matches = build_cli().get_matches();
    let manager = commands::config_manager(&matches)?;

    match matches.subcommand() {
        Some(("simulate", sub_matches)) => {
            let config = commands::load_config(&manager)?;
            let options = commands::SimulationOptions::from_matches(sub_matches)?;
            commands::simulate(config, options).await
        }
        Some(("config", sub_matches)) => commands::config_command(&manager, sub_matches),
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}
