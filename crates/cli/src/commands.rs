// FILE: crates/cli/src/commands.rs

use crate::simulation::{SimulatedDownloader, SimulatedEngine};
use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use storystream_config::{Config, ConfigManager};
use storystream_core::{
    BookId, Duration as CoreDuration, ReadingOrder, SegmentDescriptor, TimeSegment,
};
use storystream_player::{
    BookmarkStore, DownloadTasks, ErrorCode, InMemoryBookmarkStore, JsonFileBookmarkStore, PlayerEvent,
    PlayerSession, SegmentStatusTable, SleepTimerConfiguration, SystemClock, TimeTracker,
};

/// Everything `simulate` needs besides the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOptions {
    pub segment_secs: Vec<u64>,
    pub download_delay: StdDuration,
    pub time_scale: f64,
    pub rate: Option<f32>,
    pub stream: bool,
    pub download: bool,
    pub fail_segment: Option<usize>,
    pub bookmarks: Option<PathBuf>,
    /// Reuse this id so a bookmarks file from an earlier run is picked up
    pub book: Option<BookId>,
    pub sleep: Option<SleepTimerConfiguration>,
    pub verbose: bool,
}

impl SimulationOptions {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let segment_secs = matches
            .get_one::<String>("segments")
            .map(|s| parse_durations(s))
            .transpose()?
            .unwrap_or_else(|| vec![100, 200, 150]);

        let download_delay_ms = *matches
            .get_one::<u64>("download-delay")
            .unwrap_or(&1_000);

        let time_scale = *matches.get_one::<f64>("time-scale").unwrap_or(&60.0);
        if !(time_scale > 0.0) {
            bail!("time scale must be positive, got {}", time_scale);
        }

        let book = matches
            .get_one::<String>("book")
            .map(|raw| raw.parse::<BookId>())
            .transpose()
            .context("invalid book id")?;

        let sleep = matches
            .get_one::<String>("sleep")
            .map(|raw| parse_sleep_timer(raw))
            .transpose()?;

        Ok(Self {
            segment_secs,
            download_delay: StdDuration::from_millis(download_delay_ms),
            time_scale,
            rate: matches.get_one::<f32>("rate").copied(),
            stream: matches.get_flag("stream"),
            download: !matches.get_flag("no-download"),
            fail_segment: matches.get_one::<usize>("fail-segment").copied(),
            bookmarks: matches.get_one::<String>("bookmarks").map(PathBuf::from),
            book,
            sleep,
            verbose: matches.get_flag("verbose"),
        })
    }
}

/// Parses a comma separated list of segment durations in seconds
pub fn parse_durations(list: &str) -> Result<Vec<u64>> {
    let durations = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .with_context(|| format!("invalid segment duration '{}'", s))
        })
        .collect::<Result<Vec<_>>>()?;

    if durations.is_empty() {
        bail!("a book needs at least one segment");
    }
    Ok(durations)
}

/// `chapter` for the end of the current chapter, otherwise whole minutes
pub fn parse_sleep_timer(value: &str) -> Result<SleepTimerConfiguration> {
    match value.trim() {
        "chapter" => Ok(SleepTimerConfiguration::EndOfChapter),
        "off" => Ok(SleepTimerConfiguration::Off),
        raw => {
            let minutes = raw
                .parse::<u64>()
                .with_context(|| format!("invalid sleep timer '{}'", raw))?;
            if minutes == 0 {
                Ok(SleepTimerConfiguration::NOW)
            } else {
                Ok(SleepTimerConfiguration::minutes(minutes))
            }
        }
    }
}

/// Builds a reading order `part-01, part-02, ...` with the given durations
pub fn simulated_book(segment_secs: &[u64]) -> Result<Arc<ReadingOrder>> {
    let descriptors = segment_secs
        .iter()
        .enumerate()
        .map(|(i, secs)| {
            SegmentDescriptor::new(format!("part-{:02}", i + 1))
                .with_title(format!("Chapter {}", i + 1))
                .with_duration(CoreDuration::from_seconds(*secs))
                .with_href(format!("https://audio.example.com/part-{:02}.mp3", i + 1))
        })
        .collect();

    let order = ReadingOrder::new(descriptors).context("Failed to build reading order")?;
    Ok(Arc::new(order))
}

/// Plays a generated book through a real session and prints its events
pub async fn simulate(mut config: Config, options: SimulationOptions) -> Result<()> {
    if options.stream {
        config.player.streaming_permitted = true;
    }

    let order = simulated_book(&options.segment_secs)?;
    let statuses = SegmentStatusTable::new(&order);

    let store: Arc<dyn BookmarkStore> = match &options.bookmarks {
        Some(path) => Arc::new(
            JsonFileBookmarkStore::open(path)
                .with_context(|| format!("Failed to open bookmarks at {}", path.display()))?,
        ),
        None => Arc::new(InMemoryBookmarkStore::new()),
    };

    let mut downloader = SimulatedDownloader::new(statuses.clone(), options.download_delay);
    if let Some(index) = options.fail_segment {
        let Some(segment) = order.by_index(index) else {
            bail!("book has no segment {}", index);
        };
        downloader = downloader.failing(segment.id.clone());
    }
    let downloads = DownloadTasks::new(Arc::clone(&order), statuses.clone(), Arc::new(downloader));

    let mut tracker = TimeTracker::start(&config.listening, Arc::new(SystemClock));
    let book_id = options.book.unwrap_or_default();
    let session = PlayerSession::builder(
        book_id,
        Arc::clone(&order),
        SimulatedEngine::start(options.time_scale),
        statuses,
    )
    .with_config(&config)
    .with_store(Arc::clone(&store))
    .with_time_tracker(tracker.handle())
    .open()
    .context("Failed to open book")?;
    let mut events = session.subscribe()?;

    println!(
        "\n{} {} segments, {} total, {}x speed",
        style("Simulating").bold().cyan(),
        order.len(),
        order
            .iter()
            .filter_map(|s| s.duration)
            .sum::<CoreDuration>()
            .as_hms(),
        options.time_scale
    );
    println!("{} {}", style("Book").dim(), book_id);
    if let Some(sleep) = options.sleep {
        println!("{} {}", style("Sleep timer").dim(), sleep);
    }
    println!("{}", "=".repeat(60));

    if let Some(rate) = options.rate {
        session.set_rate(rate).await.context("Failed to set rate")?;
    }
    if options.download {
        downloads.fetch_all()?;
    }
    session.play().await?;
    if let Some(sleep) = options.sleep {
        session
            .configure_sleep_timer(sleep)
            .await
            .context("Failed to set the sleep timer")?;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if options.verbose || !matches!(event, PlayerEvent::PlaybackProgressUpdate(_)) {
                    println!("{}", format_event(&event));
                }
                if ends_simulation(&event) {
                    break;
                }
                if let PlayerEvent::ChapterWaiting(p) = &event {
                    if downloads.status(&p.segment_id).is_failure() {
                        println!("{} {} cannot be downloaded", style("Giving up:").red(), p.segment_id);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("{}", style("Interrupted").yellow());
                break;
            }
        }
    }

    let snapshot = session.snapshot().await?;
    session.close();
    tracker.stop();

    let listened: Vec<TimeSegment> = tracker.segments().try_iter().collect();
    let total: CoreDuration = listened.iter().map(TimeSegment::duration).sum();

    println!("{}", "=".repeat(60));
    println!("Final position: {}", snapshot.position);
    println!("Book progress:  {:.1}%", snapshot.metadata.book_progress * 100.0);
    println!(
        "Listened:       {} in {} segment(s)",
        total.as_hms(),
        listened.len()
    );
    let bookmarks = store.bookmarks(book_id)?;
    println!("Bookmarks:      {}", bookmarks.len());

    Ok(())
}

/// The session stopped or went to sleep on its own, or is stuck waiting for a
/// failed download
pub fn ends_simulation(event: &PlayerEvent) -> bool {
    matches!(
        event,
        PlayerEvent::PlaybackStopped(_)
            | PlayerEvent::SleepTimerFinished
            | PlayerEvent::Error {
                code: ErrorCode::DownloadFailed,
                ..
            }
    )
}

/// One line per event, styled by kind
pub fn format_event(event: &PlayerEvent) -> String {
    let name = match event {
        PlayerEvent::Error { .. } => style(event.name()).red().bold(),
        PlayerEvent::ChapterWaiting(_) | PlayerEvent::PlaybackBuffering(_) => {
            style(event.name()).yellow()
        }
        PlayerEvent::PlaybackStarted(_) | PlayerEvent::ChapterCompleted(_) => {
            style(event.name()).green()
        }
        PlayerEvent::CreateBookmark(_) | PlayerEvent::DeleteBookmark(_) => {
            style(event.name()).magenta()
        }
        PlayerEvent::SleepTimerChanged { .. } | PlayerEvent::SleepTimerFinished => {
            style(event.name()).cyan()
        }
        _ => style(event.name()).dim(),
    };

    let detail = match event {
        PlayerEvent::CreateBookmark(b) | PlayerEvent::DeleteBookmark(b) => {
            format!("{:?} {}", b.kind, b.target())
        }
        PlayerEvent::PlaybackRateChanged { rate, position } => {
            format!("{}x at {}", rate.value(), position.target())
        }
        PlayerEvent::SleepTimerChanged { new, .. } => new.to_string(),
        PlayerEvent::Error {
            code,
            message,
            position,
        } => match event.app_error() {
            Some(error) => format!(
                "[{}] {} at {}\n{:<24} {} {}",
                code,
                message,
                position.target(),
                "",
                style(error.user_message()).red(),
                style(format!("({})", error.recovery_action())).dim()
            ),
            None => format!("[{}] {} at {}", code, message, position.target()),
        },
        other => match other.position() {
            Some(p) => {
                let title = p.metadata.chapter_title.as_deref().unwrap_or("untitled");
                format!(
                    "{} ({}, {:.1}% of book)",
                    p.target(),
                    title,
                    p.metadata.book_progress * 100.0
                )
            }
            None => String::new(),
        },
    };

    format!("{:<24} {}", name, detail)
}

pub fn config_manager(matches: &ArgMatches) -> Result<ConfigManager> {
    match matches.get_one::<String>("config-dir") {
        Some(dir) => ConfigManager::with_directory(PathBuf::from(dir))
            .context("Failed to open config directory"),
        None => ConfigManager::new().context("Failed to locate config directory"),
    }
}

pub fn load_config(manager: &ConfigManager) -> Result<Config> {
    manager
        .load_with_env_overrides()
        .with_context(|| format!("Failed to load {}", manager.config_path().display()))
}

pub fn config_command(manager: &ConfigManager, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("init", _)) => {
            if manager.initialize()? {
                println!(
                    "{} Wrote default config to {}",
                    style("✓").green().bold(),
                    manager.config_path().display()
                );
            } else {
                println!("Config already exists at {}", manager.config_path().display());
            }
        }
        Some(("show", _)) => {
            let config = load_config(manager)?;
            let rendered = config.to_toml().context("Failed to render config")?;
            println!("{}", rendered);
        }
        Some(("validate", _)) => {
            let problems = manager.validate()?;
            if problems.is_empty() {
                println!("{} Config is valid", style("✓").green().bold());
            } else {
                for problem in &problems {
                    println!("{} {}", style("✗").red().bold(), problem);
                }
                bail!("{} validation error(s)", problems.len());
            }
        }
        Some(("reset", _)) => {
            manager.reset()?;
            println!("Config reset to defaults");
        }
        Some(("path", _)) | None => println!("{}", manager.config_path().display()),
        Some((other, _)) => bail!("unknown config command '{}'", other),
    }
    Ok(())
}
