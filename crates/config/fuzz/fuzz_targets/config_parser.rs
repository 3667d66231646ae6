//! Arbitrary config text must never panic the parser or the validators
//!
//! Run with: cargo fuzz run config_parser

#![no_main]
use libfuzzer_sys::fuzz_target;
use storystream_config::Config;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = toml::from_str::<Config>(text) else {
        return;
    };

    let _ = config.validate();
    if let Ok(rendered) = config.to_toml() {
        let reparsed: Config = toml::from_str(&rendered).expect("rendered config must parse");
        assert_eq!(reparsed.player.streaming_permitted, config.player.streaming_permitted);
    }

    let mut merged = Config::default();
    merged.merge(config);
});
