//! Config hot paths: a session reads and validates its config on every open
//!
//! Run with: cargo bench --package storystream-config

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use storystream_config::{Config, ConfigManager};
use tempfile::TempDir;

fn bench_validate(c: &mut Criterion) {
    let valid = Config::default();
    let mut invalid = Config::default();
    invalid.player.position_broadcast_ms = 0;
    invalid.bookmarks.wait_period_secs = 0;

    c.bench_function("validate_default", |b| b.iter(|| black_box(valid.validate())));
    c.bench_function("validate_invalid", |b| b.iter(|| black_box(invalid.validate())));
}

fn bench_render_and_parse(c: &mut Criterion) {
    let config = Config::default();
    let rendered = config.to_toml().expect("Failed to render");

    c.bench_function("render_toml", |b| b.iter(|| black_box(config.to_toml())));
    c.bench_function("parse_toml", |b| {
        b.iter(|| black_box(toml::from_str::<Config>(&rendered)))
    });
}

fn bench_save_load(c: &mut Criterion) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let manager = ConfigManager::with_directory(temp_dir.path().to_path_buf())
        .expect("Failed to create manager");
    let config = Config::default();

    c.bench_function("atomic_save_then_load", |b| {
        b.iter(|| {
            manager.save(&config).expect("Failed to save");
            black_box(manager.load().expect("Failed to load"))
        });
    });
}

criterion_group!(benches, bench_validate, bench_render_and_parse, bench_save_load);
criterion_main!(benches);
