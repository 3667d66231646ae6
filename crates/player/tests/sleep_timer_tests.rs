//! The sleep timer pausing a playing session

mod common;

use common::{at, quiet_config, Fixture};
use storystream_config::Config;
use storystream_core::{Duration, SegmentId, Timestamp};
use storystream_player::{
    ManualClock, PauseReason, PlayerEvent, SessionState, SleepTimerConfiguration,
    SleepTimerStatus,
};

/// Frequent ticks, so a clock advance is noticed quickly
fn ticking_config() -> Config {
    let mut config = quiet_config();
    config.player.position_broadcast_ms = 20;
    config
}

fn minutes_left(minutes: u64) -> SleepTimerConfiguration {
    SleepTimerConfiguration::WithDuration(Duration::from_seconds(minutes * 60))
}

async fn playing(durations_secs: &[u64], clock: &ManualClock) -> Fixture {
    let mut f = Fixture::open_with_clock(durations_secs, &ticking_config(), clock);
    f.download_all();
    f.session.play().await.unwrap();
    f.expect("PlaybackStarted").await;
    f
}

#[tokio::test]
async fn test_opens_initially_paused_with_timer_off() {
    let f = Fixture::open(&[100]);
    let snapshot = f.session.snapshot().await.unwrap();
    assert_eq!(snapshot.pause_reason, PauseReason::InitiallyPaused);
    assert_eq!(
        snapshot.sleep_timer,
        SleepTimerStatus::Stopped(SleepTimerConfiguration::Off)
    );
}

#[tokio::test]
async fn test_timer_running_out_pauses_playback() {
    let clock = ManualClock::new(Timestamp::from_millis(0));
    let mut f = playing(&[3_600], &clock).await;

    f.session
        .configure_sleep_timer(SleepTimerConfiguration::minutes(15))
        .await
        .unwrap();
    assert_eq!(
        f.session.sleep_timer().await.unwrap(),
        SleepTimerStatus::Running(minutes_left(15))
    );

    clock.advance(Duration::from_seconds(15 * 60));
    f.expect("SleepTimerFinished").await;
    f.expect("PlaybackPaused").await;

    let snapshot = f.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Paused);
    assert_eq!(snapshot.pause_reason, PauseReason::SleepTimer);
    assert_eq!(
        snapshot.sleep_timer,
        SleepTimerStatus::Stopped(SleepTimerConfiguration::Off)
    );
    assert!(!f.engine.is_playing());
}

#[tokio::test]
async fn test_user_pause_holds_the_countdown() {
    let clock = ManualClock::new(Timestamp::from_millis(0));
    let mut f = playing(&[3_600], &clock).await;
    f.session
        .configure_sleep_timer(SleepTimerConfiguration::minutes(1))
        .await
        .unwrap();

    clock.advance(Duration::from_seconds(20));
    f.session.pause().await.unwrap();
    f.expect("PlaybackPaused").await;
    assert_eq!(
        f.session.pause_reason().await.unwrap(),
        PauseReason::UserExplicitlyPaused
    );
    assert_eq!(
        f.session.sleep_timer().await.unwrap(),
        SleepTimerStatus::Paused(SleepTimerConfiguration::WithDuration(
            Duration::from_seconds(40)
        ))
    );

    // Time spent paused does not count
    clock.advance(Duration::from_seconds(600));
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    f.settle().await;
    assert!(f
        .drain()
        .iter()
        .all(|event| event.name() != "SleepTimerFinished"));

    f.session.play().await.unwrap();
    f.expect("PlaybackStarted").await;
    assert!(f.session.sleep_timer().await.unwrap().is_running());

    clock.advance(Duration::from_seconds(40));
    f.expect("SleepTimerFinished").await;
    f.expect("PlaybackPaused").await;
    assert_eq!(f.session.pause_reason().await.unwrap(), PauseReason::SleepTimer);
}

#[tokio::test]
async fn test_end_of_chapter_pauses_instead_of_advancing() {
    let mut f = Fixture::open(&[100, 200]);
    f.download_all();
    f.session.play().await.unwrap();
    f.expect("PlaybackStarted").await;
    f.session
        .configure_sleep_timer(SleepTimerConfiguration::EndOfChapter)
        .await
        .unwrap();

    f.engine.finish_segment();
    let completed = f.expect("ChapterCompleted").await;
    assert_eq!(at(&completed), ("ChapterCompleted", "s0".into(), 100_000));
    assert_eq!(
        f.next().await,
        PlayerEvent::SleepTimerChanged {
            old: SleepTimerStatus::Running(SleepTimerConfiguration::EndOfChapter),
            new: SleepTimerStatus::Stopped(SleepTimerConfiguration::Off),
        }
    );
    assert_eq!(f.next().await, PlayerEvent::SleepTimerFinished);
    assert_eq!(at(&f.next().await), ("PlaybackPaused", "s1".into(), 0));

    f.settle().await;
    assert!(f.drain().is_empty());
    let snapshot = f.session.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Paused);
    assert_eq!(snapshot.pause_reason, PauseReason::SleepTimer);
    assert_eq!(snapshot.position.segment_id, SegmentId::new("s1"));
    assert_eq!(f.engine.count_calls("prepare"), 1);

    // Playing again picks up the next chapter
    f.session.play().await.unwrap();
    assert_eq!(at(&f.next().await), ("PlaybackPreparing", "s1".into(), 0));
    assert_eq!(at(&f.next().await), ("PlaybackStarted", "s1".into(), 0));
}

#[tokio::test]
async fn test_end_of_chapter_in_last_chapter_stops() {
    let mut f = Fixture::open(&[100]);
    f.download_all();
    f.session.play().await.unwrap();
    f.expect("PlaybackStarted").await;
    f.session
        .configure_sleep_timer(SleepTimerConfiguration::EndOfChapter)
        .await
        .unwrap();

    f.engine.finish_segment();
    f.expect("PlaybackStopped").await;
    f.expect("SleepTimerFinished").await;
    assert_eq!(f.session.state().await.unwrap(), SessionState::Stopped);
}

#[tokio::test]
async fn test_timer_configured_while_paused_waits_for_play() {
    let mut f = Fixture::open(&[100]);
    f.download_all();

    f.session
        .configure_sleep_timer(SleepTimerConfiguration::minutes(30))
        .await
        .unwrap();
    assert_eq!(
        f.session.sleep_timer().await.unwrap(),
        SleepTimerStatus::Paused(minutes_left(30))
    );

    f.session.play().await.unwrap();
    f.expect("PlaybackStarted").await;
    assert_eq!(
        f.session.sleep_timer().await.unwrap(),
        SleepTimerStatus::Running(minutes_left(30))
    );

    f.session
        .configure_sleep_timer(SleepTimerConfiguration::Off)
        .await
        .unwrap();
    assert_eq!(
        f.session.sleep_timer().await.unwrap(),
        SleepTimerStatus::Stopped(SleepTimerConfiguration::Off)
    );
}

#[tokio::test]
async fn test_finish_pauses_right_away() {
    let mut f = Fixture::open(&[100]);
    f.download_all();
    f.session.play().await.unwrap();
    f.expect("PlaybackStarted").await;

    f.session.finish_sleep_timer().await.unwrap();
    f.expect("SleepTimerFinished").await;
    f.expect("PlaybackPaused").await;
    assert_eq!(f.session.pause_reason().await.unwrap(), PauseReason::SleepTimer);
}

#[tokio::test]
async fn test_cancelled_timer_never_fires() {
    let clock = ManualClock::new(Timestamp::from_millis(0));
    let mut f = playing(&[3_600], &clock).await;
    f.session
        .configure_sleep_timer(SleepTimerConfiguration::NOW)
        .await
        .unwrap();
    f.session.cancel_sleep_timer().await.unwrap();

    clock.advance(Duration::from_seconds(5));
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    f.settle().await;
    assert!(f
        .drain()
        .iter()
        .all(|event| event.name() != "SleepTimerFinished"));
    assert_eq!(f.session.state().await.unwrap(), SessionState::Playing);
}

#[tokio::test]
async fn test_explicit_timer_pause_and_unpause() {
    let clock = ManualClock::new(Timestamp::from_millis(0));
    let f = playing(&[3_600], &clock).await;
    f.session
        .configure_sleep_timer(SleepTimerConfiguration::minutes(45))
        .await
        .unwrap();

    f.session.pause_sleep_timer().await.unwrap();
    assert_eq!(
        f.session.sleep_timer().await.unwrap(),
        SleepTimerStatus::Paused(minutes_left(45))
    );
    f.session.unpause_sleep_timer().await.unwrap();
    f.session.start_sleep_timer().await.unwrap();
    assert_eq!(
        f.session.sleep_timer().await.unwrap(),
        SleepTimerStatus::Running(minutes_left(45))
    );
    assert_eq!(f.session.state().await.unwrap(), SessionState::Playing);
}
