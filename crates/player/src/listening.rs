//! Listening-time accounting
//!
//! [`ListeningTimeAccumulator`] turns playback lifecycle notifications into
//! closed [`TimeSegment`]s. [`TimeTracker`] runs one on a worker thread, fed
//! through a [`TimeTrackerHandle`] that the session owns.

use crate::clock::Clock;
use crate::error::{PlayerError, PlayerResult};
use crate::events::PlayerEvent;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;
use storystream_config::ListeningConfig;
use storystream_core::{BookId, Duration, PlaybackRate, TimeSegment, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq)]
enum AccumulatorState {
    NoBook,
    Open {
        book: BookId,
        rate: PlaybackRate,
        playing_since: Option<Timestamp>,
    },
    Closed,
}

/// Accumulates wall-clock listening time of one book
///
/// A play period is emitted as contiguous segments of at most `max_segment`
/// each. Every segment is accumulated at a single rate. Once the book is
/// closed every further call fails with `IllegalState`.
#[derive(Debug)]
pub struct ListeningTimeAccumulator {
    state: AccumulatorState,
    max_segment: Duration,
}

impl ListeningTimeAccumulator {
    pub fn new(max_segment: Duration) -> Self {
        Self {
            state: AccumulatorState::NoBook,
            max_segment,
        }
    }

    pub fn from_config(config: &ListeningConfig) -> Self {
        Self::new(Duration::from_seconds(config.max_segment_secs))
    }

    pub fn is_playing(&self) -> bool {
        matches!(
            self.state,
            AccumulatorState::Open {
                playing_since: Some(_),
                ..
            }
        )
    }

    pub fn is_closed(&self) -> bool {
        self.state == AccumulatorState::Closed
    }

    pub fn book_opened(&mut self, book: BookId, rate: PlaybackRate) -> PlayerResult<()> {
        match self.state {
            AccumulatorState::NoBook => {
                self.state = AccumulatorState::Open {
                    book,
                    rate,
                    playing_since: None,
                };
                Ok(())
            }
            AccumulatorState::Open { book: open, .. } => Err(PlayerError::IllegalState(
                format!("book_opened while book {} is open", open),
            )),
            AccumulatorState::Closed => Err(PlayerError::illegal_state("book_opened")),
        }
    }

    /// Opens a segment; an already open one is closed first
    pub fn playback_started(&mut self, now: Timestamp) -> PlayerResult<Vec<TimeSegment>> {
        let (book, rate, playing_since) = self.open_book("playback_started")?;
        let closed = self.split(book, rate, playing_since, now);
        self.state = AccumulatorState::Open {
            book,
            rate,
            playing_since: Some(now),
        };
        Ok(closed)
    }

    pub fn playback_paused(&mut self, now: Timestamp) -> PlayerResult<Vec<TimeSegment>> {
        self.stop_segment("playback_paused", now)
    }

    pub fn playback_stopped(&mut self, now: Timestamp) -> PlayerResult<Vec<TimeSegment>> {
        self.stop_segment("playback_stopped", now)
    }

    /// Closes the open segment, if any, and reopens one at the new rate
    pub fn rate_changed(
        &mut self,
        rate: PlaybackRate,
        now: Timestamp,
    ) -> PlayerResult<Vec<TimeSegment>> {
        let (book, old_rate, playing_since) = self.open_book("rate_changed")?;
        let closed = self.split(book, old_rate, playing_since, now);
        self.state = AccumulatorState::Open {
            book,
            rate,
            playing_since: playing_since.map(|_| now),
        };
        Ok(closed)
    }

    pub fn book_closed(&mut self, now: Timestamp) -> PlayerResult<Vec<TimeSegment>> {
        let (book, rate, playing_since) = self.open_book("book_closed")?;
        let closed = self.split(book, rate, playing_since, now);
        self.state = AccumulatorState::Closed;
        Ok(closed)
    }

    /// Emits the full-length chunks of the open segment, keeping the rest open
    pub fn tick(&mut self, now: Timestamp) -> Vec<TimeSegment> {
        let AccumulatorState::Open {
            book,
            rate,
            playing_since: Some(mut start),
        } = self.state
        else {
            return Vec::new();
        };

        let mut chunks = Vec::new();
        while !self.max_segment.is_zero() && now.duration_since(start) >= self.max_segment {
            let end = start + self.max_segment;
            chunks.push(TimeSegment::new(book, start, end, rate.value()));
            start = end;
        }

        self.state = AccumulatorState::Open {
            book,
            rate,
            playing_since: Some(start),
        };
        chunks
    }

    fn open_book(
        &self,
        operation: &str,
    ) -> PlayerResult<(BookId, PlaybackRate, Option<Timestamp>)> {
        match self.state {
            AccumulatorState::Open {
                book,
                rate,
                playing_since,
            } => Ok((book, rate, playing_since)),
            AccumulatorState::NoBook => Err(PlayerError::not_open(operation)),
            AccumulatorState::Closed => Err(PlayerError::illegal_state(operation)),
        }
    }

    fn stop_segment(&mut self, operation: &str, now: Timestamp) -> PlayerResult<Vec<TimeSegment>> {
        let (book, rate, playing_since) = self.open_book(operation)?;
        let closed = self.split(book, rate, playing_since, now);
        self.state = AccumulatorState::Open {
            book,
            rate,
            playing_since: None,
        };
        Ok(closed)
    }

    fn split(
        &self,
        book: BookId,
        rate: PlaybackRate,
        playing_since: Option<Timestamp>,
        end: Timestamp,
    ) -> Vec<TimeSegment> {
        let Some(mut start) = playing_since else {
            return Vec::new();
        };

        let mut segments = Vec::new();
        while !self.max_segment.is_zero() && end.duration_since(start) > self.max_segment {
            let chunk_end = start + self.max_segment;
            segments.push(TimeSegment::new(book, start, chunk_end, rate.value()));
            start = chunk_end;
        }

        // Zero-length periods carry no listening time
        if !end.duration_since(start).is_zero() {
            segments.push(TimeSegment::new(book, start, end, rate.value()));
        }
        segments
    }
}

/// Commands understood by the tracker worker
#[derive(Debug, Clone)]
pub enum TrackerCommand {
    BookOpened(BookId, PlaybackRate),
    PlaybackStarted(Timestamp),
    PlaybackPaused(Timestamp),
    PlaybackStopped(Timestamp),
    RateChanged(PlaybackRate, Timestamp),
    BookClosed(Timestamp),
    Shutdown,
}

/// Listening-time accounting on a dedicated thread
///
/// Completed segments are delivered on [`TimeTracker::segments`]. The worker
/// exits after the book is closed; the segment channel then disconnects once
/// drained.
pub struct TimeTracker {
    handle: Option<thread::JoinHandle<()>>,
    commands: Sender<TrackerCommand>,
    segments: Receiver<TimeSegment>,
    clock: Arc<dyn Clock>,
}

impl TimeTracker {
    pub fn start(config: &ListeningConfig, clock: Arc<dyn Clock>) -> Self {
        let accumulator = ListeningTimeAccumulator::from_config(config);
        let tick = StdDuration::from_millis(config.tick_ms.max(1));
        let (command_tx, command_rx) = unbounded();
        let (segment_tx, segment_rx) = unbounded();

        let worker_clock = Arc::clone(&clock);
        let handle = thread::spawn(move || {
            tracker_loop(accumulator, command_rx, segment_tx, worker_clock, tick);
        });

        Self {
            handle: Some(handle),
            commands: command_tx,
            segments: segment_rx,
            clock,
        }
    }

    pub fn handle(&self) -> TimeTrackerHandle {
        TimeTrackerHandle {
            commands: self.commands.clone(),
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn segments(&self) -> &Receiver<TimeSegment> {
        &self.segments
    }

    /// Stops the worker, closing the open book first
    pub fn stop(&mut self) {
        let _ = self.commands.send(TrackerCommand::Shutdown);

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimeTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for TimeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeTracker")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

fn tracker_loop(
    mut accumulator: ListeningTimeAccumulator,
    commands: Receiver<TrackerCommand>,
    segments: Sender<TimeSegment>,
    clock: Arc<dyn Clock>,
    tick: StdDuration,
) {
    loop {
        let result = match commands.recv_timeout(tick) {
            Ok(TrackerCommand::BookOpened(book, rate)) => {
                accumulator.book_opened(book, rate).map(|_| Vec::new())
            }
            Ok(TrackerCommand::PlaybackStarted(at)) => accumulator.playback_started(at),
            Ok(TrackerCommand::PlaybackPaused(at)) => accumulator.playback_paused(at),
            Ok(TrackerCommand::PlaybackStopped(at)) => accumulator.playback_stopped(at),
            Ok(TrackerCommand::RateChanged(rate, at)) => accumulator.rate_changed(rate, at),
            Ok(TrackerCommand::BookClosed(at)) => accumulator.book_closed(at),
            Ok(TrackerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                if !accumulator.is_closed() {
                    if let Ok(closed) = accumulator.book_closed(clock.now()) {
                        publish(&segments, closed);
                    }
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => Ok(accumulator.tick(clock.now())),
        };

        match result {
            Ok(closed) => publish(&segments, closed),
            Err(e) => log::warn!("listening time: {}", e),
        }

        if accumulator.is_closed() {
            break;
        }
    }

    log::debug!("listening time tracker stopped");
}

fn publish(segments: &Sender<TimeSegment>, closed: Vec<TimeSegment>) {
    for segment in closed {
        log::debug!(
            "listened {} to book {} at {}x",
            segment.duration(),
            segment.book_id,
            segment.rate
        );
        if segments.send(segment).is_err() {
            log::warn!("listening time segment dropped: nobody is receiving");
        }
    }
}

/// Feeds a [`TimeTracker`]; stamps every command with the tracker's clock
///
/// Commands fail with `IllegalState` once the worker has stopped.
#[derive(Clone)]
pub struct TimeTrackerHandle {
    commands: Sender<TrackerCommand>,
    clock: Arc<dyn Clock>,
}

impl TimeTrackerHandle {
    pub fn book_opened(&self, book: BookId, rate: PlaybackRate) -> PlayerResult<()> {
        self.send("book_opened", TrackerCommand::BookOpened(book, rate))
    }

    pub fn playback_started(&self) -> PlayerResult<()> {
        self.send(
            "playback_started",
            TrackerCommand::PlaybackStarted(self.clock.now()),
        )
    }

    pub fn playback_paused(&self) -> PlayerResult<()> {
        self.send(
            "playback_paused",
            TrackerCommand::PlaybackPaused(self.clock.now()),
        )
    }

    pub fn playback_stopped(&self) -> PlayerResult<()> {
        self.send(
            "playback_stopped",
            TrackerCommand::PlaybackStopped(self.clock.now()),
        )
    }

    pub fn rate_changed(&self, rate: PlaybackRate) -> PlayerResult<()> {
        self.send(
            "rate_changed",
            TrackerCommand::RateChanged(rate, self.clock.now()),
        )
    }

    pub fn book_closed(&self) -> PlayerResult<()> {
        self.send("book_closed", TrackerCommand::BookClosed(self.clock.now()))
    }

    /// Derives a lifecycle command from a session event, if it implies one
    pub fn observe(&self, event: &PlayerEvent) -> PlayerResult<()> {
        match event {
            PlayerEvent::PlaybackStarted(_) => self.playback_started(),
            PlayerEvent::PlaybackPaused(_) | PlayerEvent::ChapterWaiting(_) => {
                self.playback_paused()
            }
            PlayerEvent::PlaybackStopped(_) => self.playback_stopped(),
            PlayerEvent::PlaybackRateChanged { rate, .. } => self.rate_changed(*rate),
            _ => Ok(()),
        }
    }

    fn send(&self, operation: &str, command: TrackerCommand) -> PlayerResult<()> {
        self.commands
            .send(command)
            .map_err(|_| PlayerError::illegal_state(operation))
    }
}

impl fmt::Debug for TimeTrackerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TimeTrackerHandle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_millis(secs * 1000)
    }

    fn rate(value: f32) -> PlaybackRate {
        PlaybackRate::new(value).unwrap()
    }

    fn open() -> (ListeningTimeAccumulator, BookId) {
        let mut acc = ListeningTimeAccumulator::new(Duration::from_seconds(60));
        let book = BookId::new();
        acc.book_opened(book, PlaybackRate::NORMAL).unwrap();
        (acc, book)
    }

    fn total(segments: &[TimeSegment]) -> Duration {
        segments.iter().map(|s| s.duration()).sum()
    }

    #[test]
    fn test_open_close_without_playback_emits_nothing() {
        let (mut acc, _) = open();
        assert!(acc.book_closed(at(100)).unwrap().is_empty());
    }

    #[test]
    fn test_start_pause_emits_one_segment() {
        let (mut acc, book) = open();
        assert!(acc.playback_started(at(10)).unwrap().is_empty());
        let segments = acc.playback_paused(at(40)).unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].book_id, book);
        assert_eq!(segments[0].started_at, at(10));
        assert_eq!(segments[0].ended_at, at(40));
        assert_eq!(segments[0].rate, 1.0);
    }

    #[test]
    fn test_rate_change_splits_segment() {
        let (mut acc, _) = open();
        acc.playback_started(at(0)).unwrap();
        let first = acc.rate_changed(rate(1.5), at(20)).unwrap();
        let second = acc.playback_paused(at(50)).unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].rate, 1.0);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].started_at, at(20));
        assert_eq!(second[0].rate, 1.5);
    }

    #[test]
    fn test_rate_change_while_paused_only_records_rate() {
        let (mut acc, _) = open();
        assert!(acc.rate_changed(rate(2.0), at(5)).unwrap().is_empty());
        assert!(!acc.is_playing());

        acc.playback_started(at(10)).unwrap();
        let segments = acc.playback_stopped(at(20)).unwrap();
        assert_eq!(segments[0].rate, 2.0);
    }

    #[test]
    fn test_long_period_is_chunked_contiguously() {
        let (mut acc, _) = open();
        acc.playback_started(at(0)).unwrap();
        let segments = acc.playback_paused(at(150)).unwrap();

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].ended_at, segments[1].started_at);
        assert_eq!(segments[1].ended_at, segments[2].started_at);
        assert_eq!(segments[2].duration(), Duration::from_seconds(30));
        assert_eq!(total(&segments), Duration::from_seconds(150));
    }

    #[test]
    fn test_tick_flushes_only_full_chunks() {
        let (mut acc, _) = open();
        acc.playback_started(at(0)).unwrap();
        assert!(acc.tick(at(59)).is_empty());

        let flushed = acc.tick(at(130));
        assert_eq!(flushed.len(), 2);

        let rest = acc.playback_paused(at(135)).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].started_at, at(120));
    }

    #[test]
    fn test_sum_matches_time_spent_playing() {
        let (mut acc, _) = open();
        let mut segments = Vec::new();
        for (start, end) in [(0, 45), (60, 200), (300, 301), (400, 400)] {
            segments.extend(acc.playback_started(at(start)).unwrap());
            segments.extend(acc.playback_paused(at(end)).unwrap());
        }
        segments.extend(acc.book_closed(at(500)).unwrap());

        assert_eq!(total(&segments), Duration::from_seconds(45 + 140 + 1));
        assert!(segments.iter().all(|s| !s.duration().is_zero()));
    }

    #[test]
    fn test_restart_while_playing_closes_and_reopens() {
        let (mut acc, _) = open();
        acc.playback_started(at(0)).unwrap();
        let closed = acc.playback_started(at(30)).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(total(&closed), Duration::from_seconds(30));
        assert!(acc.is_playing());
    }

    #[test]
    fn test_close_without_open_is_illegal() {
        let mut acc = ListeningTimeAccumulator::new(Duration::from_seconds(60));
        assert!(matches!(
            acc.book_closed(at(0)),
            Err(PlayerError::IllegalState(_))
        ));
    }

    #[test]
    fn test_commands_after_close_are_illegal() {
        let (mut acc, book) = open();
        acc.book_closed(at(1)).unwrap();

        assert!(acc.playback_started(at(2)).is_err());
        assert!(acc.playback_paused(at(2)).is_err());
        assert!(acc.rate_changed(rate(1.25), at(2)).is_err());
        assert!(acc.book_closed(at(2)).is_err());
        assert!(acc.book_opened(book, PlaybackRate::NORMAL).is_err());
        assert!(acc.tick(at(3)).is_empty());
    }

    #[test]
    fn test_second_open_is_illegal() {
        let (mut acc, _) = open();
        assert!(acc.book_opened(BookId::new(), PlaybackRate::NORMAL).is_err());
    }
}
