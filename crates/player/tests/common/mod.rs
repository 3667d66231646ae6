//! Test doubles shared by the player integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;
use storystream_config::Config;
use storystream_core::{
    BookId, Duration, PlaybackRate, ReadingOrder, Segment, SegmentDescriptor, SegmentId,
    SegmentStatus,
};
use storystream_player::{
    Clock, EventStream, ManualClock, PlayerEvent, PlayerSession, RawTransportState,
    SegmentStatusTable, SourceMode, TransportEngine, TransportFault, TransportListener,
    TransportResult,
};

#[derive(Default)]
struct EngineState {
    listener: Option<TransportListener>,
    prepared: Option<(SegmentId, SourceMode)>,
    durations: HashMap<SegmentId, u64>,
    playing: bool,
    position_ms: u64,
    duration_ms: Option<u64>,
    fail_next_prepare: Option<TransportFault>,
    silent_pause: bool,
    calls: Vec<String>,
}

/// A transport engine that answers every command with the callback a real
/// engine would eventually send, and otherwise only moves when told to
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<Mutex<EngineState>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    fn notify(&self, state: RawTransportState, transporting: bool, loading: bool) {
        let listener = self.lock().listener.clone();
        if let Some(listener) = listener {
            listener.state_changed(state, transporting, loading);
        }
    }

    /// Overrides the duration reported for a segment
    pub fn report_duration(&self, id: &str, duration_ms: u64) {
        self.lock().durations.insert(SegmentId::new(id), duration_ms);
    }

    /// Plays the prepared segment to its end
    pub fn finish_segment(&self) {
        {
            let mut state = self.lock();
            state.playing = false;
            if let Some(duration) = state.duration_ms {
                state.position_ms = duration;
            }
        }
        self.notify(RawTransportState::Ended, false, false);
    }

    pub fn set_position(&self, position_ms: u64) {
        self.lock().position_ms = position_ms;
    }

    pub fn buffer(&self) {
        self.notify(RawTransportState::Buffering, false, true);
    }

    pub fn emit_error(&self, message: &str, permanent: bool) {
        let listener = self.lock().listener.clone();
        if let Some(listener) = listener {
            listener.error(message, permanent);
        }
    }

    pub fn fail_next_prepare(&self, fault: TransportFault) {
        self.lock().fail_next_prepare = Some(fault);
    }

    /// Pauses from now on go unacknowledged, like an engine that reaches the
    /// end of a segment before its pause callback is delivered
    pub fn silence_pause(&self) {
        self.lock().silent_pause = true;
    }

    pub fn prepared(&self) -> Option<(SegmentId, SourceMode)> {
        self.lock().prepared.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

impl TransportEngine for ScriptedEngine {
    fn attach(&mut self, listener: TransportListener) {
        self.lock().listener = Some(listener);
    }

    fn prepare(
        &mut self,
        segment: &Segment,
        offset_ms: u64,
        mode: SourceMode,
    ) -> TransportResult<()> {
        let mut state = self.lock();
        state
            .calls
            .push(format!("prepare {}@{} {:?}", segment.id, offset_ms, mode));
        if let Some(fault) = state.fail_next_prepare.take() {
            return Err(fault);
        }

        let duration = state
            .durations
            .get(&segment.id)
            .copied()
            .or_else(|| segment.duration.map(|d| d.as_millis()));
        state.prepared = Some((segment.id.clone(), mode));
        state.playing = false;
        state.position_ms = offset_ms;
        state.duration_ms = duration;
        Ok(())
    }

    fn play(&mut self) -> TransportResult<()> {
        let prepared = {
            let mut state = self.lock();
            state.calls.push("play".to_string());
            state.playing = state.prepared.is_some();
            state.playing
        };
        if prepared {
            self.notify(RawTransportState::Ready, true, false);
        }
        Ok(())
    }

    fn pause(&mut self) -> TransportResult<()> {
        let silent = {
            let mut state = self.lock();
            state.calls.push("pause".to_string());
            state.playing = false;
            state.silent_pause
        };
        if !silent {
            self.notify(RawTransportState::Ready, false, false);
        }
        Ok(())
    }

    fn stop(&mut self) -> TransportResult<()> {
        {
            let mut state = self.lock();
            state.calls.push("stop".to_string());
            state.playing = false;
            state.prepared = None;
            state.duration_ms = None;
        }
        self.notify(RawTransportState::Idle, false, false);
        Ok(())
    }

    fn seek_to(&mut self, offset_ms: u64) -> TransportResult<()> {
        let mut state = self.lock();
        state.calls.push(format!("seek {}", offset_ms));
        state.position_ms = offset_ms;
        Ok(())
    }

    fn set_rate(&mut self, rate: PlaybackRate) -> TransportResult<()> {
        self.lock().calls.push(format!("rate {}", rate.value()));
        Ok(())
    }

    fn position_ms(&self) -> u64 {
        self.lock().position_ms
    }

    fn duration_ms(&self) -> Option<u64> {
        self.lock().duration_ms
    }
}

/// A reading order `s0, s1, ...` with the given durations in seconds
pub fn book(durations_secs: &[u64]) -> Arc<ReadingOrder> {
    let descriptors = durations_secs
        .iter()
        .enumerate()
        .map(|(i, secs)| {
            SegmentDescriptor::new(format!("s{}", i))
                .with_title(format!("Chapter {}", i + 1))
                .with_duration(Duration::from_seconds(*secs))
                .with_href(format!("https://example.com/audio/{}.mp3", i))
        })
        .collect();
    Arc::new(ReadingOrder::new(descriptors).unwrap())
}

/// Defaults, without position broadcasts getting in the way of short tests
pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.player.position_broadcast_ms = 5_000;
    config
}

pub struct Fixture {
    pub engine: ScriptedEngine,
    pub statuses: SegmentStatusTable,
    pub session: PlayerSession,
    pub events: EventStream,
    pub order: Arc<ReadingOrder>,
}

impl Fixture {
    pub fn open(durations_secs: &[u64]) -> Self {
        Self::open_with(durations_secs, &quiet_config())
    }

    pub fn open_with(durations_secs: &[u64], config: &Config) -> Self {
        Self::open_session(durations_secs, config, None)
    }

    /// Session time comes from `clock` instead of the wall clock
    pub fn open_with_clock(durations_secs: &[u64], config: &Config, clock: &ManualClock) -> Self {
        Self::open_session(durations_secs, config, Some(Arc::new(clock.clone())))
    }

    fn open_session(durations_secs: &[u64], config: &Config, clock: Option<Arc<dyn Clock>>) -> Self {
        // RUST_LOG=storystream_player=debug shows the session's transitions
        let _ = env_logger::builder().is_test(true).try_init();
        let order = book(durations_secs);
        let engine = ScriptedEngine::new();
        let statuses = SegmentStatusTable::new(&order);
        let mut builder =
            PlayerSession::builder(BookId::new(), Arc::clone(&order), engine.clone(), statuses.clone())
                .with_config(config);
        if let Some(clock) = clock {
            builder = builder.with_clock(clock);
        }
        let session = builder.open().unwrap();
        let events = session.subscribe().unwrap();
        Self {
            engine,
            statuses,
            session,
            events,
            order,
        }
    }

    pub fn download(&self, id: &str) {
        self.statuses
            .update(&SegmentId::new(id), SegmentStatus::Downloaded);
    }

    pub fn download_all(&self) {
        for segment in self.order.iter() {
            self.statuses.update(&segment.id, SegmentStatus::Downloaded);
        }
    }

    /// Waits until every message queued so far has been handled
    pub async fn settle(&self) {
        self.session.snapshot().await.unwrap();
        self.session.snapshot().await.unwrap();
    }

    pub async fn next(&mut self) -> PlayerEvent {
        next_event(&mut self.events).await
    }

    /// Skips events until one with the given name arrives
    pub async fn expect(&mut self, name: &str) -> PlayerEvent {
        wait_for(&mut self.events, name).await
    }

    /// Events already delivered, progress updates excluded
    pub fn drain(&mut self) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if !matches!(event, PlayerEvent::PlaybackProgressUpdate(_)) {
                events.push(event);
            }
        }
        events
    }
}

/// Next event other than a progress update
pub async fn next_event(events: &mut EventStream) -> PlayerEvent {
    loop {
        let event = tokio::time::timeout(StdDuration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for a player event")
            .expect("event stream ended");
        if !matches!(event, PlayerEvent::PlaybackProgressUpdate(_)) {
            return event;
        }
    }
}

/// Next event of any kind
pub async fn next_event_raw(events: &mut EventStream) -> PlayerEvent {
    tokio::time::timeout(StdDuration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a player event")
        .expect("event stream ended")
}

/// Skips events until one with the given name arrives
pub async fn wait_for(events: &mut EventStream, name: &str) -> PlayerEvent {
    loop {
        let event = next_event(events).await;
        if event.name() == name {
            return event;
        }
    }
}

/// Name, segment and offset of a positioned event
pub fn at(event: &PlayerEvent) -> (&'static str, String, u64) {
    let position = event.position().expect("event has no position");
    (
        event.name(),
        position.segment_id.to_string(),
        position.offset_ms,
    )
}

pub fn names(events: &[PlayerEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}
