// FILE: crates/cli/src/simulation.rs

//! Stand-ins for a real audio engine and downloader
//!
//! Both run on the Tokio runtime and move faster than real time by a
//! configurable factor, so a whole book can be played in seconds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration as StdDuration;
use storystream_core::{PlaybackRate, Segment, SegmentId, SegmentStatus};
use storystream_player::{
    PlayerResult, RawTransportState, SegmentDownloader, SegmentStatusTable, SourceMode,
    TransportEngine, TransportFault, TransportListener, TransportResult,
};
use tokio::task::JoinHandle;

const TICK: StdDuration = StdDuration::from_millis(50);

struct Prepared {
    id: SegmentId,
    duration_ms: Option<u64>,
    mode: SourceMode,
    buffered: bool,
}

struct EngineState {
    listener: Option<TransportListener>,
    prepared: Option<Prepared>,
    playing: bool,
    position_ms: u64,
    rate: f32,
}

fn lock(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Plays segments by advancing a virtual clock
///
/// Every segment must declare its duration; segments without one end
/// immediately.
pub struct SimulatedEngine {
    state: Arc<Mutex<EngineState>>,
    ticker: JoinHandle<()>,
}

impl SimulatedEngine {
    /// Starts the engine's clock; must be called from within a Tokio runtime
    pub fn start(time_scale: f64) -> Self {
        let state = Arc::new(Mutex::new(EngineState {
            listener: None,
            prepared: None,
            playing: false,
            position_ms: 0,
            rate: 1.0,
        }));

        let weak = Arc::downgrade(&state);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            loop {
                interval.tick().await;
                if !advance(&weak, time_scale) {
                    break;
                }
            }
        });

        Self { state, ticker }
    }

    fn notify(&self, state: RawTransportState, transporting: bool, loading: bool) {
        let listener = lock(&self.state).listener.clone();
        if let Some(listener) = listener {
            listener.state_changed(state, transporting, loading);
        }
    }
}

/// Moves the playhead by one tick; returns false once the engine is gone
fn advance(state: &Weak<Mutex<EngineState>>, time_scale: f64) -> bool {
    let Some(state) = state.upgrade() else {
        return false;
    };

    let ended = {
        let mut guard = lock(&state);
        let step = (TICK.as_millis() as f64 * time_scale * f64::from(guard.rate)) as u64;
        let duration = match &guard.prepared {
            Some(prepared) if guard.playing => prepared.duration_ms.unwrap_or(0),
            _ => return true,
        };

        guard.position_ms = (guard.position_ms + step).min(duration);
        if guard.position_ms >= duration {
            guard.playing = false;
            guard.listener.clone()
        } else {
            None
        }
    };

    if let Some(listener) = ended {
        listener.state_changed(RawTransportState::Ended, false, false);
    }
    true
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

impl TransportEngine for SimulatedEngine {
    fn attach(&mut self, listener: TransportListener) {
        lock(&self.state).listener = Some(listener);
    }

    fn prepare(
        &mut self,
        segment: &Segment,
        offset_ms: u64,
        mode: SourceMode,
    ) -> TransportResult<()> {
        if mode == SourceMode::Streaming && !segment.is_remotely_addressable() {
            return Err(TransportFault::permanent(format!(
                "segment {} has no remote link to stream from",
                segment.id
            )));
        }

        let mut state = lock(&self.state);
        state.prepared = Some(Prepared {
            id: segment.id.clone(),
            duration_ms: segment.duration.map(|d| d.as_millis()),
            mode,
            buffered: mode == SourceMode::Downloaded,
        });
        state.playing = false;
        state.position_ms = offset_ms;
        log::debug!("simulated engine prepared {} ({:?})", segment.id, mode);
        Ok(())
    }

    fn play(&mut self) -> TransportResult<()> {
        let needs_buffering = {
            let mut state = lock(&self.state);
            let Some(prepared) = state.prepared.as_mut() else {
                return Err(TransportFault::transient("play before prepare"));
            };
            let needs_buffering = !prepared.buffered;
            prepared.buffered = true;
            state.playing = true;
            needs_buffering
        };

        if needs_buffering {
            self.notify(RawTransportState::Buffering, false, true);
        }
        self.notify(RawTransportState::Ready, true, false);
        Ok(())
    }

    fn pause(&mut self) -> TransportResult<()> {
        lock(&self.state).playing = false;
        self.notify(RawTransportState::Ready, false, false);
        Ok(())
    }

    fn stop(&mut self) -> TransportResult<()> {
        {
            let mut state = lock(&self.state);
            if let Some(prepared) = state.prepared.take() {
                log::debug!("simulated engine unloaded {} ({:?})", prepared.id, prepared.mode);
            }
            state.playing = false;
        }
        self.notify(RawTransportState::Idle, false, false);
        Ok(())
    }

    fn seek_to(&mut self, offset_ms: u64) -> TransportResult<()> {
        lock(&self.state).position_ms = offset_ms;
        Ok(())
    }

    fn set_rate(&mut self, rate: PlaybackRate) -> TransportResult<()> {
        lock(&self.state).rate = rate.value();
        Ok(())
    }

    fn position_ms(&self) -> u64 {
        lock(&self.state).position_ms
    }

    fn duration_ms(&self) -> Option<u64> {
        lock(&self.state)
            .prepared
            .as_ref()
            .and_then(|prepared| prepared.duration_ms)
    }
}

/// Pretends to download segments, reporting progress in quarters
pub struct SimulatedDownloader {
    statuses: SegmentStatusTable,
    delay: StdDuration,
    failing: Option<SegmentId>,
    tasks: Mutex<HashMap<SegmentId, JoinHandle<()>>>,
}

impl SimulatedDownloader {
    /// Each download takes `delay` times the segment's position in the book
    pub fn new(statuses: SegmentStatusTable, delay: StdDuration) -> Self {
        Self {
            statuses,
            delay,
            failing: None,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Makes the download of `id` fail half way through
    pub fn failing(mut self, id: SegmentId) -> Self {
        self.failing = Some(id);
        self
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<SegmentId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SegmentDownloader for SimulatedDownloader {
    fn fetch(&self, segment: &Segment) -> PlayerResult<()> {
        let id = segment.id.clone();
        let statuses = self.statuses.clone();
        let step = self.delay * (segment.index as u32 + 1) / 4;
        let fails = self.failing.as_ref() == Some(&id);

        statuses.update(&id, SegmentStatus::downloading(0));
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            for percent in [25, 50, 75] {
                tokio::time::sleep(step).await;
                if fails && percent == 75 {
                    statuses.update(&task_id, SegmentStatus::failed("simulated network failure"));
                    return;
                }
                statuses.update(&task_id, SegmentStatus::downloading(percent));
            }
            tokio::time::sleep(step).await;
            statuses.update(&task_id, SegmentStatus::Downloaded);
        });

        if let Some(previous) = self.tasks().insert(id, task) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&self, segment: &Segment) -> PlayerResult<()> {
        if let Some(task) = self.tasks().remove(&segment.id) {
            task.abort();
        }
        Ok(())
    }

    fn delete(&self, segment: &Segment) -> PlayerResult<()> {
        self.cancel(segment)?;
        log::debug!("deleted simulated audio for {}", segment.id);
        Ok(())
    }
}

impl Drop for SimulatedDownloader {
    fn drop(&mut self) {
        for (_, task) in self.tasks().drain() {
            task.abort();
        }
    }
}
