//! The playback session
//!
//! A [`PlayerSession`] is the handle returned when a book is opened. All of
//! the session's mutable state lives in one actor task. Commands from the
//! handle, engine callbacks, download status updates and position broadcast
//! ticks are funnelled into that task's inbox and handled strictly in arrival
//! order, so no two transitions ever interleave.

use crate::bookmarks::{BookmarkHeuristic, BookmarkStore, InMemoryBookmarkStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{PlayerError, PlayerResult};
use crate::events::{ErrorCode, EventHub, EventStream, PlayerEvent, PositionEvent};
use crate::listening::TimeTrackerHandle;
use crate::position::{PositionTracker, SeekResolution};
use crate::reconciler::{ErrorDisposition, PlaybackStatus, StatusTransition, TransportReconciler};
use crate::sleep_timer::{SleepTimer, SleepTimerConfiguration, SleepTimerEvent, SleepTimerStatus};
use crate::status_table::{SegmentStatusTable, SegmentStatusUpdate};
use crate::transport::{SourceMode, TransportEngine, TransportEvent, TransportFault, TransportListener};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storystream_config::Config;
use storystream_core::{
    AppError, BookId, Bookmark, BookmarkKind, PlaybackRate, PlaybackTarget, PositionMetadata, ReadingOrder,
    SegmentId, SegmentStatus,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Terminal
    Closed,
    /// Opened, nothing requested yet
    Idle,
    /// The transport engine is loading the target segment
    Preparing,
    /// The target segment is not available yet
    Waiting,
    Playing,
    Paused,
    /// Playback ended or was stopped by a failure
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Waiting => "waiting",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What the listener asked for, regardless of what the engine is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackIntention {
    ShouldPlay,
    ShouldPause,
}

/// Why the session last paused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Nothing has asked for a pause since the book was opened
    InitiallyPaused,
    UserExplicitlyPaused,
    SleepTimer,
}

/// Answer to every query command
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub status: PlaybackStatus,
    pub intention: PlaybackIntention,
    pub position: PlaybackTarget,
    pub metadata: PositionMetadata,
    pub rate: PlaybackRate,
    pub pause_reason: PauseReason,
    pub sleep_timer: SleepTimerStatus,
}

type Reply<T> = oneshot::Sender<T>;

enum Message {
    Play(Reply<()>),
    Pause(Reply<()>),
    Seek(i64, Reply<()>),
    SkipPlayhead(i64, Reply<()>),
    SkipToNextSegment(u64, Reply<()>),
    SkipToPreviousSegment(u64, Reply<()>),
    MovePlayheadTo(PlaybackTarget, Reply<()>),
    BookmarkExplicit(Reply<Bookmark>),
    DeleteBookmark(Bookmark, Reply<()>),
    SetRate(PlaybackRate, Reply<PlayerResult<()>>),
    ManifestUpdated(Reply<()>),
    SleepTimer(TimerCommand, Reply<()>),
    Snapshot(Reply<SessionSnapshot>),
    Transport(TransportEvent),
    SegmentStatus(SegmentStatusUpdate),
    Broadcast,
    Close,
}

#[derive(Debug)]
enum TimerCommand {
    Configure(SleepTimerConfiguration),
    Start,
    Cancel,
    Pause,
    Unpause,
    Finish,
}

/// Configures and opens a [`PlayerSession`]
pub struct SessionBuilder {
    book_id: BookId,
    order: Arc<ReadingOrder>,
    engine: Box<dyn TransportEngine>,
    statuses: SegmentStatusTable,
    config: Config,
    store: Arc<dyn BookmarkStore>,
    clock: Arc<dyn Clock>,
    tracker: Option<TimeTrackerHandle>,
}

impl SessionBuilder {
    pub fn with_config(mut self, config: &Config) -> Self {
        self.config = config.clone();
        self
    }

    pub fn with_store(mut self, store: Arc<dyn BookmarkStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reports listening time of this session to a tracker
    pub fn with_time_tracker(mut self, tracker: TimeTrackerHandle) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Opens the session at the book's last-read position, or at its start
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(self) -> PlayerResult<PlayerSession> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PlayerError::IllegalState(format!("open outside a Tokio runtime: {}", e)))?;

        let player = &self.config.player;
        let rate = PlaybackRate::new(player.default_rate)
            .map_err(|_| PlayerError::InvalidRate(player.default_rate))?;

        let start = match self.store.last_read(self.book_id) {
            Ok(Some(bookmark)) if self.order.contains(&bookmark.segment_id) => {
                log::info!("resuming book {} at {}", self.book_id, bookmark.target());
                bookmark.target()
            }
            Ok(Some(bookmark)) => {
                log::warn!(
                    "last-read bookmark points at unknown segment {}, starting from the beginning",
                    bookmark.segment_id
                );
                PlaybackTarget::start_of(self.order.first().id.clone())
            }
            Ok(None) => PlaybackTarget::start_of(self.order.first().id.clone()),
            Err(e) => {
                log::warn!("could not read last-read bookmark: {}", e);
                PlaybackTarget::start_of(self.order.first().id.clone())
            }
        };

        let (inbox, messages) = mpsc::unbounded_channel();
        let hub = Arc::new(EventHub::new());
        let closed = Arc::new(AtomicBool::new(false));
        let should_play = Arc::new(AtomicBool::new(false));
        let counting_down = Arc::new(AtomicBool::new(false));

        let mut engine = self.engine;
        if let Err(fault) = engine.set_rate(rate) {
            log::warn!("transport engine rejected rate {}: {}", rate, fault);
        }
        let callbacks = inbox.clone();
        engine.attach(TransportListener::new(move |event| {
            let _ = callbacks.send(Message::Transport(event));
        }));

        let mut status_updates = self.statuses.subscribe();
        let forward = inbox.clone();
        let forwarder = runtime.spawn(async move {
            while let Some(update) = status_updates.recv().await {
                if forward.send(Message::SegmentStatus(update)).is_err() {
                    break;
                }
            }
        });

        let period = std::time::Duration::from_millis(player.position_broadcast_ms.max(1));
        let ticks = inbox.clone();
        let playing = Arc::clone(&should_play);
        let counting = Arc::clone(&counting_down);
        let broadcaster = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let due = playing.load(Ordering::SeqCst) || counting.load(Ordering::SeqCst);
                if due && ticks.send(Message::Broadcast).is_err() {
                    break;
                }
            }
        });

        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.book_opened(self.book_id, rate) {
                log::warn!("listening time: {}", e);
            }
        }

        let heuristic = BookmarkHeuristic::new(&self.config.bookmarks, self.clock.now());
        let sleep_timer = SleepTimer::new(self.clock.now());
        let actor = SessionActor {
            book_id: self.book_id,
            engine,
            statuses: self.statuses,
            store: self.store,
            clock: self.clock,
            tracker: self.tracker,
            hub: Arc::clone(&hub),
            closed: Arc::clone(&closed),
            should_play,
            counting_down,
            position: PositionTracker::new(Arc::clone(&self.order), start.clone()),
            reconciler: TransportReconciler::new(),
            heuristic,
            sleep_timer,
            state: SessionState::Idle,
            intention: PlaybackIntention::ShouldPause,
            pause_reason: PauseReason::InitiallyPaused,
            rate,
            streaming_permitted: player.streaming_permitted,
            loaded: None,
            waiting_for: None,
        };
        runtime.spawn(actor.run(messages));

        log::info!(
            "opened book {} ({} segments) at {}",
            self.book_id,
            self.order.len(),
            start
        );

        Ok(PlayerSession {
            book_id: self.book_id,
            order: self.order,
            inbox,
            hub,
            closed,
            tasks: vec![forwarder, broadcaster],
        })
    }
}

/// Handle to an open book
///
/// Every command is queued behind those already submitted and completes once
/// the session has handled it. After [`PlayerSession::close`] every command
/// fails with `IllegalState`. Dropping the handle closes the session.
pub struct PlayerSession {
    book_id: BookId,
    order: Arc<ReadingOrder>,
    inbox: mpsc::UnboundedSender<Message>,
    hub: Arc<EventHub>,
    closed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PlayerSession {
    pub fn builder(
        book_id: BookId,
        order: Arc<ReadingOrder>,
        engine: impl TransportEngine,
        statuses: SegmentStatusTable,
    ) -> SessionBuilder {
        SessionBuilder {
            book_id,
            order,
            engine: Box::new(engine),
            statuses,
            config: Config::default(),
            store: Arc::new(InMemoryBookmarkStore::new()),
            clock: Arc::new(SystemClock),
            tracker: None,
        }
    }

    pub fn book_id(&self) -> BookId {
        self.book_id
    }

    pub fn reading_order(&self) -> &ReadingOrder {
        &self.order
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Receives every event published after this call
    pub fn subscribe(&self) -> PlayerResult<EventStream> {
        if self.is_closed() {
            return Err(PlayerError::illegal_state("subscribe"));
        }
        self.hub
            .subscribe()
            .ok_or_else(|| PlayerError::illegal_state("subscribe"))
    }

    pub async fn play(&self) -> PlayerResult<()> {
        self.request("play", Message::Play).await
    }

    pub async fn pause(&self) -> PlayerResult<()> {
        self.request("pause", Message::Pause).await
    }

    /// Seeks to `offset_ms` in the current segment
    ///
    /// A negative offset lands in the previous segment, that far before its
    /// end; an offset past the end lands in the next segment. Before the first
    /// segment the position is held at its start; past the last one the seek
    /// is ignored.
    pub async fn seek(&self, offset_ms: i64) -> PlayerResult<()> {
        self.request("seek", |reply| Message::Seek(offset_ms, reply))
            .await
    }

    /// Seeks relative to the current offset
    pub async fn skip_playhead(&self, delta_ms: i64) -> PlayerResult<()> {
        self.request("skip_playhead", |reply| {
            Message::SkipPlayhead(delta_ms, reply)
        })
        .await
    }

    /// Moves to `offset_ms` into the next segment
    ///
    /// In the last segment this seeks to its end, if that is known.
    pub async fn skip_to_next_segment(&self, offset_ms: u64) -> PlayerResult<()> {
        self.request("skip_to_next_segment", |reply| {
            Message::SkipToNextSegment(offset_ms, reply)
        })
        .await
    }

    /// Moves to `offset_ms` into the previous segment
    ///
    /// In the first segment this seeks to its start.
    pub async fn skip_to_previous_segment(&self, offset_ms: u64) -> PlayerResult<()> {
        self.request("skip_to_previous_segment", |reply| {
            Message::SkipToPreviousSegment(offset_ms, reply)
        })
        .await
    }

    /// # Panics
    ///
    /// Panics if `target` names a segment outside the reading order.
    pub async fn move_playhead_to(&self, target: PlaybackTarget) -> PlayerResult<()> {
        self.order.segment(&target.segment_id);
        self.request("move_playhead_to", |reply| {
            Message::MovePlayheadTo(target, reply)
        })
        .await
    }

    pub async fn move_playhead_to_book_start(&self) -> PlayerResult<()> {
        let start = PlaybackTarget::start_of(self.order.first().id.clone());
        self.move_playhead_to(start).await
    }

    /// Saves an explicit bookmark at the current position
    pub async fn bookmark_explicit(&self) -> PlayerResult<Bookmark> {
        self.request("bookmark_explicit", Message::BookmarkExplicit)
            .await
    }

    pub async fn delete_bookmark(&self, bookmark: Bookmark) -> PlayerResult<()> {
        self.request("delete_bookmark", |reply| {
            Message::DeleteBookmark(bookmark, reply)
        })
        .await
    }

    pub async fn set_rate(&self, rate: f32) -> PlayerResult<()> {
        let rate = PlaybackRate::new(rate).map_err(|_| PlayerError::InvalidRate(rate))?;
        self.request("set_rate", |reply| Message::SetRate(rate, reply))
            .await?
    }

    /// Announces that the manifest's links were replaced
    pub async fn manifest_updated(&self) -> PlayerResult<()> {
        self.request("manifest_updated", Message::ManifestUpdated)
            .await
    }

    /// Sets what the sleep timer counts down to
    ///
    /// While playing the timer starts right away; otherwise it waits for the
    /// next play. [`SleepTimerConfiguration::Off`] switches it off.
    pub async fn configure_sleep_timer(
        &self,
        configuration: SleepTimerConfiguration,
    ) -> PlayerResult<()> {
        self.sleep_timer_command("configure_sleep_timer", TimerCommand::Configure(configuration))
            .await
    }

    pub async fn start_sleep_timer(&self) -> PlayerResult<()> {
        self.sleep_timer_command("start_sleep_timer", TimerCommand::Start)
            .await
    }

    pub async fn cancel_sleep_timer(&self) -> PlayerResult<()> {
        self.sleep_timer_command("cancel_sleep_timer", TimerCommand::Cancel)
            .await
    }

    pub async fn pause_sleep_timer(&self) -> PlayerResult<()> {
        self.sleep_timer_command("pause_sleep_timer", TimerCommand::Pause)
            .await
    }

    pub async fn unpause_sleep_timer(&self) -> PlayerResult<()> {
        self.sleep_timer_command("unpause_sleep_timer", TimerCommand::Unpause)
            .await
    }

    /// Runs the sleep timer out now, pausing playback
    pub async fn finish_sleep_timer(&self) -> PlayerResult<()> {
        self.sleep_timer_command("finish_sleep_timer", TimerCommand::Finish)
            .await
    }

    pub async fn sleep_timer(&self) -> PlayerResult<SleepTimerStatus> {
        Ok(self.snapshot().await?.sleep_timer)
    }

    pub async fn pause_reason(&self) -> PlayerResult<PauseReason> {
        Ok(self.snapshot().await?.pause_reason)
    }

    pub async fn snapshot(&self) -> PlayerResult<SessionSnapshot> {
        self.request("snapshot", Message::Snapshot).await
    }

    pub async fn state(&self) -> PlayerResult<SessionState> {
        Ok(self.snapshot().await?.state)
    }

    pub async fn status(&self) -> PlayerResult<PlaybackStatus> {
        Ok(self.snapshot().await?.status)
    }

    pub async fn intention(&self) -> PlayerResult<PlaybackIntention> {
        Ok(self.snapshot().await?.intention)
    }

    pub async fn position(&self) -> PlayerResult<PlaybackTarget> {
        Ok(self.snapshot().await?.position)
    }

    pub async fn metadata(&self) -> PlayerResult<PositionMetadata> {
        Ok(self.snapshot().await?.metadata)
    }

    pub async fn rate(&self) -> PlayerResult<PlaybackRate> {
        Ok(self.snapshot().await?.rate)
    }

    /// Stops playback and ends every event stream; idempotent
    ///
    /// Never blocks. No event is delivered once this returns.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.hub.close();
        let _ = self.inbox.send(Message::Close);
        for task in &self.tasks {
            task.abort();
        }
        log::info!("closed book {}", self.book_id);
    }

    async fn sleep_timer_command(&self, operation: &str, command: TimerCommand) -> PlayerResult<()> {
        self.request(operation, |reply| Message::SleepTimer(command, reply))
            .await
    }

    async fn request<T>(
        &self,
        operation: &str,
        message: impl FnOnce(Reply<T>) -> Message,
    ) -> PlayerResult<T> {
        if self.is_closed() {
            return Err(PlayerError::illegal_state(operation));
        }

        let (reply, response) = oneshot::channel();
        self.inbox
            .send(message(reply))
            .map_err(|_| PlayerError::illegal_state(operation))?;
        // The actor drops the reply of anything queued behind a close
        response
            .await
            .map_err(|_| PlayerError::illegal_state(operation))
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerSession")
            .field("book_id", &self.book_id)
            .field("segments", &self.order.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct SessionActor {
    book_id: BookId,
    engine: Box<dyn TransportEngine>,
    statuses: SegmentStatusTable,
    store: Arc<dyn BookmarkStore>,
    clock: Arc<dyn Clock>,
    tracker: Option<TimeTrackerHandle>,
    hub: Arc<EventHub>,
    closed: Arc<AtomicBool>,
    /// Mirrors `intention` for the broadcaster
    should_play: Arc<AtomicBool>,
    /// Mirrors whether the sleep timer is running, for the broadcaster
    counting_down: Arc<AtomicBool>,
    position: PositionTracker,
    reconciler: TransportReconciler,
    heuristic: BookmarkHeuristic,
    sleep_timer: SleepTimer,
    state: SessionState,
    intention: PlaybackIntention,
    pause_reason: PauseReason,
    rate: PlaybackRate,
    streaming_permitted: bool,
    /// Segment currently prepared in the engine
    loaded: Option<(SegmentId, SourceMode)>,
    /// Segment whose availability playback is blocked on
    waiting_for: Option<SegmentId>,
}

impl SessionActor {
    async fn run(mut self, mut messages: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = messages.recv().await {
            if let Message::Close = message {
                self.shutdown();
                break;
            }
            if self.closed.load(Ordering::SeqCst) {
                continue;
            }
            self.handle(message);
        }
        log::debug!("session actor for book {} stopped", self.book_id);
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Play(reply) => {
                self.play();
                let _ = reply.send(());
            }
            Message::Pause(reply) => {
                self.pause();
                let _ = reply.send(());
            }
            Message::Seek(offset_ms, reply) => {
                self.seek(offset_ms);
                let _ = reply.send(());
            }
            Message::SkipPlayhead(delta_ms, reply) => {
                self.sync_position();
                let offset = self.position.current_position().offset_ms as i64;
                self.seek(offset.saturating_add(delta_ms));
                let _ = reply.send(());
            }
            Message::SkipToNextSegment(offset_ms, reply) => {
                self.skip_to_next_segment(offset_ms);
                let _ = reply.send(());
            }
            Message::SkipToPreviousSegment(offset_ms, reply) => {
                self.skip_to_previous_segment(offset_ms);
                let _ = reply.send(());
            }
            Message::MovePlayheadTo(target, reply) => {
                log::debug!("command: move playhead to {}", target);
                self.retarget(target);
                let _ = reply.send(());
            }
            Message::BookmarkExplicit(reply) => {
                let _ = reply.send(self.bookmark_explicit());
            }
            Message::DeleteBookmark(bookmark, reply) => {
                self.delete_bookmark(bookmark);
                let _ = reply.send(());
            }
            Message::SetRate(rate, reply) => {
                let _ = reply.send(self.set_rate(rate));
            }
            Message::ManifestUpdated(reply) => {
                self.emit(PlayerEvent::ManifestUpdated);
                self.resume_if_ready();
                let _ = reply.send(());
            }
            Message::SleepTimer(command, reply) => {
                self.sleep_timer_command(command);
                let _ = reply.send(());
            }
            Message::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Message::Transport(event) => self.on_transport_event(event),
            Message::SegmentStatus(update) => self.on_segment_status(update),
            Message::Broadcast => self.broadcast(),
            Message::Close => self.shutdown(),
        }
    }

    // ===== Commands =====

    fn play(&mut self) {
        log::debug!("command: play");
        self.set_intention(PlaybackIntention::ShouldPlay);

        let now = self.clock.now();
        let events = match self.sleep_timer.status() {
            SleepTimerStatus::Paused(_) => self.sleep_timer.unpause(now),
            SleepTimerStatus::Stopped(SleepTimerConfiguration::Off) | SleepTimerStatus::Running(_) => {
                Vec::new()
            }
            SleepTimerStatus::Stopped(_) => self.sleep_timer.start(now),
        };
        self.on_sleep_timer_events(events);

        if self.state != SessionState::Playing {
            self.start_target();
        }
    }

    fn pause(&mut self) {
        log::debug!("command: pause");
        self.pause_playback(PauseReason::UserExplicitlyPaused);
        if self.sleep_timer.is_running() {
            let events = self.sleep_timer.pause(self.clock.now());
            self.on_sleep_timer_events(events);
        }
    }

    fn pause_playback(&mut self, reason: PauseReason) {
        self.set_intention(PlaybackIntention::ShouldPause);
        self.pause_reason = reason;
        match self.state {
            SessionState::Waiting => {
                self.waiting_for = None;
                self.set_state(SessionState::Paused);
                self.emit_at_position(PlayerEvent::PlaybackPaused);
            }
            SessionState::Preparing | SessionState::Playing if self.is_current_loaded() => {
                self.sync_position();
                if let Err(fault) = self.engine.pause() {
                    self.on_fault(fault);
                }
            }
            SessionState::Preparing | SessionState::Playing => {
                // Nothing is loaded, so no engine transition will follow
                self.reconciler.reset();
                self.set_state(SessionState::Paused);
                self.emit_at_position(PlayerEvent::PlaybackPaused);
            }
            _ => {}
        }
    }

    fn seek(&mut self, offset_ms: i64) {
        log::debug!("command: seek to {}ms", offset_ms);
        self.sync_position();
        match self.position.resolve_seek(offset_ms) {
            SeekResolution::Within(target) | SeekResolution::ClampedToStart(target) => {
                self.seek_in_current(target.offset_ms);
            }
            SeekResolution::Previous(target) | SeekResolution::Next(target) => {
                self.retarget(target);
            }
            SeekResolution::PastEnd => {
                log::debug!("seek past the end of the book ignored");
            }
        }
    }

    fn skip_to_next_segment(&mut self, offset_ms: u64) {
        log::debug!("command: skip to next segment +{}ms", offset_ms);
        let current = self.position.current_segment();
        match (current.next.clone(), self.position.duration_of(&current.id).known()) {
            (Some(next), _) => self.retarget(PlaybackTarget::new(next, offset_ms)),
            (None, Some(duration)) => self.seek_in_current(duration.as_millis()),
            (None, None) => log::debug!("no next segment and no known end to skip to"),
        }
    }

    fn skip_to_previous_segment(&mut self, offset_ms: u64) {
        log::debug!("command: skip to previous segment +{}ms", offset_ms);
        match self.position.current_segment().previous.clone() {
            Some(previous) => self.retarget(PlaybackTarget::new(previous, offset_ms)),
            None => self.seek_in_current(0),
        }
    }

    fn bookmark_explicit(&mut self) -> Bookmark {
        self.sync_position();
        let position = self.position_event();
        let bookmark = Bookmark::new(
            self.book_id,
            position.target(),
            BookmarkKind::Explicit,
            position.metadata,
            self.clock.now(),
        );
        if let Err(e) = self.store.save(&bookmark) {
            log::warn!("could not save bookmark {}: {}", bookmark.id, e);
        }
        self.emit(PlayerEvent::CreateBookmark(bookmark.clone()));
        bookmark
    }

    fn delete_bookmark(&mut self, bookmark: Bookmark) {
        match self.store.delete(bookmark.id) {
            Ok(true) => {}
            Ok(false) => log::debug!("bookmark {} was not stored", bookmark.id),
            Err(e) => log::warn!("could not delete bookmark {}: {}", bookmark.id, e),
        }
        self.emit(PlayerEvent::DeleteBookmark(bookmark));
    }

    fn set_rate(&mut self, rate: PlaybackRate) -> PlayerResult<()> {
        log::debug!("command: set rate {}", rate);
        if let Err(fault) = self.engine.set_rate(rate) {
            let message = fault.message.clone();
            self.on_fault(fault);
            return Err(PlayerError::TransportError(message));
        }
        self.rate = rate;
        self.sync_position();
        let position = self.position_event();
        self.emit(PlayerEvent::PlaybackRateChanged { rate, position });
        Ok(())
    }

    fn sleep_timer_command(&mut self, command: TimerCommand) {
        log::debug!("command: sleep timer {:?}", command);
        let now = self.clock.now();
        let events = match command {
            TimerCommand::Configure(SleepTimerConfiguration::Off) => {
                let mut events = self.sleep_timer.configure(SleepTimerConfiguration::Off, now);
                events.extend(self.sleep_timer.cancel());
                events
            }
            TimerCommand::Configure(configuration) => {
                let mut events = self.sleep_timer.configure(configuration, now);
                if self.intention == PlaybackIntention::ShouldPlay {
                    events.extend(self.sleep_timer.start(now));
                } else {
                    events.extend(self.sleep_timer.pause(now));
                }
                events
            }
            TimerCommand::Start => self.sleep_timer.start(now),
            TimerCommand::Cancel => self.sleep_timer.cancel(),
            TimerCommand::Pause => self.sleep_timer.pause(now),
            TimerCommand::Unpause => self.sleep_timer.unpause(now),
            TimerCommand::Finish => self.sleep_timer.finish(),
        };
        self.on_sleep_timer_events(events);
    }

    fn snapshot(&mut self) -> SessionSnapshot {
        self.sync_position();
        SessionSnapshot {
            state: self.state,
            status: self.reconciler.status(),
            intention: self.intention,
            position: self.position.current_position().clone(),
            metadata: self.position.metadata(),
            rate: self.rate,
            pause_reason: self.pause_reason,
            sleep_timer: self.sleep_timer.status(),
        }
    }

    fn shutdown(&mut self) {
        self.set_intention(PlaybackIntention::ShouldPause);
        self.sleep_timer.cancel();
        self.counting_down.store(false, Ordering::SeqCst);
        self.sync_position();
        if let Err(fault) = self.engine.stop() {
            log::warn!("transport engine failed to stop: {}", fault);
        }
        self.loaded = None;
        self.waiting_for = None;
        self.reconciler.reset();
        self.set_state(SessionState::Closed);

        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.book_closed() {
                log::warn!("listening time: {}", e);
            }
        }
    }

    // ===== Targeting =====

    /// Moves to `target`, honouring the current intention
    fn retarget(&mut self, target: PlaybackTarget) {
        self.position.set_position(target);

        match self.intention {
            PlaybackIntention::ShouldPlay => self.start_target(),
            PlaybackIntention::ShouldPause => {
                let target = self.position.current_position().clone();
                if self.is_current_loaded() {
                    if let Err(fault) = self.engine.seek_to(target.offset_ms) {
                        self.on_fault(fault);
                    }
                }

                if self.source_mode(&target.segment_id).is_some() {
                    self.waiting_for = None;
                    self.set_state(SessionState::Paused);
                    self.emit_at_position(PlayerEvent::PlaybackPaused);
                } else {
                    self.waiting_for = Some(target.segment_id);
                    self.set_state(SessionState::Waiting);
                    self.emit_at_position(PlayerEvent::ChapterWaiting);
                }
            }
        }
    }

    fn seek_in_current(&mut self, offset_ms: u64) {
        self.position.set_offset(offset_ms);
        if self.is_current_loaded() {
            if let Err(fault) = self.engine.seek_to(offset_ms) {
                self.on_fault(fault);
            }
        }
    }

    /// Gets the engine playing at the current position, or waits for the
    /// segment to become available
    fn start_target(&mut self) {
        let target = self.position.current_position().clone();

        let Some(mode) = self.source_mode(&target.segment_id) else {
            if self.waiting_for.as_ref() == Some(&target.segment_id) {
                return;
            }
            if self.loaded.is_some() {
                self.stop_engine();
            }
            self.waiting_for = Some(target.segment_id);
            self.set_state(SessionState::Waiting);
            self.emit_at_position(PlayerEvent::ChapterWaiting);
            return;
        };
        self.waiting_for = None;

        if self.is_current_loaded() {
            if self.engine.position_ms() != target.offset_ms {
                if let Err(fault) = self.engine.seek_to(target.offset_ms) {
                    self.on_fault(fault);
                    return;
                }
            }
            if let Err(fault) = self.engine.play() {
                self.on_fault(fault);
            }
            return;
        }

        self.reconciler.preparing();
        self.set_state(SessionState::Preparing);
        self.emit_at_position(PlayerEvent::PlaybackPreparing);

        let segment = self.position.current_segment().clone();
        if let Err(fault) = self.engine.prepare(&segment, target.offset_ms, mode) {
            self.loaded = None;
            self.on_fault(fault);
            return;
        }
        log::debug!("prepared {} ({:?})", target, mode);
        self.loaded = Some((segment.id, mode));
        self.learn_duration();

        if let Err(fault) = self.engine.play() {
            self.on_fault(fault);
        }
    }

    /// Resumes a waiting session whose target has become available
    fn resume_if_ready(&mut self) {
        let Some(waiting_for) = self.waiting_for.clone() else {
            return;
        };
        if self.source_mode(&waiting_for).is_none() {
            return;
        }

        match self.intention {
            PlaybackIntention::ShouldPlay => self.start_target(),
            PlaybackIntention::ShouldPause => {
                self.waiting_for = None;
                self.set_state(SessionState::Paused);
                self.emit_at_position(PlayerEvent::PlaybackPaused);
            }
        }
    }

    fn source_mode(&self, id: &SegmentId) -> Option<SourceMode> {
        if self.statuses.status(id).is_downloaded() {
            Some(SourceMode::Downloaded)
        } else if self.streaming_permitted
            && self.position.reading_order().segment(id).is_remotely_addressable()
        {
            Some(SourceMode::Streaming)
        } else {
            None
        }
    }

    fn is_current_loaded(&self) -> bool {
        match &self.loaded {
            Some((id, _)) => id == &self.position.current_position().segment_id,
            None => false,
        }
    }

    fn stop_engine(&mut self) {
        self.sync_position();
        if let Err(fault) = self.engine.stop() {
            log::warn!("transport engine failed to stop: {}", fault);
        }
        self.loaded = None;
        self.reconciler.reset();
    }

    // ===== Engine callbacks =====

    fn on_transport_event(&mut self, event: TransportEvent) {
        let transition = match event {
            TransportEvent::StateChanged {
                state,
                transporting,
                loading,
            } => self.reconciler.on_state_changed(state, transporting, loading),
            TransportEvent::PlayWhenReadyChanged {
                play_when_ready,
                transporting,
                loading,
            } => self
                .reconciler
                .on_play_when_ready_changed(play_when_ready, transporting, loading),
            TransportEvent::Error { message, permanent } => {
                self.on_engine_error(message, permanent);
                return;
            }
        };

        self.learn_duration();
        if let Some(transition) = transition {
            self.on_transition(transition);
        }
    }

    fn on_transition(&mut self, transition: StatusTransition) {
        if !self.is_current_loaded() {
            log::debug!("ignoring {} from a segment no longer targeted", transition.to);
            return;
        }

        match transition.to {
            PlaybackStatus::Initial | PlaybackStatus::Preparing => {}
            PlaybackStatus::Buffering => {
                self.emit_at_position(PlayerEvent::PlaybackBuffering);
            }
            PlaybackStatus::Playing => {
                if self.intention == PlaybackIntention::ShouldPause {
                    // A pause overtook a play that was already under way
                    if let Err(fault) = self.engine.pause() {
                        self.on_fault(fault);
                    }
                    return;
                }

                self.sync_position();
                self.set_state(SessionState::Playing);
                if transition.started_playing() {
                    let position = self.position_event();
                    self.emit(PlayerEvent::PlaybackStarted(position.clone()));
                    self.progress_update(position);
                }
            }
            PlaybackStatus::Paused => {
                if self.intention == PlaybackIntention::ShouldPlay {
                    if self.is_current_loaded() {
                        if let Err(fault) = self.engine.play() {
                            self.on_fault(fault);
                        }
                    }
                    return;
                }

                self.sync_position();
                if self.state != SessionState::Paused {
                    self.set_state(SessionState::Paused);
                    self.emit_at_position(PlayerEvent::PlaybackPaused);
                }
            }
            PlaybackStatus::SegmentEnded => self.on_segment_ended(),
        }
    }

    /// The only way the current segment advances without a command
    fn on_segment_ended(&mut self) {
        let segment = self.position.current_segment().clone();
        match self.position.duration_of(&segment.id).known() {
            Some(duration) => self.position.set_offset(duration.as_millis()),
            None => self.sync_position(),
        }

        if self.intention == PlaybackIntention::ShouldPause {
            if self.state != SessionState::Paused {
                self.set_state(SessionState::Paused);
                self.emit_at_position(PlayerEvent::PlaybackPaused);
            }
            return;
        }

        self.emit_at_position(PlayerEvent::ChapterCompleted);
        let end_of_chapter = self.sleep_timer.status()
            == SleepTimerStatus::Running(SleepTimerConfiguration::EndOfChapter);

        match segment.next {
            Some(next) => {
                self.position.set_position(PlaybackTarget::start_of(next));
                if end_of_chapter {
                    // Rest at the start of the next chapter instead of advancing
                    self.stop_engine();
                    let events = self.sleep_timer.finish();
                    self.on_sleep_timer_events(events);
                } else {
                    self.start_target();
                }
            }
            None => {
                log::info!("reached the end of book {}", self.book_id);
                self.set_intention(PlaybackIntention::ShouldPause);
                self.set_state(SessionState::Stopped);
                self.emit_at_position(PlayerEvent::PlaybackStopped);
                if end_of_chapter {
                    let events = self.sleep_timer.finish();
                    self.on_sleep_timer_events(events);
                }
            }
        }
    }

    fn on_fault(&mut self, fault: TransportFault) {
        let (message, permanent) = (fault.message.clone(), fault.permanent);
        let error = AppError::from(fault);
        log::debug!("engine command failed: {} ({})", error, error.recovery_action());
        self.on_engine_error(message, permanent);
    }

    fn on_engine_error(&mut self, message: String, permanent: bool) {
        log::error!("transport error (permanent: {}): {}", permanent, message);

        match self.reconciler.on_error(permanent) {
            ErrorDisposition::Transient => {
                let position = self.position_event();
                self.emit(PlayerEvent::Error {
                    code: ErrorCode::Transport,
                    message,
                    position,
                });
            }
            ErrorDisposition::Permanent => {
                let position = self.position_event();
                self.emit(PlayerEvent::Error {
                    code: ErrorCode::TransportPermanent,
                    message,
                    position,
                });
                self.set_intention(PlaybackIntention::ShouldPause);
                self.stop_engine();
                self.waiting_for = None;
                self.set_state(SessionState::Stopped);
                self.emit_at_position(PlayerEvent::PlaybackStopped);
            }
        }
    }

    // ===== Download status =====

    fn on_segment_status(&mut self, update: SegmentStatusUpdate) {
        let SegmentStatusUpdate { segment_id, status } = update;

        if self.waiting_for.as_ref() == Some(&segment_id) {
            let code = match &status {
                SegmentStatus::Expired { .. } => Some(ErrorCode::DownloadExpired),
                SegmentStatus::Failed { .. } => Some(ErrorCode::DownloadFailed),
                _ => None,
            };
            if let Some(code) = code {
                log::warn!("awaited segment {} is {}", segment_id, status);
                let position = self.position_event();
                self.emit(PlayerEvent::Error {
                    code,
                    message: status.to_string(),
                    position,
                });
            }
            self.resume_if_ready();
            return;
        }

        let regressed = matches!(
            &self.loaded,
            Some((id, SourceMode::Downloaded)) if id == &segment_id
        ) && !status.is_downloaded();

        if regressed {
            log::warn!("loaded segment {} is no longer available: {}", segment_id, status);
            self.set_intention(PlaybackIntention::ShouldPause);
            self.stop_engine();
            self.set_state(SessionState::Stopped);
            self.emit_at_position(PlayerEvent::PlaybackStopped);
        }
    }

    // ===== Sleep timer =====

    fn on_sleep_timer_events(&mut self, events: Vec<SleepTimerEvent>) {
        self.counting_down
            .store(self.sleep_timer.is_running(), Ordering::SeqCst);

        for event in events {
            match event {
                SleepTimerEvent::StatusChanged { old, new } => {
                    self.emit(PlayerEvent::SleepTimerChanged { old, new });
                }
                SleepTimerEvent::Finished => {
                    log::info!("sleep timer finished, pausing book {}", self.book_id);
                    self.emit(PlayerEvent::SleepTimerFinished);
                    self.pause_playback(PauseReason::SleepTimer);
                }
            }
        }
    }

    // ===== Position =====

    fn broadcast(&mut self) {
        if self.sleep_timer.is_running() {
            let events = self.sleep_timer.tick(self.clock.now());
            self.on_sleep_timer_events(events);
        }

        if self.intention != PlaybackIntention::ShouldPlay || self.state != SessionState::Playing {
            return;
        }
        self.sync_position();
        let position = self.position_event();
        self.progress_update(position);
    }

    fn progress_update(&mut self, position: PositionEvent) {
        self.emit(PlayerEvent::PlaybackProgressUpdate(position.clone()));

        let now = self.clock.now();
        if !self.heuristic.on_progress(position.offset_ms, now) {
            return;
        }

        let bookmark = Bookmark::new(
            self.book_id,
            position.target(),
            BookmarkKind::LastRead,
            position.metadata,
            now,
        );
        if let Err(e) = self.store.save(&bookmark) {
            log::warn!("could not save last-read position: {}", e);
        }
        self.emit(PlayerEvent::CreateBookmark(bookmark));
    }

    /// Pulls the engine's offset into the tracker while it plays the current segment
    fn sync_position(&mut self) {
        if self.is_current_loaded() {
            let offset = self.engine.position_ms();
            self.position.set_offset(offset);
        }
    }

    fn learn_duration(&mut self) {
        let Some((id, _)) = &self.loaded else {
            return;
        };
        if let Some(duration_ms) = self.engine.duration_ms() {
            let id = id.clone();
            self.position
                .learn_duration(&id, storystream_core::Duration::from_millis(duration_ms));
        }
    }

    fn position_event(&self) -> PositionEvent {
        PositionEvent::new(self.position.current_position(), self.position.metadata())
    }

    // ===== Bookkeeping =====

    fn emit_at_position(&mut self, event: fn(PositionEvent) -> PlayerEvent) {
        let position = self.position_event();
        self.emit(event(position));
    }

    fn emit(&mut self, event: PlayerEvent) {
        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.observe(&event) {
                log::warn!("listening time: {}", e);
            }
        }
        self.hub.publish(event);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("session state: {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn set_intention(&mut self, intention: PlaybackIntention) {
        self.intention = intention;
        self.should_play.store(
            intention == PlaybackIntention::ShouldPlay,
            Ordering::SeqCst,
        );
    }
}
