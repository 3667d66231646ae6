//! Sleep timer
//!
//! Counts down listening time and tells the session when to pause. The timer
//! itself is a plain state machine: every operation takes the current time and
//! returns the events it caused, so the session can drive it from its own
//! clock and publish the events in order with everything else.

use std::fmt;
use storystream_core::{Duration, Timestamp};

/// When a running timer finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTimerConfiguration {
    /// Never finishes on its own
    Off,
    /// Finishes once this much time has passed while running
    WithDuration(Duration),
    /// Finishes when the current chapter completes
    EndOfChapter,
}

impl SleepTimerConfiguration {
    /// Finishes on the next tick
    pub const NOW: Self = Self::WithDuration(Duration::from_seconds(1));

    pub const fn minutes(minutes: u64) -> Self {
        Self::WithDuration(Duration::from_seconds(minutes.saturating_mul(60)))
    }

    /// The choices offered to listeners
    pub fn presets() -> [Self; 7] {
        [
            Self::NOW,
            Self::Off,
            Self::minutes(15),
            Self::minutes(30),
            Self::minutes(45),
            Self::minutes(60),
            Self::EndOfChapter,
        ]
    }
}

impl fmt::Display for SleepTimerConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::WithDuration(remaining) => write!(f, "{} left", remaining),
            Self::EndOfChapter => f.write_str("end of chapter"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTimerStatus {
    Running(SleepTimerConfiguration),
    Paused(SleepTimerConfiguration),
    Stopped(SleepTimerConfiguration),
}

impl SleepTimerStatus {
    pub fn configuration(&self) -> SleepTimerConfiguration {
        match self {
            Self::Running(c) | Self::Paused(c) | Self::Stopped(c) => *c,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }

    fn with_configuration(self, configuration: SleepTimerConfiguration) -> Self {
        match self {
            Self::Running(_) => Self::Running(configuration),
            Self::Paused(_) => Self::Paused(configuration),
            Self::Stopped(_) => Self::Stopped(configuration),
        }
    }
}

impl fmt::Display for SleepTimerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running(c) => write!(f, "running ({})", c),
            Self::Paused(c) => write!(f, "paused ({})", c),
            Self::Stopped(c) => write!(f, "stopped ({})", c),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTimerEvent {
    StatusChanged {
        old: SleepTimerStatus,
        new: SleepTimerStatus,
    },
    /// Time to pause playback
    Finished,
}

/// A countdown that only moves while it is running
#[derive(Debug, Clone)]
pub struct SleepTimer {
    status: SleepTimerStatus,
    /// When the remaining time was last brought up to date
    last_tick: Timestamp,
}

impl SleepTimer {
    pub fn new(now: Timestamp) -> Self {
        Self {
            status: SleepTimerStatus::Stopped(SleepTimerConfiguration::Off),
            last_tick: now,
        }
    }

    pub fn status(&self) -> SleepTimerStatus {
        self.status
    }

    pub fn configuration(&self) -> SleepTimerConfiguration {
        self.status.configuration()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Starts counting down with the current configuration
    pub fn start(&mut self, now: Timestamp) -> Vec<SleepTimerEvent> {
        match self.status {
            SleepTimerStatus::Running(_) => Vec::new(),
            SleepTimerStatus::Paused(c) | SleepTimerStatus::Stopped(c) => {
                self.last_tick = now;
                self.change(SleepTimerStatus::Running(c)).into_iter().collect()
            }
        }
    }

    /// Replaces the configuration without starting or stopping the timer
    pub fn configure(
        &mut self,
        configuration: SleepTimerConfiguration,
        now: Timestamp,
    ) -> Vec<SleepTimerEvent> {
        self.last_tick = now;
        let status = self.status.with_configuration(configuration);
        self.change(status).into_iter().collect()
    }

    /// Stops the timer and switches it off
    pub fn cancel(&mut self) -> Vec<SleepTimerEvent> {
        match self.status {
            SleepTimerStatus::Running(_) | SleepTimerStatus::Paused(_) => self
                .change(SleepTimerStatus::Stopped(SleepTimerConfiguration::Off))
                .into_iter()
                .collect(),
            SleepTimerStatus::Stopped(_) => Vec::new(),
        }
    }

    /// Holds the remaining time until [`SleepTimer::unpause`]
    ///
    /// A countdown that ran out before the pause finishes instead.
    pub fn pause(&mut self, now: Timestamp) -> Vec<SleepTimerEvent> {
        let mut events = self.tick(now);
        if events.contains(&SleepTimerEvent::Finished) {
            return events;
        }
        let paused = SleepTimerStatus::Paused(self.configuration());
        events.extend(self.change(paused));
        events
    }

    pub fn unpause(&mut self, now: Timestamp) -> Vec<SleepTimerEvent> {
        match self.status {
            SleepTimerStatus::Paused(c) => {
                self.last_tick = now;
                self.change(SleepTimerStatus::Running(c)).into_iter().collect()
            }
            SleepTimerStatus::Running(_) | SleepTimerStatus::Stopped(_) => Vec::new(),
        }
    }

    /// Finishes right away, whatever the configuration
    pub fn finish(&mut self) -> Vec<SleepTimerEvent> {
        let mut events: Vec<_> = self
            .change(SleepTimerStatus::Stopped(SleepTimerConfiguration::Off))
            .into_iter()
            .collect();
        events.push(SleepTimerEvent::Finished);
        events
    }

    /// Counts the time since the last tick off a running countdown
    pub fn tick(&mut self, now: Timestamp) -> Vec<SleepTimerEvent> {
        let elapsed = now.duration_since(self.last_tick);
        self.last_tick = now;

        let SleepTimerStatus::Running(SleepTimerConfiguration::WithDuration(remaining)) =
            self.status
        else {
            return Vec::new();
        };

        if elapsed >= remaining {
            return self.finish();
        }
        if elapsed.is_zero() {
            return Vec::new();
        }
        let left = SleepTimerConfiguration::WithDuration(remaining.saturating_sub(elapsed));
        self.change(SleepTimerStatus::Running(left))
            .into_iter()
            .collect()
    }

    fn change(&mut self, new: SleepTimerStatus) -> Option<SleepTimerEvent> {
        let old = self.status;
        if old == new {
            return None;
        }
        log::debug!("sleep timer: {} -> {}", old, new);
        self.status = new;
        Some(SleepTimerEvent::StatusChanged { old, new })
    }
}
