//! Playback tasks: a track plus timing and repeat policy

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::track::{Track, TrackNumber};

/// What happens when a track's sequence is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    Once,
    /// Restart the same track from the beginning.
    Loop,
}

/// When a task's timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRule {
    Immediate { delay: Duration },
    At(DateTime<Utc>),
}

impl StartRule {
    /// Time left until the start, zero when already due.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        match self {
            StartRule::Immediate { delay } => *delay,
            StartRule::At(at) => (*at - now).to_std().unwrap_or(Duration::ZERO),
        }
    }
}

impl Default for StartRule {
    fn default() -> Self {
        StartRule::Immediate {
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub track: Track,
    pub repeat: RepeatMode,
    pub start: StartRule,
    /// Track whose `StopPlaying` must be observed before this task starts.
    pub wait_for: Option<TrackNumber>,
    /// Pace messages with the configured interval.
    pub execute_delay: bool,
}

impl Task {
    pub fn new(track: Track) -> Self {
        Self {
            track,
            repeat: RepeatMode::Once,
            start: StartRule::default(),
            wait_for: None,
            execute_delay: false,
        }
    }

    pub fn with_repeat(mut self, repeat: RepeatMode) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_start(mut self, start: StartRule) -> Self {
        self.start = start;
        self
    }

    pub fn waiting_for(mut self, track: TrackNumber) -> Self {
        self.wait_for = Some(track);
        self
    }

    pub fn with_execute_delay(mut self, execute_delay: bool) -> Self {
        self.execute_delay = execute_delay;
        self
    }

    pub fn number(&self) -> TrackNumber {
        self.track.number
    }
}
