use crate::domain::models::TimerDurations;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerMode {
    Work,
    ShortBreak,
    LongBreak,
}

impl TimerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::ShortBreak => "shortBreak",
            Self::LongBreak => "longBreak",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Work => "Work",
            Self::ShortBreak => "Short Break",
            Self::LongBreak => "Long Break",
        }
    }

    pub fn duration_in(self, durations: &TimerDurations) -> u32 {
        match self {
            Self::Work => durations.work_duration,
            Self::ShortBreak => durations.short_break_duration,
            Self::LongBreak => durations.long_break_duration,
        }
    }
}

/// Emitted when a countdown reaches zero.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ModeCompletion {
    pub finished: TimerMode,
    pub next: TimerMode,
    pub completed_sessions: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimerSnapshot {
    pub mode: TimerMode,
    pub mode_label: String,
    pub is_active: bool,
    pub remaining_seconds: u32,
    pub total_seconds: u32,
    pub display: String,
    pub progress_percent: f32,
    pub completed_sessions: u32,
}

/// Three-mode pomodoro countdown. Pure state: the one-second cadence is
/// driven from outside by calling [`PomodoroTimer::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PomodoroTimer {
    mode: TimerMode,
    is_active: bool,
    remaining_seconds: u32,
    completed_sessions: u32,
    durations: TimerDurations,
}

impl Default for PomodoroTimer {
    fn default() -> Self {
        Self::new(TimerDurations::default())
    }
}

impl PomodoroTimer {
    pub fn new(durations: TimerDurations) -> Self {
        Self {
            mode: TimerMode::Work,
            is_active: false,
            remaining_seconds: durations.work_duration,
            completed_sessions: 0,
            durations,
        }
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn completed_sessions(&self) -> u32 {
        self.completed_sessions
    }

    pub fn durations(&self) -> TimerDurations {
        self.durations
    }

    pub fn total_seconds(&self) -> u32 {
        self.mode.duration_in(&self.durations)
    }

    /// Flips between running and paused; returns the new running flag.
    pub fn toggle(&mut self) -> bool {
        self.is_active = !self.is_active;
        self.is_active
    }

    /// Stops the countdown and re-seeds the current mode; the mode is kept.
    pub fn reset(&mut self) {
        self.is_active = false;
        self.remaining_seconds = self.total_seconds();
    }

    /// A running countdown keeps its remaining time; only later mode entries
    /// pick up the new durations.
    pub fn apply_settings(&mut self, durations: TimerDurations) {
        self.durations = durations;
        if !self.is_active {
            self.remaining_seconds = self.total_seconds();
        }
    }

    /// Advances one second. Inactive timers ignore the tick.
    pub fn tick(&mut self) -> Option<ModeCompletion> {
        if !self.is_active {
            return None;
        }
        if self.remaining_seconds <= 1 {
            self.remaining_seconds = 0;
            return Some(self.complete());
        }
        self.remaining_seconds -= 1;
        None
    }

    fn complete(&mut self) -> ModeCompletion {
        let finished = self.mode;
        let next = match finished {
            TimerMode::Work => {
                self.completed_sessions = self.completed_sessions.saturating_add(1);
                let threshold = self.durations.sessions_until_long_break.max(1);
                if self.completed_sessions % threshold == 0 {
                    TimerMode::LongBreak
                } else {
                    TimerMode::ShortBreak
                }
            }
            TimerMode::ShortBreak | TimerMode::LongBreak => TimerMode::Work,
        };

        self.is_active = false;
        self.mode = next;
        self.remaining_seconds = self.total_seconds();

        ModeCompletion {
            finished,
            next,
            completed_sessions: self.completed_sessions,
        }
    }

    pub fn progress_percent(&self) -> f32 {
        let total = self.total_seconds();
        if total == 0 {
            return 0.0;
        }
        let elapsed = total.saturating_sub(self.remaining_seconds);
        elapsed as f32 / total as f32 * 100.0
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            mode: self.mode,
            mode_label: self.mode.label().to_string(),
            is_active: self.is_active,
            remaining_seconds: self.remaining_seconds,
            total_seconds: self.total_seconds(),
            display: format_clock(self.remaining_seconds),
            progress_percent: self.progress_percent(),
            completed_sessions: self.completed_sessions,
        }
    }
}

/// `MM:SS`; minutes are not capped at 59.
pub fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
