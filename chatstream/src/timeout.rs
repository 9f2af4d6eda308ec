// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

// Request timeout state machine
//
// Idle -> Armed -> Warned -> Expired, with Cancelled and Completed as the
// other terminal exits. The machine does no I/O and owns no timers: the
// caller asks for `next_deadline()`, sleeps until it, then calls `poll()`.
// Keeping time external makes every transition testable with plain
// `Instant` arithmetic.

use std::fmt;
use tokio::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Deadlines for one request, measured from the last stream activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSettings {
    pub warning: Duration,
    pub hard: Duration,
    /// One-time extension of the hard deadline while artifacts are building.
    pub artifact_grace: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            warning: Duration::from_secs(60),
            hard: Duration::from_secs(120),
            artifact_grace: Duration::from_secs(180),
        }
    }
}

// ---------------------------------------------------------------------------
// States and signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    Idle,
    Armed,
    Warned,
    Expired,
    Cancelled,
    Completed,
}

impl TimeoutState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TimeoutState::Expired | TimeoutState::Cancelled | TimeoutState::Completed
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, TimeoutState::Armed | TimeoutState::Warned)
    }
}

impl fmt::Display for TimeoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeoutState::Idle => "idle",
            TimeoutState::Armed => "armed",
            TimeoutState::Warned => "warned",
            TimeoutState::Expired => "expired",
            TimeoutState::Cancelled => "cancelled",
            TimeoutState::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Side effects the caller must surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSignal {
    /// Show the slow-response advisory. `soft` means artifacts are still
    /// building: show a status update only, with no cancel affordance.
    Warning { soft: bool },
    /// Activity resumed after a warning; hide the advisory.
    WarningCleared,
    /// The hard deadline was pushed back once for in-progress artifacts.
    Extended { grace: Duration },
    /// Abort the transfer and raise a timeout error.
    Expired,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TimeoutStateMachine {
    settings: TimeoutSettings,
    state: TimeoutState,
    request_start: Option<Instant>,
    last_activity: Option<Instant>,
    warning_deadline: Option<Instant>,
    hard_deadline: Option<Instant>,
    warning_fired: bool,
    extended: bool,
}

impl TimeoutStateMachine {
    pub fn new(settings: TimeoutSettings) -> Self {
        Self {
            settings,
            state: TimeoutState::Idle,
            request_start: None,
            last_activity: None,
            warning_deadline: None,
            hard_deadline: None,
            warning_fired: false,
            extended: false,
        }
    }

    pub fn settings(&self) -> TimeoutSettings {
        self.settings
    }

    pub fn state(&self) -> TimeoutState {
        self.state
    }

    pub fn warning_fired(&self) -> bool {
        self.warning_fired
    }

    pub fn request_start(&self) -> Option<Instant> {
        self.request_start
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    /// Arm for a new request. Any previous request's state is discarded.
    pub fn start(&mut self, now: Instant) {
        self.state = TimeoutState::Armed;
        self.request_start = Some(now);
        self.warning_fired = false;
        self.extended = false;
        self.reset_deadlines(now);
    }

    fn reset_deadlines(&mut self, now: Instant) {
        self.last_activity = Some(now);
        self.warning_deadline = Some(now + self.settings.warning);
        self.hard_deadline = Some(now + self.settings.hard);
    }

    fn clear_deadlines(&mut self) {
        self.warning_deadline = None;
        self.hard_deadline = None;
    }

    /// An inbound event restarts both deadlines from `now`.
    ///
    /// Returns `WarningCleared` when this moves the machine out of `Warned`.
    pub fn record_activity(&mut self, now: Instant) -> Option<TimeoutSignal> {
        if !self.state.is_active() {
            return None;
        }
        self.reset_deadlines(now);

        if self.state == TimeoutState::Warned {
            self.state = TimeoutState::Armed;
            self.warning_fired = false;
            return Some(TimeoutSignal::WarningCleared);
        }
        None
    }

    /// The earliest instant at which `poll` could change state.
    /// `None` once the machine is idle or terminal.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            TimeoutState::Armed => match (self.warning_deadline, self.hard_deadline) {
                (Some(w), Some(h)) => Some(w.min(h)),
                (w, h) => w.or(h),
            },
            TimeoutState::Warned => self.hard_deadline,
            _ => None,
        }
    }

    /// Fire whichever deadline has elapsed at `now`.
    ///
    /// The hard deadline takes precedence over the warning when both have
    /// passed. With `has_incomplete_artifacts` set, the first hard expiry of
    /// a request extends the deadline by the grace window instead.
    pub fn poll(&mut self, now: Instant, has_incomplete_artifacts: bool) -> Option<TimeoutSignal> {
        if !self.state.is_active() {
            return None;
        }

        if self.hard_deadline.is_some_and(|hard| now >= hard) {
            if has_incomplete_artifacts && !self.extended {
                self.extended = true;
                self.hard_deadline = Some(now + self.settings.artifact_grace);
                return Some(TimeoutSignal::Extended {
                    grace: self.settings.artifact_grace,
                });
            }
            self.state = TimeoutState::Expired;
            self.clear_deadlines();
            return Some(TimeoutSignal::Expired);
        }

        if self.state == TimeoutState::Armed
            && self.warning_deadline.is_some_and(|warning| now >= warning)
        {
            self.state = TimeoutState::Warned;
            self.warning_fired = true;
            self.warning_deadline = None;
            return Some(TimeoutSignal::Warning {
                soft: has_incomplete_artifacts,
            });
        }

        None
    }

    /// User cancellation. Returns false if the request had already ended.
    pub fn cancel(&mut self) -> bool {
        self.finish_with(TimeoutState::Cancelled)
    }

    /// Completion or end of stream. Returns false if already ended.
    pub fn complete(&mut self) -> bool {
        self.finish_with(TimeoutState::Completed)
    }

    fn finish_with(&mut self, terminal: TimeoutState) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = terminal;
        self.clear_deadlines();
        true
    }
}

impl Default for TimeoutStateMachine {
    fn default() -> Self {
        Self::new(TimeoutSettings::default())
    }
}
