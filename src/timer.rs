//! Threshold timer shared by both watchdogs.
//!
//! Turns a periodically sampled condition into elapsed-time bookkeeping:
//! - remembers when the condition was first observed
//! - remembers when an escalation action was last taken, for cooldowns
//!
//! The timer owns no thread. Something else calls into it once per `interval`.

use std::time::Duration;
use std::time::Instant;

use tracing::debug;

/// Polling and debounce state for one watched condition.
#[derive(Debug)]
pub struct ThresholdTimer {
    /// Fixed poll period.
    interval: Duration,

    /// Disabled timers make every poll a no-op.
    enabled: bool,

    /// When the watched condition was first observed; `None` means never.
    first_observed_at: Option<Instant>,

    /// When the last escalation action was taken; `None` means never.
    last_action_at: Option<Instant>,
}

impl ThresholdTimer {
    /// Create an enabled timer with the given poll period.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            enabled: true,
            first_observed_at: None,
            last_action_at: None,
        }
    }

    /// Poll period for the external scheduler.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the timer.
    ///
    /// Any transition clears the bookkeeping so that re-enabling starts a
    /// fresh observation window.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            debug!("Threshold timer enabled: {} -> {}", self.enabled, enabled);
            self.clear();
        }
        self.enabled = enabled;
    }

    pub fn enable(&mut self) {
        self.set_enabled(true);
    }

    pub fn disable(&mut self) {
        self.set_enabled(false);
    }

    /// Record an observation of the watched condition.
    ///
    /// Returns `None` on the first observation, otherwise the time elapsed
    /// since the first one.
    pub fn observe(&mut self, now: Instant) -> Option<Duration> {
        match self.first_observed_at {
            None => {
                self.first_observed_at = Some(now);
                None
            }
            Some(first) => Some(now.saturating_duration_since(first)),
        }
    }

    /// When the condition was first observed, if it is being tracked.
    pub fn first_observed_at(&self) -> Option<Instant> {
        self.first_observed_at
    }

    /// The watched condition cleared.
    pub fn clear(&mut self) {
        self.first_observed_at = None;
        self.last_action_at = None;
    }

    /// Check whether another action may be taken.
    ///
    /// True if no action was ever recorded, or strictly more than `cooldown`
    /// has passed since the last one.
    pub fn cooldown_elapsed(&self, now: Instant, cooldown: Duration) -> bool {
        match self.last_action_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > cooldown,
        }
    }

    /// Record that an action was taken at `now`.
    pub fn record_action(&mut self, now: Instant) {
        self.last_action_at = Some(match self.last_action_at {
            Some(last) if last > now => last,
            _ => now,
        });
    }

    pub fn last_action_at(&self) -> Option<Instant> {
        self.last_action_at
    }
}
