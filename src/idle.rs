//! Idle-input watchdog.
//!
//! Warns an inactive user that their session is about to end, then logs
//! them off. Thresholds are read from the settings provider on every poll.
//!
//! Phases:
//! - `Active`: idle time below the warning range
//! - `Warning`: within `warning_minutes` of the timeout, with debounced warnings
//! - `PendingLogoff`: timeout reached, waiting out a short grace window
//! - `LogoffRequested`: log-off issued, nothing more to do while idle

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::config::IdleThresholds;
use crate::config::SettingsProvider;
use crate::domain::Notification;
use crate::platform::IdleSource;
use crate::platform::Notifier;
use crate::platform::SessionControl;
use crate::supervisor::Watchdog;
use crate::timer::ThresholdTimer;

/// How often the idle time is sampled.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Time given to the user to move the mouse after the final warning.
pub const LOGOFF_GRACE: Duration = Duration::from_secs(10);

/// Where the watchdog is in the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePhase {
    Active,
    Warning,
    PendingLogoff { deadline: Instant },
    LogoffRequested,
}

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleCheck {
    /// The watchdog is disabled; nothing was sampled.
    Disabled,
    /// Not idle long enough to warn.
    Active { minutes_until_logoff: i64 },
    /// A countdown warning was shown.
    Warned { minutes_until_logoff: i64 },
    /// In the warning range, but a warning was shown too recently.
    WarningSuppressed { minutes_until_logoff: i64 },
    /// Final warning shown; log-off follows at `deadline` unless input resumes.
    GraceStarted { deadline: Instant },
    /// Polled before the grace window ended.
    GracePending,
    /// The log-off request was issued.
    LogoffRequested,
    /// The log-off request failed; the next poll retries.
    LogoffFailed,
    /// Still idle after a successful log-off request.
    AwaitingLogoff,
}

/// Minutes left before log-off, truncating idle time to whole minutes.
///
/// Saturates instead of overflowing, so a maximal idle time is always `<= 0`.
pub fn minutes_until_logoff(idle_timeout_minutes: u64, idle: Duration) -> i64 {
    let timeout = i64::try_from(idle_timeout_minutes).unwrap_or(i64::MAX);
    let idle_minutes = i64::try_from(idle.as_secs() / 60).unwrap_or(i64::MAX);
    timeout.saturating_sub(idle_minutes)
}

/// Watchdog that logs off an idle session.
pub struct IdleWatchdog {
    timer: ThresholdTimer,
    phase: IdlePhase,
    settings: Arc<dyn SettingsProvider>,
    idle: Arc<dyn IdleSource>,
    session: Arc<dyn SessionControl>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl IdleWatchdog {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        idle: Arc<dyn IdleSource>,
        session: Arc<dyn SessionControl>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            timer: ThresholdTimer::new(IDLE_POLL_INTERVAL),
            phase: IdlePhase::Active,
            settings,
            idle,
            session,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn phase(&self) -> IdlePhase {
        self.phase
    }

    /// Sample the idle time and act on it.
    pub async fn check(&mut self) -> IdleCheck {
        if !self.timer.is_enabled() {
            trace!("Idle watchdog disabled, skipping poll");
            return IdleCheck::Disabled;
        }

        let now = self.clock.now();
        if let IdlePhase::PendingLogoff { deadline } = self.phase
            && now < deadline
        {
            trace!("Grace window still open");
            return IdleCheck::GracePending;
        }

        let thresholds = self.settings.idle_thresholds();
        let idle = self.sample().await;
        let minutes = minutes_until_logoff(thresholds.idle_timeout_minutes, idle);
        debug!(
            "Idle for {:?}, {} minutes until log-off ({:?})",
            idle, minutes, thresholds
        );

        match self.phase {
            IdlePhase::PendingLogoff { .. } => {
                if minutes <= 0 {
                    return self.request_logoff().await;
                }
                info!("Input detected during grace window, log-off cancelled");
            }
            IdlePhase::LogoffRequested => {
                if minutes <= 0 {
                    return IdleCheck::AwaitingLogoff;
                }
                info!("Input resumed after log-off was requested");
            }
            IdlePhase::Active | IdlePhase::Warning => {}
        }

        self.evaluate(now, minutes, &thresholds).await
    }

    /// When the pending grace window ends, if it is still in the future.
    pub fn grace_deadline(&self) -> Option<Instant> {
        match self.phase {
            IdlePhase::PendingLogoff { deadline } if self.clock.now() < deadline => Some(deadline),
            _ => None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.timer.set_enabled(enabled);
        if !enabled {
            self.phase = IdlePhase::Active;
        }
    }

    async fn evaluate(&mut self, now: Instant, minutes: i64, thresholds: &IdleThresholds) -> IdleCheck {
        if minutes <= 0 {
            let deadline = now + LOGOFF_GRACE;
            info!(
                "Idle timeout of {} minutes reached, logging off in {:?} unless input resumes",
                thresholds.idle_timeout_minutes, LOGOFF_GRACE
            );
            self.timer.record_action(now);
            self.show(&Notification::logoff_imminent()).await;
            self.phase = IdlePhase::PendingLogoff { deadline };
            return IdleCheck::GraceStarted { deadline };
        }

        let warning = i64::try_from(thresholds.warning_minutes).unwrap_or(i64::MAX);
        if minutes <= warning {
            self.enter(IdlePhase::Warning);
            if !self.timer.cooldown_elapsed(now, thresholds.warning_repeat()) {
                trace!("Warning shown recently, suppressing");
                return IdleCheck::WarningSuppressed {
                    minutes_until_logoff: minutes,
                };
            }
            self.timer.record_action(now);
            self.show(&Notification::logoff_countdown(minutes)).await;
            return IdleCheck::Warned {
                minutes_until_logoff: minutes,
            };
        }

        // The last-warning timestamp is kept, so a warning shown just before
        // input resumed still counts towards the repeat interval.
        self.enter(IdlePhase::Active);
        IdleCheck::Active {
            minutes_until_logoff: minutes,
        }
    }

    async fn request_logoff(&mut self) -> IdleCheck {
        match self.session.log_off().await {
            Ok(()) => {
                info!("Still idle after grace window, log-off requested");
                self.phase = IdlePhase::LogoffRequested;
                IdleCheck::LogoffRequested
            }
            Err(e) => {
                warn!("Failed to log off session: {}", e);
                IdleCheck::LogoffFailed
            }
        }
    }

    /// Read the idle time. An unreadable signal counts as maximal idle.
    async fn sample(&self) -> Duration {
        match self.idle.idle_time().await {
            Ok(idle) => idle,
            Err(e) => {
                warn!("Failed to read idle time, treating session as idle: {}", e);
                Duration::MAX
            }
        }
    }

    async fn show(&self, notification: &Notification) {
        debug!("Showing notification: {}", notification.body);
        if let Err(e) = self.notifier.notify(notification).await {
            warn!("Failed to show notification: {}", e);
        }
    }

    fn enter(&mut self, phase: IdlePhase) {
        if self.phase != phase {
            debug!("Idle phase: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}

#[async_trait]
impl Watchdog for IdleWatchdog {
    fn name(&self) -> &'static str {
        "idle-input"
    }

    fn interval(&self) -> Duration {
        self.timer.interval()
    }

    async fn poll(&mut self) {
        let outcome = self.check().await;
        trace!("Idle check: {:?}", outcome);
    }

    fn recheck_at(&self) -> Option<Instant> {
        self.grace_deadline()
    }

    fn set_enabled(&mut self, enabled: bool) {
        IdleWatchdog::set_enabled(self, enabled);
    }
}
