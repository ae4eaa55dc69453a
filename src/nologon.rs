//! No-logon watchdog.
//!
//! Reboots the machine once nobody has been logged on for the configured
//! number of minutes. A user logging on at any point resets the countdown.

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
use crate::config::SettingsProvider;
use crate::platform::PowerControl;
use crate::platform::UserEnumerator;
use crate::supervisor::Watchdog;
use crate::timer::ThresholdTimer;

/// How often the logged-on user count is sampled.
pub const NO_LOGON_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Minimum gap between two successful reboot requests.
pub const REBOOT_REISSUE_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonCheck {
    /// The watchdog is disabled; nothing was sampled.
    Disabled,
    /// The user count could not be read; nothing changed.
    Unavailable,
    /// At least one user is logged on.
    UsersPresent { count: usize },
    /// Nobody is logged on, noticed for the first time.
    FirstNoticedEmpty,
    /// Nobody logged on, threshold not reached yet.
    Waiting { elapsed: Duration },
    /// Threshold reached and the reboot was requested.
    RebootRequested { elapsed: Duration },
    /// Threshold reached but a reboot was requested recently.
    RebootPending,
    /// The reboot request failed; the next poll retries.
    RebootFailed,
}

/// Watchdog that reboots a machine nobody is using.
pub struct NoLogonWatchdog {
    timer: ThresholdTimer,
    settings: Arc<dyn SettingsProvider>,
    users: Arc<dyn UserEnumerator>,
    power: Arc<dyn PowerControl>,
    clock: Arc<dyn Clock>,
}

impl NoLogonWatchdog {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        users: Arc<dyn UserEnumerator>,
        power: Arc<dyn PowerControl>,
    ) -> Self {
        Self {
            timer: ThresholdTimer::new(NO_LOGON_POLL_INTERVAL),
            settings,
            users,
            power,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// When the machine was first noticed empty, if it still is.
    pub fn first_noticed_empty_at(&self) -> Option<Instant> {
        self.timer.first_observed_at()
    }

    /// Sample the user count and act on it.
    pub async fn check(&mut self) -> LogonCheck {
        if !self.timer.is_enabled() {
            trace!("No-logon watchdog disabled, skipping poll");
            return LogonCheck::Disabled;
        }

        // An unreadable count is never mistaken for an empty machine.
        let count = match self.users.logged_on_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count logged-on users, skipping this check: {}", e);
                return LogonCheck::Unavailable;
            }
        };
        let now = self.clock.now();

        if count > 0 {
            if self.timer.first_observed_at().is_some() {
                info!("{} user(s) logged on, reboot countdown cancelled", count);
            }
            self.timer.clear();
            return LogonCheck::UsersPresent { count };
        }

        let threshold = self.settings.no_logon_threshold();
        debug!("No user logon threshold = {:?}", threshold);

        let Some(elapsed) = self.timer.observe(now) else {
            info!("No one is logged on to this computer.");
            return LogonCheck::FirstNoticedEmpty;
        };
        debug!("Nobody logged on for {:.2} minutes", minutes(elapsed));

        if elapsed < threshold {
            return LogonCheck::Waiting { elapsed };
        }

        if !self.timer.cooldown_elapsed(now, REBOOT_REISSUE_COOLDOWN) {
            debug!("Reboot already requested, waiting for it to happen");
            return LogonCheck::RebootPending;
        }

        info!(
            "No users have been logged on to {} for {:.2} minutes. Rebooting.",
            gethostname::gethostname().to_string_lossy(),
            minutes(elapsed)
        );
        match self.power.reboot().await {
            Ok(()) => {
                self.timer.record_action(now);
                LogonCheck::RebootRequested { elapsed }
            }
            Err(e) => {
                warn!("Failed to request reboot: {}", e);
                LogonCheck::RebootFailed
            }
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.timer.set_enabled(enabled);
    }
}

#[async_trait]
impl Watchdog for NoLogonWatchdog {
    fn name(&self) -> &'static str {
        "no-logon"
    }

    fn interval(&self) -> Duration {
        self.timer.interval()
    }

    async fn poll(&mut self) {
        let outcome = self.check().await;
        trace!("Logon check: {:?}", outcome);
    }

    fn set_enabled(&mut self, enabled: bool) {
        NoLogonWatchdog::set_enabled(self, enabled);
    }
}

fn minutes(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::FixedSettings;
    use crate::testing::FakePower;
    use crate::testing::FakeUsers;

    struct Harness {
        watchdog: NoLogonWatchdog,
        clock: Arc<ManualClock>,
        users: Arc<FakeUsers>,
        power: Arc<FakePower>,
    }

    impl Harness {
        fn new(threshold_minutes: u64, users: usize) -> Self {
            let settings = FixedSettings {
                no_logon_threshold_minutes: threshold_minutes,
                ..Default::default()
            };
            let clock = Arc::new(ManualClock::new());
            let users = Arc::new(FakeUsers::new(users));
            let power = Arc::new(FakePower::new());
            let watchdog = NoLogonWatchdog::new(Arc::new(settings), users.clone(), power.clone())
                .with_clock(clock.clone());
            Self {
                watchdog,
                clock,
                users,
                power,
            }
        }

        async fn tick(&mut self) -> LogonCheck {
            self.clock.advance(NO_LOGON_POLL_INTERVAL);
            self.watchdog.check().await
        }
    }

    #[tokio::test]
    async fn test_users_present_never_reboots() {
        let mut h = Harness::new(2, 1);
        for _ in 0..100 {
            assert_eq!(h.tick().await, LogonCheck::UsersPresent { count: 1 });
        }
        assert_eq!(h.power.requests(), 0);
        assert_eq!(h.watchdog.first_noticed_empty_at(), None);
    }

    #[tokio::test]
    async fn test_reboot_at_threshold_not_before() {
        let mut h = Harness::new(2, 0);

        assert_eq!(h.watchdog.check().await, LogonCheck::FirstNoticedEmpty);
        let first = h.watchdog.first_noticed_empty_at().unwrap();

        // 15 s polls: 105 s is the last poll before two minutes.
        for _ in 0..7 {
            assert!(matches!(h.tick().await, LogonCheck::Waiting { .. }));
        }
        assert_eq!(h.power.requests(), 0);

        assert_eq!(
            h.tick().await,
            LogonCheck::RebootRequested {
                elapsed: Duration::from_secs(120)
            }
        );
        assert_eq!(h.power.requests(), 1);
        assert_eq!(h.watchdog.first_noticed_empty_at(), Some(first));
    }

    #[tokio::test]
    async fn test_duplicate_reboot_requests_are_suppressed() {
        let mut h = Harness::new(0, 0);
        h.watchdog.check().await;
        assert!(matches!(h.tick().await, LogonCheck::RebootRequested { .. }));

        // Twenty polls is exactly five minutes, still inside the cooldown.
        for _ in 0..20 {
            assert_eq!(h.tick().await, LogonCheck::RebootPending);
        }
        assert_eq!(h.power.requests(), 1);

        assert!(matches!(h.tick().await, LogonCheck::RebootRequested { .. }));
        assert_eq!(h.power.requests(), 2);
    }

    #[tokio::test]
    async fn test_failed_reboot_is_retried_next_poll() {
        let mut h = Harness::new(0, 0);
        h.power.fail_next(1);
        h.watchdog.check().await;

        assert_eq!(h.tick().await, LogonCheck::RebootFailed);
        assert!(matches!(h.tick().await, LogonCheck::RebootRequested { .. }));
        assert_eq!(h.power.requests(), 2);
    }

    #[tokio::test]
    async fn test_logon_resets_countdown() {
        let mut h = Harness::new(2, 0);
        h.watchdog.check().await;
        for _ in 0..6 {
            h.tick().await;
        }

        // Someone logs on and off again before the threshold.
        h.users.set(1);
        assert_eq!(h.tick().await, LogonCheck::UsersPresent { count: 1 });
        assert_eq!(h.watchdog.first_noticed_empty_at(), None);

        h.users.set(0);
        assert_eq!(h.tick().await, LogonCheck::FirstNoticedEmpty);
        for _ in 0..7 {
            assert!(matches!(h.tick().await, LogonCheck::Waiting { .. }));
        }
        assert_eq!(h.power.requests(), 0);
        assert!(matches!(h.tick().await, LogonCheck::RebootRequested { .. }));
    }

    #[tokio::test]
    async fn test_unreadable_count_does_not_trigger() {
        let mut h = Harness::new(0, 0);
        h.users.unavailable();

        for _ in 0..10 {
            assert_eq!(h.tick().await, LogonCheck::Unavailable);
        }
        assert_eq!(h.power.requests(), 0);
        assert_eq!(h.watchdog.first_noticed_empty_at(), None);
    }

    #[tokio::test]
    async fn test_unreadable_count_keeps_running_countdown() {
        let mut h = Harness::new(2, 0);
        h.watchdog.check().await;
        let first = h.watchdog.first_noticed_empty_at();

        h.users.unavailable();
        assert_eq!(h.tick().await, LogonCheck::Unavailable);
        assert_eq!(h.watchdog.first_noticed_empty_at(), first);
    }

    #[tokio::test]
    async fn test_disable_starts_fresh_window() {
        let mut h = Harness::new(2, 0);
        h.watchdog.check().await;
        for _ in 0..7 {
            h.tick().await;
        }

        h.watchdog.set_enabled(false);
        assert_eq!(h.tick().await, LogonCheck::Disabled);

        h.watchdog.set_enabled(true);
        assert_eq!(h.tick().await, LogonCheck::FirstNoticedEmpty);
        assert_eq!(h.power.requests(), 0);
    }
}
