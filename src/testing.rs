//! Test doubles for the platform capabilities.

use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::config::FixedSettings;
use crate::config::IdleThresholds;
use crate::config::SettingsProvider;
use crate::domain::Notification;
use crate::platform::IdleSource;
use crate::platform::Notifier;
use crate::platform::PlatformError;
use crate::platform::PowerControl;
use crate::platform::SessionControl;
use crate::platform::UserEnumerator;

fn injected() -> PlatformError {
    PlatformError::Signal("injected failure".to_string())
}

/// Consume one pending failure, if any.
fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub struct FakeIdle {
    idle: Mutex<Duration>,
    fail: AtomicBool,
}

impl FakeIdle {
    pub fn new() -> Self {
        Self {
            idle: Mutex::new(Duration::ZERO),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set(&self, idle: Duration) {
        *self.idle.lock().unwrap() = idle;
    }

    pub fn add(&self, by: Duration) {
        *self.idle.lock().unwrap() += by;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdleSource for FakeIdle {
    async fn idle_time(&self) -> Result<Duration, PlatformError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected());
        }
        Ok(*self.idle.lock().unwrap())
    }
}

pub struct FakeSession {
    requests: AtomicUsize,
    failures: AtomicUsize,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            requests: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Number of log-off attempts, failed ones included.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionControl for FakeSession {
    async fn log_off(&self) -> Result<(), PlatformError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failures) {
            return Err(injected());
        }
        Ok(())
    }
}

pub struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            shown: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn bodies(&self) -> Vec<String> {
        self.shown
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.body.clone())
            .collect()
    }

    pub fn last(&self) -> Option<Notification> {
        self.shown.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), PlatformError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// `None` means the count cannot be read.
pub struct FakeUsers {
    count: Mutex<Option<usize>>,
}

impl FakeUsers {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(Some(count)),
        }
    }

    pub fn set(&self, count: usize) {
        *self.count.lock().unwrap() = Some(count);
    }

    pub fn unavailable(&self) {
        *self.count.lock().unwrap() = None;
    }
}

#[async_trait]
impl UserEnumerator for FakeUsers {
    async fn logged_on_count(&self) -> Result<usize, PlatformError> {
        (*self.count.lock().unwrap()).ok_or_else(injected)
    }
}

pub struct FakePower {
    requests: AtomicUsize,
    failures: AtomicUsize,
}

impl FakePower {
    pub fn new() -> Self {
        Self {
            requests: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl PowerControl for FakePower {
    async fn reboot(&self) -> Result<(), PlatformError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failures) {
            return Err(injected());
        }
        Ok(())
    }
}

/// Settings that a test can change between polls.
pub struct MutableSettings {
    inner: Mutex<FixedSettings>,
}

impl MutableSettings {
    pub fn new(settings: FixedSettings) -> Self {
        Self {
            inner: Mutex::new(settings),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut FixedSettings)) {
        f(&mut self.inner.lock().unwrap());
    }
}

impl SettingsProvider for MutableSettings {
    fn idle_thresholds(&self) -> IdleThresholds {
        self.inner.lock().unwrap().idle_thresholds()
    }

    fn no_logon_threshold(&self) -> Duration {
        self.inner.lock().unwrap().no_logon_threshold()
    }
}

/// Clock that follows tokio time, so it moves with a paused runtime.
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Idle time that grows with tokio time from the moment of creation.
pub struct TokioIdle {
    since: tokio::time::Instant,
}

impl TokioIdle {
    pub fn new() -> Self {
        Self {
            since: tokio::time::Instant::now(),
        }
    }
}

#[async_trait]
impl IdleSource for TokioIdle {
    async fn idle_time(&self) -> Result<Duration, PlatformError> {
        Ok(self.since.elapsed())
    }
}
