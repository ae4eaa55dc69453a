//! Platform capabilities consumed by the watchdogs.
//!
//! Each capability is a narrow async trait so the watchdog core stays
//! platform-agnostic. Linux bindings live in the submodules.

pub mod dry_run;
pub mod logind;
pub mod notify;
pub mod process;
pub mod x11;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::domain::Notification;

pub use dry_run::DryRunPower;
pub use dry_run::DryRunSession;
pub use logind::Logind;
pub use notify::DesktopNotifier;
pub use x11::X11IdleSource;

/// Elapsed time since the last keyboard or mouse input in this session.
#[async_trait]
pub trait IdleSource: Send + Sync {
    async fn idle_time(&self) -> Result<Duration, PlatformError>;
}

/// Control over the caller's interactive session.
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Request termination of the current session without waiting for it.
    async fn log_off(&self) -> Result<(), PlatformError>;
}

/// Enumeration of logged-on principals.
#[async_trait]
pub trait UserEnumerator: Send + Sync {
    /// Number of distinct users logged on across all sessions.
    async fn logged_on_count(&self) -> Result<usize, PlatformError>;
}

/// Host power control.
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Request an immediate reboot without waiting for it.
    async fn reboot(&self) -> Result<(), PlatformError>;
}

/// Surface for transient user-facing messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), PlatformError>;
}

/// Errors from platform bindings.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("D-Bus call failed: {0}")]
    Bus(#[from] zbus::Error),

    #[error("X11 request failed: {0}")]
    Display(String),

    #[error("Unexpected reply: {0}")]
    Signal(String),

    #[error("Not supported: {0}")]
    Unsupported(String),
}

/// Idle source that tries X11 first and falls back to logind.
pub struct FallbackIdleSource {
    primary: Option<X11IdleSource>,
    fallback: Arc<Logind>,
}

impl FallbackIdleSource {
    pub fn new(primary: Option<X11IdleSource>, fallback: Arc<Logind>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl IdleSource for FallbackIdleSource {
    async fn idle_time(&self) -> Result<Duration, PlatformError> {
        if let Some(ref x11) = self.primary {
            match x11.idle_time().await {
                Ok(idle) => return Ok(idle),
                Err(e) => warn!("X11 idle query failed, asking logind: {}", e),
            }
        }
        let idle = self.fallback.idle_time().await?;
        debug!("logind idle time: {:?}", idle);
        Ok(idle)
    }
}
