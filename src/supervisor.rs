//! Poll loop and start/stop lifecycle for a watchdog.
//!
//! The supervisor owns the only scheduler a watchdog has: a fixed interval
//! plus an optional one-shot re-check the watchdog may ask for.

use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::OptionFuture;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;

/// Something polled on a fixed interval.
#[async_trait]
pub trait Watchdog: Send + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Poll period.
    fn interval(&self) -> Duration;

    /// Run one check. Never fails; problems are logged by the watchdog.
    async fn poll(&mut self);

    /// An extra one-shot poll requested before the next interval tick.
    fn recheck_at(&self) -> Option<Instant> {
        None
    }

    /// Disabled watchdogs treat polls as no-ops.
    fn set_enabled(&mut self, enabled: bool);
}

enum Slot<W> {
    Stopped(W),
    Running {
        cancel: CancellationToken,
        task: JoinHandle<W>,
    },
    /// The poll task panicked and took the watchdog with it.
    Failed,
}

/// Drives a watchdog from a tokio task.
pub struct Supervisor<W: Watchdog> {
    name: &'static str,
    slot: Slot<W>,
}

impl<W: Watchdog> Supervisor<W> {
    pub fn new(watchdog: W) -> Self {
        Self {
            name: watchdog.name(),
            slot: Slot::Stopped(watchdog),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.slot, Slot::Running { .. })
    }

    /// The watchdog, while it is stopped.
    pub fn watchdog(&self) -> Option<&W> {
        match self.slot {
            Slot::Stopped(ref w) => Some(w),
            _ => None,
        }
    }

    /// Start polling. Does nothing if already running.
    pub fn start(&mut self) {
        match std::mem::replace(&mut self.slot, Slot::Failed) {
            Slot::Stopped(mut watchdog) => {
                watchdog.set_enabled(true);
                let cancel = CancellationToken::new();
                let task = tokio::spawn(run(watchdog, cancel.clone()));
                self.slot = Slot::Running { cancel, task };
                info!("{} watchdog started", self.name);
            }
            running @ Slot::Running { .. } => {
                debug!("{} watchdog already running", self.name);
                self.slot = running;
            }
            Slot::Failed => {
                error!("{} watchdog failed earlier and cannot be restarted", self.name);
            }
        }
    }

    /// Stop polling and wait for any in-flight poll to finish.
    ///
    /// Does nothing if already stopped. Once this returns, no poll runs until
    /// `start` is called again.
    pub async fn stop(&mut self) {
        match std::mem::replace(&mut self.slot, Slot::Failed) {
            Slot::Running { cancel, task } => {
                cancel.cancel();
                match task.await {
                    Ok(mut watchdog) => {
                        watchdog.set_enabled(false);
                        self.slot = Slot::Stopped(watchdog);
                        info!("{} watchdog stopped", self.name);
                    }
                    Err(e) => error!("{} watchdog task failed: {}", self.name, e),
                }
            }
            other => self.slot = other,
        }
    }
}

/// Poll until cancelled, then hand the watchdog back.
async fn run<W: Watchdog>(mut watchdog: W, cancel: CancellationToken) -> W {
    let period = watchdog.interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("{} watchdog polling every {:?}", watchdog.name(), period);

    loop {
        let recheck: OptionFuture<_> = watchdog
            .recheck_at()
            .map(|at| tokio::time::sleep_until(tokio::time::Instant::from_std(at)))
            .into();

        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => watchdog.poll().await,
            Some(()) = recheck => {
                debug!("{} watchdog re-check due", watchdog.name());
                watchdog.poll().await;
            }
        }
    }

    watchdog
}
