//! Terminal actions that only log what they would do.

use async_trait::async_trait;
use tracing::info;

use super::PlatformError;
use super::PowerControl;
use super::SessionControl;

/// Session control for `--dry-run`.
#[derive(Debug, Default)]
pub struct DryRunSession;

#[async_trait]
impl SessionControl for DryRunSession {
    async fn log_off(&self) -> Result<(), PlatformError> {
        info!("[DRY RUN] Would log off the current session");
        Ok(())
    }
}

/// Power control for `--dry-run`.
#[derive(Debug, Default)]
pub struct DryRunPower;

#[async_trait]
impl PowerControl for DryRunPower {
    async fn reboot(&self) -> Result<(), PlatformError> {
        info!("[DRY RUN] Would reboot {}", gethostname::gethostname().to_string_lossy());
        Ok(())
    }
}
