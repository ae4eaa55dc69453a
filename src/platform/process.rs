//! Process-level setup for the watchdog hosts.

use anyhow::Context;
use anyhow::Result;
use tracing::info;
use tracing::warn;
use zbus::Connection;
use zbus::fdo::RequestNameFlags;
use zbus::fdo::RequestNameReply;

/// Nice increment applied to the service process.
pub const BACKGROUND_NICENESS: i32 = 10;

/// Lower the scheduling priority of the current process.
///
/// Failure is logged and otherwise ignored.
pub fn lower_priority() {
    // `None` is the calling process.
    match rustix::process::setpriority_process(None, BACKGROUND_NICENESS) {
        Ok(()) => info!("Process priority lowered (nice {})", BACKGROUND_NICENESS),
        Err(e) => warn!("Failed to lower process priority: {}", e),
    }
}

/// Claim a well-known bus name so that only one instance runs per bus.
///
/// Returns `Ok(false)` when another process already owns the name. The name
/// is held for as long as `conn` stays open.
pub async fn claim_single_instance(conn: &Connection, name: &'static str) -> Result<bool> {
    let reply = conn
        .request_name_with_flags(name, RequestNameFlags::DoNotQueue.into())
        .await;

    match reply {
        Ok(RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner) => {
            info!("Acquired instance name {}", name);
            Ok(true)
        }
        Ok(RequestNameReply::Exists | RequestNameReply::InQueue) | Err(zbus::Error::NameTaken) => {
            Ok(false)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to request bus name {name}")),
    }
}
