//! Desktop notifications via `org.freedesktop.Notifications`.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::trace;
use zbus::Connection;
use zbus::zvariant::Value;

use super::Notifier;
use super::PlatformError;
use crate::domain::Notification;
use crate::domain::Severity;

const NOTIFICATIONS_SERVICE: &str = "org.freedesktop.Notifications";
const NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";
const NOTIFICATIONS_INTERFACE: &str = "org.freedesktop.Notifications";

/// Application name reported to the notification server.
const APP_NAME: &str = "kiosk-watchdog";

/// How long a notification stays on screen, in milliseconds.
const EXPIRE_TIMEOUT_MS: i32 = 10_000;

/// Notifier talking to the session's notification server.
pub struct DesktopNotifier {
    conn: Connection,
}

impl DesktopNotifier {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), PlatformError> {
        let proxy = zbus::Proxy::new(
            &self.conn,
            NOTIFICATIONS_SERVICE,
            NOTIFICATIONS_PATH,
            NOTIFICATIONS_INTERFACE,
        )
        .await?;

        let icon = match notification.severity {
            Severity::Info => "dialog-information",
            Severity::Warning => "dialog-warning",
        };
        let actions: Vec<&str> = Vec::new();
        let mut hints: HashMap<&str, Value<'_>> = HashMap::new();
        hints.insert("urgency", Value::from(notification.severity.urgency()));

        let id: u32 = proxy
            .call(
                "Notify",
                &(
                    APP_NAME,
                    0u32,
                    icon,
                    notification.summary.as_str(),
                    notification.body.as_str(),
                    actions,
                    hints,
                    EXPIRE_TIMEOUT_MS,
                ),
            )
            .await?;

        trace!("Notification {} shown: {}", id, notification.body);
        Ok(())
    }
}
