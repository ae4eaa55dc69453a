//! Input idle time from the X11 `MIT-SCREEN-SAVER` extension.
//!
//! `ScreenSaverQueryInfo` reports milliseconds since the last keyboard or
//! mouse event on the display. Under a Wayland compositor `$DISPLAY` points
//! at XWayland, which only sees input sent to X11 clients, so the source is
//! not used there.

use std::env;
use std::ffi::OsStr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use x11rb::connection::Connection;
use x11rb::protocol::screensaver::ConnectionExt as _;
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use super::IdleSource;
use super::PlatformError;

/// Idle source backed by an X11 display connection.
pub struct X11IdleSource {
    conn: RustConnection,
    root: Window,
}

impl X11IdleSource {
    /// Connect to `$DISPLAY`.
    ///
    /// Returns `None` in a Wayland session, when no display is configured or
    /// reachable, or when the server lacks the screensaver extension.
    pub fn connect() -> Option<Self> {
        let session_type = env::var("XDG_SESSION_TYPE").ok();
        let wayland_display = env::var_os("WAYLAND_DISPLAY");
        if is_wayland_session(session_type.as_deref(), wayland_display.as_deref()) {
            info!("Wayland session detected, X11 idle time would miss native input");
            return None;
        }

        if env::var_os("DISPLAY").is_none() {
            debug!("DISPLAY not set, X11 idle query unavailable");
            return None;
        }

        let (conn, screen_num) = match x11rb::connect(None) {
            Ok(pair) => pair,
            Err(e) => {
                debug!("Failed to connect to X11 display: {}", e);
                return None;
            }
        };
        let root = conn.setup().roots.get(screen_num)?.root;

        let source = Self { conn, root };
        if let Err(e) = source.query() {
            debug!("X11 screensaver extension unusable: {}", e);
            return None;
        }

        info!("Using X11 screensaver extension for idle time");
        Some(source)
    }

    fn query(&self) -> Result<Duration, PlatformError> {
        let reply = self
            .conn
            .screensaver_query_info(self.root)
            .map_err(|e| PlatformError::Display(e.to_string()))?
            .reply()
            .map_err(|e| PlatformError::Display(e.to_string()))?;
        Ok(Duration::from_millis(u64::from(reply.ms_since_user_input)))
    }
}

/// Whether the session environment describes a Wayland session.
fn is_wayland_session(session_type: Option<&str>, wayland_display: Option<&OsStr>) -> bool {
    session_type.is_some_and(|t| t.eq_ignore_ascii_case("wayland"))
        || wayland_display.is_some_and(|d| !d.is_empty())
}

#[async_trait]
impl IdleSource for X11IdleSource {
    async fn idle_time(&self) -> Result<Duration, PlatformError> {
        self.query()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wayland_session_type_rejects_x11() {
        assert!(is_wayland_session(Some("wayland"), None));
        assert!(is_wayland_session(Some("Wayland"), None));
    }

    #[test]
    fn test_wayland_display_rejects_x11() {
        assert!(is_wayland_session(None, Some(OsStr::new("wayland-0"))));
        assert!(is_wayland_session(Some("x11"), Some(OsStr::new("wayland-0"))));
    }

    #[test]
    fn test_plain_x11_session_allowed() {
        assert!(!is_wayland_session(Some("x11"), None));
        assert!(!is_wayland_session(None, None));
        assert!(!is_wayland_session(Some("tty"), Some(OsStr::new(""))));
    }
}
