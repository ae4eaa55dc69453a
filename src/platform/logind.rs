//! systemd-logind binding over the system `DBus`.
//!
//! Provides idle hints, session termination, user enumeration and reboot.
//!
//! `IdleSinceHint` marks when the session's `IdleHint` last flipped, which
//! the desktop does only after its own idle delay (commonly five minutes).
//! Idle time read here therefore lags real input inactivity by that delay.

use std::collections::HashSet;
use std::env;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use tracing::trace;
use zbus::Connection;
use zbus::zvariant::OwnedObjectPath;
use zbus::zvariant::OwnedValue;

use super::IdleSource;
use super::PlatformError;
use super::PowerControl;
use super::SessionControl;
use super::UserEnumerator;

/// `DBus` service and path for login1.
const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// One entry of `Manager.ListSessions`: id, uid, user name, seat, path.
type SessionEntry = (String, u32, String, String, OwnedObjectPath);

/// Handle on logind.
pub struct Logind {
    conn: Connection,

    /// Object path of the caller's session, when running inside one.
    session_path: Option<String>,
}

impl Logind {
    /// Connect to logind without resolving a session (service use).
    pub async fn connect() -> anyhow::Result<Self> {
        let conn = Connection::system()
            .await
            .context("Failed to connect to system DBus")?;
        Ok(Self {
            conn,
            session_path: None,
        })
    }

    /// Connect to logind and resolve the caller's session (session use).
    pub async fn connect_session() -> anyhow::Result<Self> {
        let mut logind = Self::connect().await?;
        let path = resolve_session_path(&logind.conn).await?;
        info!("Resolved session path: {}", path);
        logind.session_path = Some(path);
        Ok(logind)
    }

    fn session_path(&self) -> Result<&str, PlatformError> {
        self.session_path
            .as_deref()
            .ok_or_else(|| PlatformError::Unsupported("no logind session resolved".to_string()))
    }

    async fn manager(&self) -> Result<zbus::Proxy<'_>, PlatformError> {
        Ok(zbus::Proxy::new(&self.conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE).await?)
    }

    /// List sessions and count the users that are really logged on.
    async fn count_users(&self) -> Result<usize, PlatformError> {
        let sessions: Vec<SessionEntry> = self.manager().await?.call("ListSessions", &()).await?;

        let mut described = Vec::with_capacity(sessions.len());
        for (id, uid, name, _seat, path) in sessions {
            let class: String = get_property(&self.conn, path.as_str(), "Class").await?;
            let state: String = get_property(&self.conn, path.as_str(), "State").await?;
            trace!(
                "Session {}: user={} uid={} class={} state={}",
                id, name, uid, class, state
            );
            described.push((uid, class, state));
        }
        Ok(count_logged_on(described))
    }
}

/// Count distinct users from `(uid, class, state)` session descriptions.
///
/// Only `user`-class sessions count, so greeter, lock-screen and background
/// sessions are ignored, as are sessions left `closing` after their user
/// logged out.
pub fn count_logged_on(sessions: impl IntoIterator<Item = (u32, String, String)>) -> usize {
    sessions
        .into_iter()
        .filter(|(_, class, state)| class == "user" && state != "closing")
        .map(|(uid, _, _)| uid)
        .collect::<HashSet<_>>()
        .len()
}

#[async_trait]
impl IdleSource for Logind {
    async fn idle_time(&self) -> Result<Duration, PlatformError> {
        let path = self.session_path()?;

        let idle: bool = get_property(&self.conn, path, "IdleHint").await?;
        if !idle {
            return Ok(Duration::ZERO);
        }

        // Microseconds since the epoch at which IdleHint last changed.
        let since_us: u64 = get_property(&self.conn, path, "IdleSinceHint").await?;
        elapsed_since_hint(since_us, SystemTime::now())
    }
}

/// Time elapsed at `now` since an `IdleSinceHint` value.
fn elapsed_since_hint(since_us: u64, now: SystemTime) -> Result<Duration, PlatformError> {
    if since_us == 0 {
        return Err(PlatformError::Signal("IdleSinceHint is unset".to_string()));
    }
    let since = UNIX_EPOCH + Duration::from_micros(since_us);
    Ok(now.duration_since(since).unwrap_or(Duration::ZERO))
}

#[async_trait]
impl SessionControl for Logind {
    async fn log_off(&self) -> Result<(), PlatformError> {
        let path = self.session_path()?;
        let proxy = zbus::Proxy::new(&self.conn, LOGIND_SERVICE, path, SESSION_INTERFACE).await?;
        proxy.call::<_, _, ()>("Terminate", &()).await?;
        Ok(())
    }
}

#[async_trait]
impl UserEnumerator for Logind {
    async fn logged_on_count(&self) -> Result<usize, PlatformError> {
        self.count_users().await
    }
}

#[async_trait]
impl PowerControl for Logind {
    async fn reboot(&self) -> Result<(), PlatformError> {
        // interactive=false: never prompt for authorization.
        self.manager()
            .await?
            .call::<_, _, ()>("Reboot", &(false,))
            .await?;
        Ok(())
    }
}

/// Resolve the session object path for the current session.
async fn resolve_session_path(conn: &Connection) -> anyhow::Result<String> {
    if let Ok(session_id) = env::var("XDG_SESSION_ID") {
        debug!("Using XDG_SESSION_ID: {}", session_id);

        let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE)
            .await
            .context("Failed to create Manager proxy")?;

        let path: OwnedObjectPath = proxy
            .call("GetSession", &(&session_id,))
            .await
            .context("GetSession call failed")?;

        return Ok(path.to_string());
    }

    debug!("XDG_SESSION_ID not set, trying the caller's session");

    for alias in ["self", "auto"] {
        let path = format!("{LOGIND_PATH}/session/{alias}");
        if get_property::<bool>(conn, &path, "IdleHint").await.is_ok() {
            return Ok(path);
        }
    }

    anyhow::bail!(
        "Could not resolve session path. Set XDG_SESSION_ID or ensure logind session is available."
    )
}

/// Read a property from a session object.
async fn get_property<T>(conn: &Connection, session_path: &str, name: &str) -> Result<T, PlatformError>
where
    T: TryFrom<OwnedValue>,
{
    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, session_path, PROPERTIES_INTERFACE).await?;

    let value: OwnedValue = proxy.call("Get", &(SESSION_INTERFACE, name)).await?;

    T::try_from(value)
        .map_err(|_| PlatformError::Signal(format!("{name} has an unexpected type")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(uid: u32, class: &str, state: &str) -> (u32, String, String) {
        (uid, class.to_string(), state.to_string())
    }

    #[test]
    fn test_same_user_in_two_sessions_counts_once() {
        let sessions = vec![
            session(1000, "user", "active"),
            session(1000, "user", "online"),
        ];
        assert_eq!(count_logged_on(sessions), 1);
    }

    #[test]
    fn test_distinct_users_are_counted() {
        let sessions = vec![
            session(1000, "user", "active"),
            session(1001, "user", "online"),
        ];
        assert_eq!(count_logged_on(sessions), 2);
    }

    #[test]
    fn test_greeter_and_background_sessions_ignored() {
        let sessions = vec![
            session(120, "greeter", "online"),
            session(1000, "background", "online"),
            session(1001, "lock-screen", "active"),
        ];
        assert_eq!(count_logged_on(sessions), 0);
    }

    #[test]
    fn test_closing_session_ignored() {
        let sessions = vec![
            session(1000, "user", "closing"),
            session(1001, "user", "active"),
        ];
        assert_eq!(count_logged_on(sessions), 1);

        assert_eq!(count_logged_on(vec![session(1000, "user", "closing")]), 0);
    }

    #[test]
    fn test_no_sessions() {
        assert_eq!(count_logged_on(Vec::new()), 0);
    }

    #[test]
    fn test_idle_since_hint_elapsed() {
        let since_us = 1_700_000_000_000_000;
        let now = UNIX_EPOCH + Duration::from_micros(since_us) + Duration::from_secs(90);
        assert_eq!(
            elapsed_since_hint(since_us, now).unwrap(),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_idle_since_hint_unset_or_ahead() {
        assert!(elapsed_since_hint(0, SystemTime::now()).is_err());

        // A hint in the future (clock step) reads as zero idle.
        let since_us = 1_700_000_000_000_000;
        let earlier = UNIX_EPOCH + Duration::from_micros(since_us) - Duration::from_secs(5);
        assert_eq!(elapsed_since_hint(since_us, earlier).unwrap(), Duration::ZERO);
    }
}
