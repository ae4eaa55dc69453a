//! Domain types shared by the watchdogs and the platform bindings.

/// Title shown on every notification.
pub const NOTIFICATION_SUMMARY: &str = "Idle Monitor";

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    #[default]
    Info,
    Warning,
}

impl Severity {
    /// Freedesktop urgency level (`0` low, `1` normal, `2` critical).
    pub fn urgency(self) -> u8 {
        match self {
            Self::Info => 1,
            Self::Warning => 2,
        }
    }
}

/// A transient, user-dismissible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub summary: String,
    pub body: String,
    pub severity: Severity,
}

impl Notification {
    /// Create a notification with the standard summary.
    pub fn new(body: impl Into<String>, severity: Severity) -> Self {
        Self {
            summary: NOTIFICATION_SUMMARY.to_string(),
            body: body.into(),
            severity,
        }
    }

    /// Warning shown while the log-off countdown is running.
    pub fn logoff_countdown(minutes_remaining: i64) -> Self {
        Self::new(
            format!(
                "You will be logged off in {} {}, unless you move the mouse or press a key.",
                minutes_remaining,
                plural_minutes(minutes_remaining)
            ),
            Severity::Info,
        )
    }

    /// Last warning before the grace window expires.
    pub fn logoff_imminent() -> Self {
        Self::new(
            "You are about to be logged off, unless you move the mouse or press a key.",
            Severity::Warning,
        )
    }
}

/// "minute" for exactly one, "minutes" for everything else.
pub fn plural_minutes(count: i64) -> &'static str {
    if count == 1 { "minute" } else { "minutes" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural_minutes() {
        assert_eq!(plural_minutes(1), "minute");
        assert_eq!(plural_minutes(0), "minutes");
        assert_eq!(plural_minutes(2), "minutes");
        assert_eq!(plural_minutes(15), "minutes");
        assert_eq!(plural_minutes(-1), "minutes");
    }

    #[test]
    fn test_countdown_text() {
        let single = Notification::logoff_countdown(1);
        assert_eq!(
            single.body,
            "You will be logged off in 1 minute, unless you move the mouse or press a key."
        );
        assert_eq!(single.severity, Severity::Info);
        assert_eq!(single.summary, NOTIFICATION_SUMMARY);

        let many = Notification::logoff_countdown(12);
        assert_eq!(
            many.body,
            "You will be logged off in 12 minutes, unless you move the mouse or press a key."
        );
    }

    #[test]
    fn test_imminent_is_warning() {
        let note = Notification::logoff_imminent();
        assert_eq!(note.severity, Severity::Warning);
        assert!(note.body.contains("about to be logged off"));
    }

    #[test]
    fn test_urgency_levels() {
        assert_eq!(Severity::Info.urgency(), 1);
        assert_eq!(Severity::Warning.urgency(), 2);
    }
}
