//! Layered configuration for kiosk-watchdog.
//!
//! Every setting is a number of minutes and is resolved from two TOML files:
//! a machine-wide policy file that always wins, and a preference file that
//! users may edit. If neither file sets a value, the compiled default is used.
//! Files are read again on every lookup so edits apply within one poll.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use tracing::trace;
use tracing::warn;

/// Machine-wide policy file.
pub const DEFAULT_POLICY_PATH: &str = "/etc/kiosk-watchdog/policy.toml";

/// A minute-valued setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum SettingKey {
    /// Minutes of inactivity before the session is logged off.
    IdleTimeout,
    /// Minutes before log-off at which warnings start.
    Warning,
    /// Minimum minutes between two warnings.
    WarningRepeat,
    /// Minutes with nobody logged on before the machine reboots.
    NoUserLogonThreshold,
}

impl SettingKey {
    pub const ALL: [SettingKey; 4] = [
        Self::IdleTimeout,
        Self::Warning,
        Self::WarningRepeat,
        Self::NoUserLogonThreshold,
    ];

    /// Key used in the TOML files.
    pub fn toml_key(self) -> &'static str {
        match self {
            Self::IdleTimeout => "idle_timeout_minutes",
            Self::Warning => "warning_minutes",
            Self::WarningRepeat => "warning_repeat_minutes",
            Self::NoUserLogonThreshold => "no_user_logon_threshold_minutes",
        }
    }

    /// Compiled default. Debug builds use short timeouts for manual testing.
    pub fn default_minutes(self) -> u64 {
        let debug = cfg!(debug_assertions);
        match self {
            Self::IdleTimeout => {
                if debug {
                    5
                } else {
                    60
                }
            }
            Self::Warning => {
                if debug {
                    3
                } else {
                    15
                }
            }
            Self::WarningRepeat => {
                if debug {
                    1
                } else {
                    5
                }
            }
            Self::NoUserLogonThreshold => 2,
        }
    }

    /// Smallest value accepted when writing a preference.
    fn minimum_minutes(self) -> u64 {
        match self {
            Self::NoUserLogonThreshold => self.default_minutes(),
            _ => 0,
        }
    }
}

/// Where an effective value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Policy,
    Preference,
    Default,
}

/// An effective setting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub minutes: u64,
    pub tier: Tier,
}

/// Pick the effective value: policy, then preference, then default.
pub fn resolve(policy: Option<u64>, preference: Option<u64>, default: u64) -> Resolved {
    match (policy, preference) {
        (Some(minutes), _) => Resolved {
            minutes,
            tier: Tier::Policy,
        },
        (None, Some(minutes)) => Resolved {
            minutes,
            tier: Tier::Preference,
        },
        (None, None) => Resolved {
            minutes: default,
            tier: Tier::Default,
        },
    }
}

/// Values present in one configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsLayer {
    pub idle_timeout_minutes: Option<u64>,
    pub warning_minutes: Option<u64>,
    pub warning_repeat_minutes: Option<u64>,
    pub no_user_logon_threshold_minutes: Option<u64>,
}

impl SettingsLayer {
    /// Parse a layer from TOML.
    ///
    /// Keys are validated one at a time: a key holding anything other than a
    /// non-negative integer is logged and ignored, the rest still apply.
    pub fn from_toml(content: &str, origin: &Path) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file: {}", origin.display()))?;

        let mut layer = Self::default();
        for key in SettingKey::ALL {
            let Some(value) = table.get(key.toml_key()) else {
                continue;
            };
            match value.as_integer().and_then(|v| u64::try_from(v).ok()) {
                Some(minutes) => layer.set(key, Some(minutes)),
                None => warn!(
                    "Ignoring {} in {}: expected a non-negative integer, got {}",
                    key.toml_key(),
                    origin.display(),
                    value
                ),
            }
        }
        Ok(layer)
    }

    /// Load a layer from a file. A missing file is an empty layer.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content, path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("Config file not present: {}", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read config file: {}", path.display())),
        }
    }

    /// Load a layer, logging failures and treating them as an empty layer.
    fn load_lenient(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!("{:#}", e);
            Self::default()
        })
    }

    pub fn get(&self, key: SettingKey) -> Option<u64> {
        match key {
            SettingKey::IdleTimeout => self.idle_timeout_minutes,
            SettingKey::Warning => self.warning_minutes,
            SettingKey::WarningRepeat => self.warning_repeat_minutes,
            SettingKey::NoUserLogonThreshold => self.no_user_logon_threshold_minutes,
        }
    }

    pub fn set(&mut self, key: SettingKey, minutes: Option<u64>) {
        let slot = match key {
            SettingKey::IdleTimeout => &mut self.idle_timeout_minutes,
            SettingKey::Warning => &mut self.warning_minutes,
            SettingKey::WarningRepeat => &mut self.warning_repeat_minutes,
            SettingKey::NoUserLogonThreshold => &mut self.no_user_logon_threshold_minutes,
        };
        *slot = minutes;
    }
}

/// Thresholds read by the idle-input watchdog on each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleThresholds {
    pub idle_timeout_minutes: u64,
    pub warning_minutes: u64,
    pub warning_repeat_minutes: u64,
}

impl IdleThresholds {
    /// Minimum gap between two countdown warnings.
    pub fn warning_repeat(&self) -> Duration {
        minutes(self.warning_repeat_minutes)
    }
}

/// Source of fresh settings for the watchdogs.
pub trait SettingsProvider: Send + Sync {
    fn idle_thresholds(&self) -> IdleThresholds;

    /// How long nobody may be logged on before a reboot.
    fn no_logon_threshold(&self) -> Duration;
}

/// File-backed settings: policy file over preference file over defaults.
#[derive(Debug, Clone)]
pub struct LayeredSettings {
    policy_path: PathBuf,
    preference_path: Option<PathBuf>,
}

impl LayeredSettings {
    pub fn new(policy_path: PathBuf, preference_path: Option<PathBuf>) -> Self {
        Self {
            policy_path,
            preference_path,
        }
    }

    /// Use the given paths, falling back to the default locations.
    pub fn from_args(policy: Option<&Path>, preference: Option<&Path>) -> Self {
        let policy_path = policy.map_or_else(|| PathBuf::from(DEFAULT_POLICY_PATH), Path::to_path_buf);
        let preference_path = preference
            .map(Path::to_path_buf)
            .or_else(default_preference_path);
        Self::new(policy_path, preference_path)
    }

    pub fn policy_path(&self) -> &Path {
        &self.policy_path
    }

    pub fn preference_path(&self) -> Option<&Path> {
        self.preference_path.as_deref()
    }

    fn layers(&self) -> (SettingsLayer, SettingsLayer) {
        let policy = SettingsLayer::load_lenient(&self.policy_path);
        let preference = self
            .preference_path
            .as_deref()
            .map(SettingsLayer::load_lenient)
            .unwrap_or_default();
        (policy, preference)
    }

    /// Resolve a single setting.
    pub fn resolve(&self, key: SettingKey) -> Resolved {
        let (policy, preference) = self.layers();
        resolve(policy.get(key), preference.get(key), key.default_minutes())
    }

    /// Resolve every setting from one read of each file.
    pub fn resolve_all(&self) -> Vec<(SettingKey, Resolved)> {
        let (policy, preference) = self.layers();
        SettingKey::ALL
            .into_iter()
            .map(|key| {
                (
                    key,
                    resolve(policy.get(key), preference.get(key), key.default_minutes()),
                )
            })
            .collect()
    }

    /// Write or remove a value in the preference file.
    ///
    /// Returns the value actually stored, which may be raised to the key's
    /// minimum. The policy file is never written.
    pub fn set_preference(&self, key: SettingKey, minutes: Option<u64>) -> Result<Option<u64>> {
        let path = self
            .preference_path
            .as_deref()
            .context("No preference file location is available; pass --config")?;

        let mut table = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str::<toml::Table>(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file: {}", path.display()));
            }
        };

        let stored = minutes.map(|m| m.max(key.minimum_minutes()));
        match stored {
            Some(m) => {
                let value = i64::try_from(m).context("Value is too large")?;
                table.insert(key.toml_key().to_string(), toml::Value::Integer(value));
            }
            None => {
                table.remove(key.toml_key());
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = toml::to_string(&table).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(stored)
    }
}

impl SettingsProvider for LayeredSettings {
    fn idle_thresholds(&self) -> IdleThresholds {
        let (policy, preference) = self.layers();
        let get = |key: SettingKey| {
            resolve(policy.get(key), preference.get(key), key.default_minutes()).minutes
        };
        IdleThresholds {
            idle_timeout_minutes: get(SettingKey::IdleTimeout),
            warning_minutes: get(SettingKey::Warning),
            warning_repeat_minutes: get(SettingKey::WarningRepeat),
        }
    }

    fn no_logon_threshold(&self) -> Duration {
        minutes(self.resolve(SettingKey::NoUserLogonThreshold).minutes)
    }
}

/// Settings that never change.
#[derive(Debug, Clone, Copy)]
pub struct FixedSettings {
    pub idle: IdleThresholds,
    pub no_logon_threshold_minutes: u64,
}

impl Default for FixedSettings {
    fn default() -> Self {
        Self {
            idle: IdleThresholds {
                idle_timeout_minutes: SettingKey::IdleTimeout.default_minutes(),
                warning_minutes: SettingKey::Warning.default_minutes(),
                warning_repeat_minutes: SettingKey::WarningRepeat.default_minutes(),
            },
            no_logon_threshold_minutes: SettingKey::NoUserLogonThreshold.default_minutes(),
        }
    }
}

impl SettingsProvider for FixedSettings {
    fn idle_thresholds(&self) -> IdleThresholds {
        self.idle
    }

    fn no_logon_threshold(&self) -> Duration {
        minutes(self.no_logon_threshold_minutes)
    }
}

/// Per-user preference file location.
pub fn default_preference_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kiosk-watchdog").join("config.toml"))
}

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(60))
}
