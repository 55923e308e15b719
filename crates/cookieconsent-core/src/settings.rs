//! Plugin settings
//!
//! Everything the data layer and gateway need, in one value passed to each
//! component at construction. Loaded from TOML at startup, falls back to
//! defaults if no config file exists.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub gateway: GatewaySettings,
    pub widget: WidgetSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite database file.
    pub path: PathBuf,
    /// Prefix for the three plugin tables. ASCII letters, digits and `_` only.
    pub table_prefix: String,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub port: u16,
    pub bind: BindMode,
    /// How long an `Idempotency-Key` is remembered, in seconds.
    pub idempotency_ttl_secs: u64,
}

/// Bind mode for the gateway
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    #[default]
    Loopback,
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }

    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "lan" | "0.0.0.0" => BindMode::Lan,
            _ => BindMode::Loopback,
        }
    }
}

/// Front-end widget bootstrap values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WidgetSettings {
    pub enabled: bool,
    pub trigger_position: TriggerPosition,
    /// Forward consent decisions to gtag consent mode.
    pub send_gtag: bool,
    pub colours: Colours,
    pub cookie_icon: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerPosition {
    #[default]
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Colours {
    pub primary: String,
    pub secondary: String,
    pub text: String,
    pub background: String,
}

// ============================================================
// Defaults
// ============================================================

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cookieconsent.db"),
            table_prefix: "cookieconsent_".into(),
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self { port: 18790, bind: BindMode::default(), idempotency_ttl_secs: 600 }
    }
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_position: TriggerPosition::default(),
            send_gtag: false,
            colours: Colours::default(),
            cookie_icon: None,
        }
    }
}

impl Default for Colours {
    fn default() -> Self {
        Self {
            primary: "#1863dc".into(),
            secondary: "#ffffff".into(),
            text: "#212121".into(),
            background: "#ffffff".into(),
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl Settings {
    /// Load settings from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => {
                    tracing::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} - using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No settings at {} - using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Strict variant of [`Settings::load`]: a missing or malformed file is an error.
    pub fn load_strict(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))
    }

    /// Render the current settings as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn table_names(&self) -> Result<TableNames> {
        TableNames::with_prefix(&self.database.table_prefix)
    }
}

/// Resolved names of the three plugin tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub totals: String,
    pub registry: String,
    pub banner: String,
}

impl TableNames {
    /// Table names are interpolated into SQL, so the prefix is restricted
    /// to identifier characters.
    pub fn with_prefix(prefix: &str) -> Result<Self> {
        if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::ConfigError(format!(
                "table prefix '{}' may only contain ASCII letters, digits and '_'",
                prefix
            )));
        }
        if prefix.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(Error::ConfigError(format!(
                "table prefix '{}' must not start with a digit",
                prefix
            )));
        }
        Ok(Self {
            totals: format!("{}consent_totals", prefix),
            registry: format!("{}cookie_registry", prefix),
            banner: format!("{}banner_config", prefix),
        })
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.totals, &self.registry, &self.banner]
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            totals: "cookieconsent_consent_totals".into(),
            registry: "cookieconsent_cookie_registry".into(),
            banner: "cookieconsent_banner_config".into(),
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
