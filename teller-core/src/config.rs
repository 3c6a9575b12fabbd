//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "bank": { "name": "Teller Demo Bank", "defaultCurrency": "USD" },
//!   "otp": { "enabled": true, "ttlSeconds": 600, "threshold": "0.00",
//!            "hashMemoryKib": 4096, "hashIterations": 2 },
//!   "auth": { "hashMemoryKib": 19456, "hashIterations": 2 },
//!   "notifications": { "outbox": "outbox" }
//! }
//! ```
//! Unknown keys are preserved when the file is saved back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::money;
use crate::domain::otp::DEFAULT_OTP_TTL_SECONDS;
use crate::domain::result::{Error, Result};
use crate::domain::secret::{HashParams, DEFAULT_ITERATIONS, DEFAULT_MEMORY_KIB};

pub const SETTINGS_FILE: &str = "settings.json";

const PASSWORD_MEMORY_KIB: u32 = 19456;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    bank: BankSettings,
    #[serde(default)]
    otp: OtpSettings,
    #[serde(default)]
    auth: AuthSettings,
    #[serde(default)]
    notifications: NotificationSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BankSettings {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    default_currency: Option<String>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OtpSettings {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    ttl_seconds: Option<u64>,
    #[serde(default)]
    threshold: Option<String>,
    #[serde(default)]
    hash_memory_kib: Option<u32>,
    #[serde(default)]
    hash_iterations: Option<u32>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthSettings {
    #[serde(default)]
    hash_memory_kib: Option<u32>,
    #[serde(default)]
    hash_iterations: Option<u32>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationSettings {
    #[serde(default)]
    outbox: Option<String>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// OTP policy
#[derive(Debug, Clone, PartialEq)]
pub struct OtpConfig {
    /// When false, transfers skip the OTP step (bill payments never do)
    pub enabled: bool,
    pub ttl_seconds: u64,
    /// Transfers at or above this amount need an OTP
    pub threshold: Decimal,
    pub hash: HashParams,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            threshold: Decimal::ZERO,
            hash: HashParams::default(),
        }
    }
}

impl OtpConfig {
    /// Whether a transfer of `amount` must pass the OTP step
    pub fn requires_otp(&self, amount: Decimal) -> bool {
        self.enabled && amount >= self.threshold
    }
}

/// Teller configuration (resolved view of settings.json)
#[derive(Debug, Clone)]
pub struct Config {
    pub bank_name: String,
    pub default_currency: String,
    pub otp: OtpConfig,
    /// Argon2id cost for account passwords
    pub password_hash: HashParams,
    /// Outbox directory, relative to the data directory unless absolute
    pub outbox: String,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bank_name: "Teller Demo Bank".to_string(),
            default_currency: "USD".to_string(),
            otp: OtpConfig::default(),
            password_hash: HashParams {
                memory_kib: PASSWORD_MEMORY_KIB,
                iterations: DEFAULT_ITERATIONS,
            },
            outbox: "outbox".to_string(),
            _raw_settings: SettingsFile::default(),
        }
    }
}

fn check_hash(params: HashParams, section: &str) -> Result<HashParams> {
    if params.iterations == 0 || params.memory_kib < 8 {
        return Err(Error::Config(format!(
            "{0}.hashIterations must be >= 1 and {0}.hashMemoryKib >= 8",
            section
        )));
    }
    Ok(params)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load config from the data directory.
    ///
    /// `TELLER_OTP_ENABLED` and `TELLER_OTP_TTL_SECONDS` override the file.
    pub fn load(teller_dir: &Path) -> Result<Self> {
        let settings_path = teller_dir.join(SETTINGS_FILE);
        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", settings_path.display(), e)))?
        } else {
            SettingsFile::default()
        };
        Self::resolve(raw, |key| std::env::var(key).ok())
    }

    /// Build from JSON text, with an explicit environment lookup
    pub fn from_json(json: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw: SettingsFile =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        Self::resolve(raw, env)
    }

    fn resolve(raw: SettingsFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let default_currency = match raw.bank.default_currency.as_deref() {
            Some(code) => money::normalize_currency(code)
                .map_err(|_| Error::Config(format!("defaultCurrency '{}' is not valid", code)))?,
            None => defaults.default_currency,
        };

        let mut enabled = raw.otp.enabled.unwrap_or(defaults.otp.enabled);
        if let Some(value) = env("TELLER_OTP_ENABLED") {
            enabled = parse_flag(&value).ok_or_else(|| {
                Error::Config(format!("TELLER_OTP_ENABLED='{}' is not a boolean", value))
            })?;
        }

        let mut ttl_seconds = raw.otp.ttl_seconds.unwrap_or(defaults.otp.ttl_seconds);
        if let Some(value) = env("TELLER_OTP_TTL_SECONDS") {
            ttl_seconds = value.trim().parse().map_err(|_| {
                Error::Config(format!("TELLER_OTP_TTL_SECONDS='{}' is not a number", value))
            })?;
        }
        if ttl_seconds == 0 {
            return Err(Error::Config("otp.ttlSeconds must be greater than zero".into()));
        }

        let threshold = match raw.otp.threshold.as_deref() {
            Some(text) => Decimal::from_str(text.trim())
                .map_err(|_| Error::Config(format!("otp.threshold '{}' is not a number", text)))?,
            None => defaults.otp.threshold,
        };
        if threshold.is_sign_negative() && !threshold.is_zero() {
            return Err(Error::Config("otp.threshold cannot be negative".into()));
        }

        let hash = check_hash(
            HashParams {
                memory_kib: raw.otp.hash_memory_kib.unwrap_or(DEFAULT_MEMORY_KIB),
                iterations: raw.otp.hash_iterations.unwrap_or(DEFAULT_ITERATIONS),
            },
            "otp",
        )?;
        let password_hash = check_hash(
            HashParams {
                memory_kib: raw
                    .auth
                    .hash_memory_kib
                    .unwrap_or(defaults.password_hash.memory_kib),
                iterations: raw
                    .auth
                    .hash_iterations
                    .unwrap_or(defaults.password_hash.iterations),
            },
            "auth",
        )?;

        Ok(Self {
            bank_name: raw.bank.name.clone().unwrap_or(defaults.bank_name),
            default_currency,
            otp: OtpConfig {
                enabled,
                ttl_seconds,
                threshold,
                hash,
            },
            password_hash,
            outbox: raw.notifications.outbox.clone().unwrap_or(defaults.outbox),
            _raw_settings: raw,
        })
    }

    /// Save config to the data directory, preserving fields it doesn't manage
    pub fn save(&self, teller_dir: &Path) -> Result<()> {
        let settings_path = teller_dir.join(SETTINGS_FILE);

        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_default()
        } else {
            self._raw_settings.clone()
        };

        settings.bank.name = Some(self.bank_name.clone());
        settings.bank.default_currency = Some(self.default_currency.clone());
        settings.otp.enabled = Some(self.otp.enabled);
        settings.otp.ttl_seconds = Some(self.otp.ttl_seconds);
        settings.otp.threshold = Some(money::format_amount(self.otp.threshold));
        settings.otp.hash_memory_kib = Some(self.otp.hash.memory_kib);
        settings.otp.hash_iterations = Some(self.otp.hash.iterations);
        settings.auth.hash_memory_kib = Some(self.password_hash.memory_kib);
        settings.auth.hash_iterations = Some(self.password_hash.iterations);
        settings.notifications.outbox = Some(self.outbox.clone());

        std::fs::create_dir_all(teller_dir)?;
        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }

    /// Absolute outbox directory
    pub fn outbox_dir(&self, teller_dir: &Path) -> PathBuf {
        let path = PathBuf::from(&self.outbox);
        if path.is_absolute() {
            path
        } else {
            teller_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::from_json("{}", no_env).unwrap();
        assert_eq!(config.default_currency, "USD");
        assert!(config.otp.enabled);
        assert_eq!(config.otp.ttl_seconds, 600);
        assert!(config.otp.requires_otp(Decimal::new(1, 2)));
    }

    #[test]
    fn test_threshold_and_env_overrides() {
        let json = r#"{"otp": {"threshold": "500.00", "ttlSeconds": 120}}"#;
        let config = Config::from_json(json, no_env).unwrap();
        assert!(!config.otp.requires_otp(Decimal::new(49999, 2)));
        assert!(config.otp.requires_otp(Decimal::new(500, 0)));
        assert_eq!(config.otp.ttl_seconds, 120);

        let env = |key: &str| match key {
            "TELLER_OTP_ENABLED" => Some("no".to_string()),
            "TELLER_OTP_TTL_SECONDS" => Some("30".to_string()),
            _ => None,
        };
        let config = Config::from_json(json, env).unwrap();
        assert!(!config.otp.enabled);
        assert!(!config.otp.requires_otp(Decimal::new(1000, 0)));
        assert_eq!(config.otp.ttl_seconds, 30);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_json(r#"{"otp": {"ttlSeconds": 0}}"#, no_env),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"otp": {"threshold": "-1"}}"#, no_env),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"auth": {"hashIterations": 0}}"#, no_env),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"bank": {"defaultCurrency": "dollars"}}"#, no_env),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_save_preserves_unknown_fields() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(SETTINGS_FILE),
            r#"{"bank": {"name": "Acme", "branch": "north"}, "theme": "dark"}"#,
        )
        .unwrap();

        let mut config = Config::load(temp.path()).unwrap();
        assert_eq!(config.bank_name, "Acme");
        config.default_currency = "EUR".to_string();
        config.save(temp.path()).unwrap();

        let saved: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(temp.path().join(SETTINGS_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(saved["theme"], "dark");
        assert_eq!(saved["bank"]["branch"], "north");
        assert_eq!(saved["bank"]["defaultCurrency"], "EUR");
    }
}
