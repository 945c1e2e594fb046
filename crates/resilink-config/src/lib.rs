//! Settings for resilink hosts and the `resilink` CLI.
//!
//! A TOML file under the platform config directory, overlaid with
//! `RESILINK_*` environment variables, translated into
//! `resilink_core::BackendConfig` and `resilink_core::RuntimeConfig`.
//! Nested keys use a double underscore: `RESILINK_RETRY__MAX_RETRIES=5`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use resilink_api::{RealtimeSettings, RetryPolicy, TlsMode};
use resilink_core::{BackendConfig, FallbackState, Platform, RuntimeConfig};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const ENV_PREFIX: &str = "RESILINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{field} is not configured")]
    Missing { field: String },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("settings loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// Everything a resilink host reads from disk or the environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Backend project URL (e.g. "https://abc.example.co").
    pub backend_url: Option<String>,

    /// Public anon key (plaintext; prefer `anon_key_env`).
    pub anon_key: Option<String>,

    /// Environment variable name holding the anon key.
    pub anon_key_env: Option<String>,

    /// Platform override. Detected from the build target when unset.
    pub platform: Option<Platform>,

    /// Start in fallback mode (realtime simulated locally).
    #[serde(default)]
    pub fallback_mode: bool,

    #[serde(default = "default_true")]
    pub realtime_enabled: bool,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Extra CA certificate for self-hosted backends.
    pub ca_cert: Option<PathBuf>,

    #[serde(default)]
    pub retry: RetryOverrides,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: None,
            anon_key: None,
            anon_key_env: None,
            platform: None,
            fallback_mode: false,
            realtime_enabled: true,
            connect_timeout: default_connect_timeout(),
            ca_cert: None,
            retry: RetryOverrides::default(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    10
}

/// Per-field overrides of the platform's retry preset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub hard_timeout_ms: Option<u64>,
}

impl RetryOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the overrides on top of `base`.
    pub fn apply(&self, base: RetryPolicy) -> RetryPolicy {
        if self.is_empty() {
            return base;
        }
        RetryPolicy::new(
            self.max_retries.unwrap_or(base.max_retries()),
            self.base_delay_ms
                .map_or(base.base_delay(), Duration::from_millis),
            self.request_timeout_ms
                .map_or(base.request_timeout(), Duration::from_millis),
            self.hard_timeout_ms
                .map_or(base.hard_timeout(), Duration::from_millis),
        )
    }
}

impl Settings {
    /// Platform from settings, or the build target's.
    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::detect)
    }

    /// Resolve the anon key: named env var first, then plaintext.
    pub fn resolve_anon_key(&self) -> Result<SecretString, ConfigError> {
        if let Some(ref env_name) = self.anon_key_env {
            if let Ok(val) = std::env::var(env_name) {
                return Ok(SecretString::from(val));
            }
        }
        self.anon_key
            .clone()
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::Missing {
                field: "anon_key".into(),
            })
    }

    pub fn backend_url(&self) -> Result<Url, ConfigError> {
        let raw = self
            .backend_url
            .as_deref()
            .ok_or_else(|| ConfigError::Missing {
                field: "backend_url".into(),
            })?;
        let url = Url::parse(raw).map_err(|e| ConfigError::Validation {
            field: "backend_url".into(),
            reason: format!("{raw}: {e}"),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation {
                field: "backend_url".into(),
                reason: format!("expected http or https, got '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.ca_cert
            .clone()
            .map_or(TlsMode::System, TlsMode::CustomCa)
    }

    /// Where and how to reach the backend.
    pub fn to_backend_config(&self) -> Result<BackendConfig, ConfigError> {
        let mut config = BackendConfig::new(self.backend_url()?, self.resolve_anon_key()?);
        config.tls = self.tls_mode();
        config.connect_timeout = Duration::from_secs(self.connect_timeout);
        config.realtime = RealtimeSettings {
            enabled: self.realtime_enabled,
            ..RealtimeSettings::default()
        };
        Ok(config)
    }

    /// Platform behavior: retry preset with overrides and the initial
    /// fallback flag.
    pub fn to_runtime_config(&self) -> RuntimeConfig {
        let platform = self.platform();
        RuntimeConfig::for_platform(platform)
            .with_retry(self.retry.apply(platform.retry_policy()))
            .with_fallback(FallbackState::new(self.fallback_mode))
    }
}

// ── Settings file path ──────────────────────────────────────────────

/// Resolve the settings file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "resilink", "resilink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("resilink");
    p
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load settings from the canonical path plus environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_from(&config_path())
}

/// Load settings from `path` (missing file is fine) plus environment.
pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    let settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    Ok(settings)
}

// ── Saving ──────────────────────────────────────────────────────────

/// Serialize settings to TOML at `path`, creating parent directories.
pub fn save_to(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(settings)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    fn write(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(settings.realtime_enabled);
        assert_eq!(settings.connect_timeout, 10);
        assert!(settings.retry.is_empty());
    }

    #[test]
    fn reads_toml_file() {
        let (_dir, path) = write(
            r#"
backend_url = "https://abc.example.co"
anon_key = "anon"
platform = "web"
fallback_mode = true

[retry]
max_retries = 5
"#,
        );
        let settings = load_from(&path).unwrap();
        assert_eq!(settings.platform, Some(Platform::Web));
        assert!(settings.fallback_mode);
        assert_eq!(settings.retry.max_retries, Some(5));

        let backend = settings.to_backend_config().unwrap();
        assert_eq!(backend.url.as_str(), "https://abc.example.co/");
        assert_eq!(backend.anon_key.expose_secret(), "anon");

        let runtime = settings.to_runtime_config();
        assert!(runtime.platform.is_web());
        assert!(runtime.fallback.is_in_fallback_mode());
        assert_eq!(runtime.retry.max_retries(), 5);
        assert_eq!(runtime.retry.base_delay(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_unknown_platform() {
        let (_dir, path) = write("platform = \"toaster\"\n");
        assert!(matches!(load_from(&path), Err(ConfigError::Figment(_))));
    }

    #[test]
    fn backend_url_is_required_and_validated() {
        let settings = Settings {
            anon_key: Some("anon".into()),
            ..Settings::default()
        };
        assert!(matches!(
            settings.to_backend_config(),
            Err(ConfigError::Missing { field }) if field == "backend_url"
        ));

        let settings = Settings {
            backend_url: Some("ftp://files.example".into()),
            anon_key: Some("anon".into()),
            ..Settings::default()
        };
        assert!(matches!(
            settings.to_backend_config(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn anon_key_falls_back_to_plaintext_when_env_var_unset() {
        let settings = Settings {
            anon_key: Some("plain".into()),
            anon_key_env: Some("RESILINK_TEST_SURELY_UNSET_VAR".into()),
            ..Settings::default()
        };
        assert_eq!(settings.resolve_anon_key().unwrap().expose_secret(), "plain");

        let settings = Settings::default();
        assert!(matches!(
            settings.resolve_anon_key(),
            Err(ConfigError::Missing { .. })
        ));
    }

    #[test]
    fn overrides_leave_preset_untouched_when_empty() {
        let native = RetryPolicy::native();
        assert_eq!(RetryOverrides::default().apply(native), native);

        let tuned = RetryOverrides {
            request_timeout_ms: Some(2_000),
            ..RetryOverrides::default()
        }
        .apply(native);
        assert_eq!(tuned.max_retries(), 3);
        assert_eq!(tuned.request_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn realtime_and_tls_carry_over() {
        let settings = Settings {
            backend_url: Some("http://localhost:54321".into()),
            anon_key: Some("anon".into()),
            realtime_enabled: false,
            ca_cert: Some(PathBuf::from("/etc/ca.pem")),
            connect_timeout: 3,
            ..Settings::default()
        };
        let backend = settings.to_backend_config().unwrap();
        assert!(!backend.realtime.enabled);
        assert_eq!(backend.tls, TlsMode::CustomCa(PathBuf::from("/etc/ca.pem")));
        assert_eq!(backend.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let settings = Settings {
            backend_url: Some("https://abc.example.co".into()),
            anon_key_env: Some("MY_ANON_KEY".into()),
            platform: Some(Platform::Android),
            ..Settings::default()
        };
        save_to(&settings, &path).unwrap();
        assert_eq!(load_from(&path).unwrap(), settings);
    }
}
