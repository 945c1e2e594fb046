// ── Runtime configuration ──
//
// These types describe *where* the backend lives and *how* the access layer
// behaves on the current platform. They never touch disk: the CLI (or the
// host app) builds them and hands them in.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use resilink_api::{RealtimeSettings, RetryPolicy, TlsMode};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

/// Host platform. Decides the retry policy and the diagnostics path.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Platform {
    Web,
    Ios,
    Android,
    Desktop,
}

impl Platform {
    /// Platform this binary was compiled for.
    pub fn detect() -> Self {
        if cfg!(target_arch = "wasm32") {
            Self::Web
        } else if cfg!(target_os = "ios") {
            Self::Ios
        } else if cfg!(target_os = "android") {
            Self::Android
        } else {
            Self::Desktop
        }
    }

    pub fn is_web(self) -> bool {
        matches!(self, Self::Web)
    }

    /// Retry policy tuned for this platform.
    pub fn retry_policy(self) -> RetryPolicy {
        if self.is_web() {
            RetryPolicy::web()
        } else {
            RetryPolicy::native()
        }
    }
}

// ── Fallback flag ────────────────────────────────────────────────────

/// Process-wide "backend is unreachable, simulate instead" switch.
///
/// Cloning shares the flag: a write through any clone is visible to all of
/// them immediately. Components read it per operation and never cache it.
#[derive(Debug, Clone, Default)]
pub struct FallbackState(Arc<AtomicBool>);

impl FallbackState {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_in_fallback_mode(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set_fallback_mode(&self, enabled: bool) {
        let previous = self.0.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            tracing::info!(enabled, "fallback mode changed");
        }
    }
}

// ── Environment facts ────────────────────────────────────────────────

/// What the host environment looks like, as reported in diagnostics.
///
/// Native hosts leave everything empty; a browser host fills in the page
/// URL and user agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentInfo {
    pub has_window: bool,
    pub has_document: bool,
    pub url: Option<String>,
    pub user_agent: Option<String>,
}

impl EnvironmentInfo {
    /// Facts for a browser page at `url`.
    pub fn browser(url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            has_window: true,
            has_document: true,
            url: Some(url.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

// ── Backend location ─────────────────────────────────────────────────

/// Where the backend lives and how to reach it.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://abc.example.co`.
    pub url: Url,
    /// Public (anon) key.
    pub anon_key: SecretString,
    pub tls: TlsMode,
    pub connect_timeout: Duration,
    pub realtime: RealtimeSettings,
}

impl BackendConfig {
    pub fn new(url: Url, anon_key: SecretString) -> Self {
        Self {
            url,
            anon_key,
            tls: TlsMode::System,
            connect_timeout: Duration::from_secs(10),
            realtime: RealtimeSettings::default(),
        }
    }
}

// ── Runtime behavior ─────────────────────────────────────────────────

/// Platform-dependent behavior shared by every access-layer component.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub platform: Platform,
    /// Chosen once from the platform; never mutated afterwards.
    pub retry: RetryPolicy,
    pub fallback: FallbackState,
    pub environment: EnvironmentInfo,
}

impl RuntimeConfig {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            retry: platform.retry_policy(),
            fallback: FallbackState::default(),
            environment: EnvironmentInfo::default(),
        }
    }

    /// Config for the platform this binary was built for.
    pub fn detect() -> Self {
        Self::for_platform(Platform::detect())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackState) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentInfo) -> Self {
        self.environment = environment;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::detect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fallback_flag_is_shared_between_clones() {
        let a = FallbackState::default();
        let b = a.clone();
        assert!(!b.is_in_fallback_mode());
        a.set_fallback_mode(true);
        assert!(b.is_in_fallback_mode());
        b.set_fallback_mode(false);
        assert!(!a.is_in_fallback_mode());
    }

    #[test]
    fn platform_selects_retry_policy() {
        assert_eq!(RuntimeConfig::for_platform(Platform::Web).retry, RetryPolicy::web());
        assert_eq!(
            RuntimeConfig::for_platform(Platform::Android).retry,
            RetryPolicy::native()
        );
    }

    #[test]
    fn platform_parses_case_insensitively() {
        assert_eq!("iOS".parse::<Platform>().unwrap(), Platform::Ios);
        assert_eq!(Platform::Desktop.to_string(), "desktop");
        assert!("toaster".parse::<Platform>().is_err());
    }

    #[test]
    fn detected_platform_is_native_on_test_hosts() {
        assert!(!Platform::detect().is_web());
    }
}
