// ── Connection diagnostics ──
//
// Bounded-time reachability checks plus an aggregated report of platform,
// retry settings, connection and session facts. Reports are built fresh on
// every call. Every key is always present: absent data is `null`/`false`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use resilink_api::Backend;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::client::SafeClient;
use crate::config::Platform;

/// Ceiling for a native connection test.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ceiling for a full native diagnosis.
pub const DIAGNOSE_TIMEOUT: Duration = Duration::from_secs(3);

const WEB_SKIPPED_MESSAGE: &str = "detailed diagnostics skipped on web";

// ── Report types ─────────────────────────────────────────────────────

/// Outcome of [`Diagnostics::test_connection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub success: bool,
    /// Unix milliseconds when the test started.
    pub timestamp: i64,
    pub message: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentReport {
    pub platform: Platform,
    pub is_web: bool,
    pub has_window: bool,
    pub has_document: bool,
    pub url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemReport {
    pub in_fallback_mode: bool,
    pub retry_limit: u32,
    /// Base retry delay in milliseconds.
    pub retry_delay: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthReport {
    pub has_session: bool,
    #[serde(rename = "userID")]
    pub user_id: Option<String>,
}

/// Outcome of [`Diagnostics::diagnose_issues`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub timestamp: DateTime<Utc>,
    pub timed_out: bool,
    pub environment: EnvironmentReport,
    pub system: SystemReport,
    pub connection: ConnectionSummary,
    pub auth: AuthReport,
}

// ── Diagnostics ──────────────────────────────────────────────────────

/// Reachability checks against the backend behind a [`SafeClient`].
pub struct Diagnostics<B: Backend> {
    client: SafeClient<B>,
    probe_timeout: Duration,
    diagnose_timeout: Duration,
}

impl<B: Backend> Diagnostics<B> {
    pub fn new(client: SafeClient<B>) -> Self {
        Self {
            client,
            probe_timeout: PROBE_TIMEOUT,
            diagnose_timeout: DIAGNOSE_TIMEOUT,
        }
    }

    /// Override the native ceilings.
    pub fn with_timeouts(mut self, probe: Duration, diagnose: Duration) -> Self {
        self.probe_timeout = probe;
        self.diagnose_timeout = diagnose;
        self
    }

    /// One probe of the backend. Web runs it unguarded; native races it
    /// against the probe ceiling. Never fails.
    pub async fn test_connection(&self) -> ConnectionReport {
        let timestamp = Utc::now().timestamp_millis();
        let runtime = self.client.runtime();

        if runtime.platform.is_web() {
            return match self.client.probe().await {
                Ok(()) => success_report(timestamp, "connected (web)"),
                Err(e) => failure_report(timestamp, "connection failed (web)", e.to_string()),
            };
        }

        match tokio::time::timeout(self.probe_timeout, self.client.probe()).await {
            Ok(Ok(())) => success_report(timestamp, "database connection succeeded"),
            Ok(Err(e)) => failure_report(timestamp, "database connection failed", e.to_string()),
            Err(_) => {
                warn!(
                    timeout_ms = millis(self.probe_timeout),
                    "connection test timed out"
                );
                failure_report(
                    timestamp,
                    "connection test timed out",
                    "Connection test timed out".to_owned(),
                )
            }
        }
    }

    /// Aggregate environment, retry settings, connectivity and session.
    ///
    /// Web returns a minimal report at once. Native probes and looks up the
    /// session under the diagnose ceiling; if the ceiling fires the report
    /// says so through `timed_out`.
    pub async fn diagnose_issues(&self) -> DiagnosticReport {
        if self.client.runtime().platform.is_web() {
            return self.report(
                false,
                ConnectionSummary {
                    success: true,
                    message: WEB_SKIPPED_MESSAGE.to_owned(),
                    error: None,
                },
                no_session(),
            );
        }

        let full = async {
            let connection = self.test_connection().await;
            let auth = self.session_report().await;
            self.report(
                false,
                ConnectionSummary {
                    success: connection.success,
                    message: connection.message,
                    error: connection.error,
                },
                auth,
            )
        };

        match tokio::time::timeout(self.diagnose_timeout, full).await {
            Ok(report) => report,
            Err(_) => {
                warn!(
                    timeout_ms = millis(self.diagnose_timeout),
                    "diagnosis timed out"
                );
                self.report(
                    true,
                    ConnectionSummary {
                        success: false,
                        message: format!(
                            "diagnosis timed out after {}ms",
                            millis(self.diagnose_timeout)
                        ),
                        error: Some("timed out".to_owned()),
                    },
                    no_session(),
                )
            }
        }
    }

    /// Session lookup guarded on its own: a failure reads as "no session".
    async fn session_report(&self) -> AuthReport {
        match self.client.auth().get_session().await {
            Ok(Some(session)) => AuthReport {
                has_session: true,
                user_id: Some(session.user.id),
            },
            Ok(None) => no_session(),
            Err(e) => {
                error!(error = %e, "session lookup failed during diagnosis");
                no_session()
            }
        }
    }

    fn report(
        &self,
        timed_out: bool,
        connection: ConnectionSummary,
        auth: AuthReport,
    ) -> DiagnosticReport {
        let runtime = self.client.runtime();
        let env = &runtime.environment;
        DiagnosticReport {
            timestamp: Utc::now(),
            timed_out,
            environment: EnvironmentReport {
                platform: runtime.platform,
                is_web: runtime.platform.is_web(),
                has_window: env.has_window,
                has_document: env.has_document,
                url: env.url.clone(),
                user_agent: env.user_agent.clone(),
            },
            system: SystemReport {
                in_fallback_mode: runtime.fallback.is_in_fallback_mode(),
                retry_limit: runtime.retry.max_retries(),
                retry_delay: millis(runtime.retry.base_delay()),
                timeout_ms: millis(runtime.retry.request_timeout()),
            },
            connection,
            auth,
        }
    }
}

fn success_report(timestamp: i64, message: &str) -> ConnectionReport {
    ConnectionReport {
        success: true,
        timestamp,
        message: message.to_owned(),
        error: None,
    }
}

fn failure_report(timestamp: i64, message: &str, error: String) -> ConnectionReport {
    ConnectionReport {
        success: false,
        timestamp,
        message: message.to_owned(),
        error: Some(error),
    }
}

fn no_session() -> AuthReport {
    AuthReport {
        has_session: false,
        user_id: None,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
