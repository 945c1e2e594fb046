// ── Core error types ──
//
// User-facing errors from resilink-core. Feature code never sees raw
// transport errors: the `From<resilink_api::Error>` impl folds them into a
// small set of outcomes a screen can act on.

use thiserror::Error;

/// Unified error type for the access layer.
#[derive(Debug, Error)]
pub enum ClientError {
    // ── Reachability ─────────────────────────────────────────────────
    #[error("Backend unreachable: {message}")]
    Unreachable { message: String, attempts: u32 },

    #[error("Backend did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Auth ─────────────────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    // ── Rejections ───────────────────────────────────────────────────
    #[error("Request rejected by backend: {message}")]
    Rejected {
        message: String,
        /// Backend error code (e.g. a Postgres SQLSTATE), if any.
        code: Option<String>,
        status: Option<u16>,
    },

    #[error("Storage error in bucket '{bucket}': {message}")]
    Storage { bucket: String, message: String },

    #[error("Realtime unavailable: {reason}")]
    RealtimeUnavailable { reason: String },

    // ── Local throttling ─────────────────────────────────────────────
    #[error("{message}")]
    RateLimited {
        retry_after_secs: u64,
        message: String,
    },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// `true` when waiting (or reconnecting) might make the call succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::Timeout { .. }
                | Self::RealtimeUnavailable { .. }
                | Self::RateLimited { .. }
        )
    }

    /// Seconds to wait before retrying a rate-limited action.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<resilink_api::Error> for ClientError {
    fn from(err: resilink_api::Error) -> Self {
        use resilink_api::Error as Api;

        match err {
            Api::Authentication { message } => ClientError::AuthenticationFailed { message },
            Api::NoSession => ClientError::AuthenticationFailed {
                message: "no active session".into(),
            },
            Api::Listener(message) => ClientError::Internal(message),
            Api::Transport(ref e) if e.is_timeout() => ClientError::Timeout { timeout_ms: 0 },
            Api::Transport(e) => ClientError::Unreachable {
                message: e.to_string(),
                attempts: 1,
            },
            Api::InvalidUrl(e) => ClientError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Timeout { timeout_ms } => ClientError::Timeout { timeout_ms },
            Api::Unreachable { attempts, message } => {
                ClientError::Unreachable { message, attempts }
            }
            Api::ClientSetup(message) => ClientError::Config { message },
            Api::Backend {
                status,
                message,
                code,
            } => ClientError::Rejected {
                message,
                code,
                status: Some(status),
            },
            err @ Api::UnfilteredWrite { .. } => ClientError::Rejected {
                message: err.to_string(),
                code: None,
                status: None,
            },
            Api::Storage { bucket, message } => ClientError::Storage { bucket, message },
            Api::RealtimeConnect(reason) => ClientError::RealtimeUnavailable { reason },
            Api::RealtimeDisabled => ClientError::RealtimeUnavailable {
                reason: "realtime is disabled".into(),
            },
            Api::Deserialization { message, body: _ } => {
                ClientError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_rejection_keeps_status_and_code() {
        let err: ClientError = resilink_api::Error::Backend {
            status: 409,
            message: "duplicate key".into(),
            code: Some("23505".into()),
        }
        .into();
        match err {
            ClientError::Rejected { code, status, .. } => {
                assert_eq!(code.as_deref(), Some("23505"));
                assert_eq!(status, Some(409));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[test]
    fn unfiltered_write_is_a_permanent_rejection() {
        let err: ClientError = resilink_api::Error::UnfilteredWrite {
            table: "profiles".into(),
            operation: "delete",
        }
        .into();
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "Request rejected by backend: Refusing unfiltered delete on table 'profiles'"
        );
    }

    #[test]
    fn exhausted_fetch_is_transient() {
        let err: ClientError = resilink_api::Error::Unreachable {
            attempts: 4,
            message: "Server error: 503".into(),
        }
        .into();
        assert!(err.is_transient());
        assert!(err.retry_after_secs().is_none());
    }

    #[test]
    fn rate_limit_message_is_displayed_verbatim() {
        let err = ClientError::RateLimited {
            retry_after_secs: 42,
            message: "Too many attempts. Try again in 42 seconds.".into(),
        };
        assert_eq!(err.to_string(), "Too many attempts. Try again in 42 seconds.");
        assert_eq!(err.retry_after_secs(), Some(42));
    }
}
