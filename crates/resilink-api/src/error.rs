use thiserror::Error;

/// Top-level error type for the `resilink-api` crate.
///
/// Covers every failure mode across the backend surfaces:
/// authentication, transport, table data, storage, and realtime.
/// `resilink-core` maps these into user-facing variants.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Sign-in rejected or the access token is no longer valid.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// An operation needed a signed-in session and there was none.
    #[error("No active session")]
    NoSession,

    /// Auth state listener could not be registered.
    #[error("Auth listener registration failed: {0}")]
    Listener(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A single attempt did not settle before the per-attempt timeout.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The resilient fetch gave up (retries exhausted or hard deadline hit).
    #[error("Backend unreachable after {attempts} attempt(s): {message}")]
    Unreachable { attempts: u32, message: String },

    /// HTTP client could not be constructed (bad TLS material, bad header).
    #[error("Client setup failed: {0}")]
    ClientSetup(String),

    // ── Backend ─────────────────────────────────────────────────────
    /// Structured error returned by the backend (`{message, code}` body).
    #[error("Backend error (HTTP {status}): {message}")]
    Backend {
        status: u16,
        message: String,
        code: Option<String>,
    },

    /// `update`/`delete` without a filter would touch every row.
    #[error("Refusing unfiltered {operation} on table '{table}'")]
    UnfilteredWrite {
        table: String,
        operation: &'static str,
    },

    // ── Storage ─────────────────────────────────────────────────────
    /// Storage request rejected before reaching the network.
    #[error("Storage error in bucket '{bucket}': {message}")]
    Storage { bucket: String, message: String },

    // ── Realtime ────────────────────────────────────────────────────
    /// Realtime WebSocket could not be opened.
    #[error("Realtime connection failed: {0}")]
    RealtimeConnect(String),

    /// Realtime is switched off for this backend.
    #[error("Realtime is disabled for this backend")]
    RealtimeDisabled,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::Unreachable { .. } | Self::RealtimeConnect(_) => true,
            Self::Backend { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Backend { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Extract the backend error code, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Backend { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Backend {
            status: 503,
            message: "unavailable".into(),
            code: None,
        };
        assert!(err.is_transient());
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn client_errors_are_permanent() {
        let err = Error::Backend {
            status: 422,
            message: "violates check constraint".into(),
            code: Some("23514".into()),
        };
        assert!(!err.is_transient());
        assert_eq!(err.api_error_code(), Some("23514"));
    }
}
