//! CLI error types with miette diagnostics.
//!
//! Maps `ClientError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use resilink_config::ConfigError;
use resilink_core::ClientError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach {url}: {message}")]
    #[diagnostic(
        code(resilink::connection_failed),
        help(
            "Check that the backend is running and reachable.\n\
             Try: resilink diagnose -v"
        )
    )]
    ConnectionFailed { url: String, message: String },

    #[error("Backend unreachable after {attempts} attempt(s): {message}")]
    #[diagnostic(
        code(resilink::unreachable),
        help("Retries were exhausted. Check your network or raise retry.max_retries.")
    )]
    Unreachable { message: String, attempts: u32 },

    #[error("Backend did not answer within {timeout_ms}ms")]
    #[diagnostic(code(resilink::timeout), help("Raise retry.request_timeout_ms in settings."))]
    Timeout { timeout_ms: u64 },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(resilink::auth_failed),
        help("Verify the anon key matches the backend project.")
    )]
    AuthFailed { message: String },

    #[error("No anon key configured")]
    #[diagnostic(
        code(resilink::no_credentials),
        help(
            "Pass --anon-key, set RESILINK_ANON_KEY, or run:\n\
             resilink config init --backend-url <URL> --anon-key-env <VAR>"
        )
    )]
    NoCredentials,

    // ── Backend ──────────────────────────────────────────────────────

    #[error("Backend rejected the request ({code}): {message}")]
    #[diagnostic(code(resilink::rejected))]
    Rejected { code: String, message: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("No backend URL configured")]
    #[diagnostic(
        code(resilink::no_backend),
        help(
            "Pass --backend-url, set RESILINK_BACKEND_URL, or create settings with:\n\
             resilink config init --backend-url <URL>\n\
             Expected at: {path}"
        )
    )]
    NoBackend { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(resilink::validation))]
    Validation { field: String, reason: String },

    #[error("Settings file already exists at {path}")]
    #[diagnostic(code(resilink::exists), help("Use --force to overwrite it."))]
    AlreadyExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(resilink::config))]
    Config(ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(resilink::json), help("Check the JSON payload and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::AuthFailed { .. } | Self::NoCredentials => exit_code::AUTH,
            Self::Validation { .. } | Self::Json(_) => exit_code::USAGE,
            Self::AlreadyExists { .. } => exit_code::CONFLICT,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing { field } if field == "backend_url" => Self::NoBackend {
                path: resilink_config::config_path().display().to_string(),
            },
            ConfigError::Missing { field } if field == "anon_key" => Self::NoCredentials,
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

// ── ClientError → CliError mapping ───────────────────────────────────

impl From<ClientError> for CliError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unreachable { message, attempts } => {
                Self::Unreachable { message, attempts }
            }
            ClientError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            ClientError::AuthenticationFailed { message } => Self::AuthFailed { message },
            ClientError::Rejected { message, code, .. } => Self::Rejected {
                code: code.unwrap_or_else(|| "rejected".into()),
                message,
            },
            ClientError::Storage { bucket, message } => Self::Rejected {
                code: "storage".into(),
                message: format!("{bucket}: {message}"),
            },
            ClientError::RealtimeUnavailable { reason } => Self::Rejected {
                code: "realtime".into(),
                message: reason,
            },
            ClientError::RateLimited { message, .. } => Self::Rejected {
                code: "rate_limited".into(),
                message,
            },
            ClientError::Config { message } => Self::Validation {
                field: "settings".into(),
                reason: message,
            },
            ClientError::Internal(message) => Self::Rejected {
                code: "internal".into(),
                message,
            },
        }
    }
}
