//! Resilient data-access layer between `resilink-api` and app features.
//!
//! Everything feature code needs to talk to the backend without ever
//! blocking or panicking:
//!
//! - **[`SafeClient`]** — Facade over a [`Backend`](resilink_api::Backend).
//!   Table ([`Table`]), storage ([`Bucket`]) and auth ([`Auth`]) calls return
//!   `Result<T, ClientError>` and log failures with the table or bucket name.
//!
//! - **[`ChannelHandle`]** — Per-room realtime handle. Live when the backend
//!   hands out a channel, otherwise a [`MockChannel`] that simulates a
//!   `"system"` connected notice after 500 ms.
//!
//! - **[`Diagnostics`]** — Bounded-time connection test and an aggregated
//!   [`DiagnosticReport`] (platform, retry settings, reachability, session).
//!
//! - **[`RateLimiter`]** — Sliding-window throttle for sensitive actions,
//!   checked before a request reaches the network.
//!
//! - **[`RuntimeConfig`]** — Platform, retry policy and the shared
//!   [`FallbackState`] flag, injected into every component.

pub mod channel;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod rate_limit;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channel::{ChannelHandle, ChannelState, MockChannel, MockSubscription, Subscription};
pub use client::{Auth, AuthSubscription, Bucket, SafeClient, Table};
pub use config::{BackendConfig, EnvironmentInfo, FallbackState, Platform, RuntimeConfig};
pub use diagnostics::{ConnectionReport, DiagnosticReport, Diagnostics};
pub use error::ClientError;
pub use rate_limit::{RateAction, RateDecision, RateLimit, RateLimiter};

// Transport types feature code touches directly.
pub use resilink_api::{
    AuthCallback, AuthEvent, EventCallback, Query, RealtimeMessage, RetryPolicy, Row, Session,
    UploadOptions, User,
};
