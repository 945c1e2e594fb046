// Raw backend contract.
//
// Everything the access layer needs from the remote service: table CRUD,
// object storage, auth session and listeners, realtime channel creation,
// and a cheap reachability probe. `RestBackend` is the production
// implementation; tests plug in fakes.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::realtime::LiveChannel;

/// A table row as returned by the backend.
pub type Row = serde_json::Value;

// ── Query ────────────────────────────────────────────────────────────

/// Column selection, equality filters, ordering and limit for a table call.
///
/// Rendered as PostgREST-style query parameters
/// (`select=*&id=eq.42&order=created_at.desc&limit=20`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    columns: String,
    filters: Vec<(String, String)>,
    order: Option<(String, bool)>,
    limit: Option<usize>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            columns: "*".into(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl std::fmt::Display) -> Self {
        self.filters.push((column.into(), format!("eq.{value}")));
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some((column.into(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// `true` when no filter narrows the rows. Writes refuse such queries.
    pub fn is_unfiltered(&self) -> bool {
        self.filters.is_empty()
    }

    /// Query parameters for a read.
    pub fn to_read_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filter_params());
        if let Some((column, ascending)) = &self.order {
            let dir = if *ascending { "asc" } else { "desc" };
            params.push(("order".into(), format!("{column}.{dir}")));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        params
    }

    /// Query parameters for a write (filters only).
    pub fn filter_params(&self) -> Vec<(String, String)> {
        self.filters.clone()
    }
}

// ── Storage ──────────────────────────────────────────────────────────

/// Options for an object upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub content_type: String,
    /// Overwrite an existing object at the same path.
    pub upsert: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: "application/octet-stream".into(),
            upsert: false,
        }
    }
}

/// Storage key of an uploaded object (`"{bucket}/{path}"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    #[serde(rename = "Key")]
    pub key: String,
}

// ── Auth ─────────────────────────────────────────────────────────────

/// Signed-in user as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Remaining user fields (role, metadata, timestamps).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Access/refresh token pair plus the user it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) at which the access token expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

/// Auth state transitions delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    /// Fired once on registration with the current session (if any).
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// Callback invoked on every auth state transition.
pub type AuthCallback = Arc<dyn Fn(AuthEvent, Option<&Session>) + Send + Sync>;

pub use crate::rest::auth::AuthListener;

// ── Backend trait ────────────────────────────────────────────────────

/// The raw remote service as seen by the access layer.
///
/// Implementations may fail in any method; the core crate's wrapper turns
/// every failure into a logged, typed result.
pub trait Backend: Send + Sync + 'static {
    /// Read rows from `table`.
    fn select(&self, table: &str, query: &Query)
    -> impl Future<Output = Result<Vec<Row>, Error>> + Send;

    /// Insert one row (object) or many (array); returns the stored rows.
    fn insert(
        &self,
        table: &str,
        rows: &serde_json::Value,
    ) -> impl Future<Output = Result<Vec<Row>, Error>> + Send;

    /// Patch rows matching `filter`; returns the updated rows.
    fn update(
        &self,
        table: &str,
        changes: &serde_json::Value,
        filter: &Query,
    ) -> impl Future<Output = Result<Vec<Row>, Error>> + Send;

    /// Delete rows matching `filter`; returns the deleted rows.
    fn delete(&self, table: &str, filter: &Query)
    -> impl Future<Output = Result<Vec<Row>, Error>> + Send;

    /// Store `body` at `path` inside `bucket`.
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> impl Future<Output = Result<StoredObject, Error>> + Send;

    /// Fetch the object at `path` inside `bucket`.
    fn download(&self, bucket: &str, path: &str)
    -> impl Future<Output = Result<Bytes, Error>> + Send;

    /// Public URL for an object in a public bucket. No network involved.
    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, Error>;

    /// Current session, if signed in.
    fn session(&self) -> impl Future<Output = Result<Option<Session>, Error>> + Send;

    /// End the current session.
    fn sign_out(&self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Register an auth state listener.
    fn on_auth_state_change(&self, callback: AuthCallback) -> Result<AuthListener, Error>;

    /// Create (but do not join) a realtime channel for `topic`.
    fn channel(&self, topic: &str) -> Result<LiveChannel, Error>;

    /// Single lightweight round trip proving the backend answers queries.
    fn probe(&self) -> impl Future<Output = Result<(), Error>> + Send;
}
