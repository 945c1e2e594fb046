// ── Client wrapper ──
//
// Every backend call made by feature code goes through `SafeClient`. Each
// operation returns a `Result` and logs failures at the point of catch with
// the table or bucket name. Nothing here panics or hangs: the transport
// underneath already bounds latency.

use std::sync::Arc;

use bytes::Bytes;
use resilink_api::{
    AuthCallback, AuthListener, Backend, Query, RestBackend, Row, Session, StoredObject,
    TransportConfig, UploadOptions,
};
use tracing::{debug, error, warn};
use url::Url;

use crate::config::{BackendConfig, RuntimeConfig};
use crate::error::ClientError;

/// Never-failing facade over a [`Backend`].
///
/// Cheap to clone: the backend is shared behind an `Arc`.
pub struct SafeClient<B: Backend = RestBackend> {
    backend: Arc<B>,
    runtime: RuntimeConfig,
}

impl<B: Backend> Clone for SafeClient<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            runtime: self.runtime.clone(),
        }
    }
}

impl SafeClient<RestBackend> {
    /// Build the production client for `backend` using the platform's
    /// retry policy from `runtime`.
    pub fn connect(backend: &BackendConfig, runtime: RuntimeConfig) -> Result<Self, ClientError> {
        let transport = TransportConfig {
            tls: backend.tls.clone(),
            connect_timeout: backend.connect_timeout,
            api_key: None,
        };
        let rest = RestBackend::new(
            backend.url.clone(),
            backend.anon_key.clone(),
            &transport,
            runtime.retry,
        )?
        .with_realtime(backend.realtime.clone());
        debug!(url = %backend.url, platform = %runtime.platform, "backend client ready");
        Ok(Self::new(Arc::new(rest), runtime))
    }
}

impl<B: Backend> SafeClient<B> {
    pub fn new(backend: Arc<B>, runtime: RuntimeConfig) -> Self {
        Self { backend, runtime }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    /// Table operations on `table`.
    pub fn from(&self, table: &str) -> Table<'_, B> {
        Table {
            backend: &self.backend,
            name: table.to_owned(),
        }
    }

    /// Object operations on `bucket`.
    pub fn storage(&self, bucket: &str) -> Bucket<'_, B> {
        Bucket {
            backend: &self.backend,
            name: bucket.to_owned(),
        }
    }

    /// Session and auth listener operations.
    pub fn auth(&self) -> Auth<'_, B> {
        Auth {
            backend: &self.backend,
        }
    }

    /// One lightweight round trip against the backend.
    pub async fn probe(&self) -> Result<(), ClientError> {
        self.backend.probe().await.map_err(|e| {
            warn!(error = %e, "backend probe failed");
            ClientError::from(e)
        })
    }
}

// ── Tables ───────────────────────────────────────────────────────────

/// Wrapped table operations. Obtain via [`SafeClient::from`].
pub struct Table<'a, B: Backend> {
    backend: &'a B,
    name: String,
}

impl<B: Backend> Table<'_, B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read rows. Callers that only want to render can use
    /// `unwrap_or_default()` to get an empty list on failure.
    pub async fn select(&self, query: &Query) -> Result<Vec<Row>, ClientError> {
        let result = self.backend.select(&self.name, query).await;
        self.settle("select", result)
    }

    pub async fn insert(&self, rows: &serde_json::Value) -> Result<Vec<Row>, ClientError> {
        let result = self.backend.insert(&self.name, rows).await;
        self.settle("insert", result)
    }

    pub async fn update(
        &self,
        changes: &serde_json::Value,
        filter: &Query,
    ) -> Result<Vec<Row>, ClientError> {
        let result = self.backend.update(&self.name, changes, filter).await;
        self.settle("update", result)
    }

    pub async fn delete(&self, filter: &Query) -> Result<Vec<Row>, ClientError> {
        let result = self.backend.delete(&self.name, filter).await;
        self.settle("delete", result)
    }

    fn settle<T>(
        &self,
        operation: &'static str,
        result: Result<T, resilink_api::Error>,
    ) -> Result<T, ClientError> {
        result.map_err(|e| {
            error!(table = %self.name, operation, error = %e, "table operation failed");
            ClientError::from(e)
        })
    }
}

// ── Storage ──────────────────────────────────────────────────────────

/// Wrapped object-storage operations. Obtain via [`SafeClient::storage`].
pub struct Bucket<'a, B: Backend> {
    backend: &'a B,
    name: String,
}

impl<B: Backend> Bucket<'_, B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn upload(
        &self,
        path: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> Result<StoredObject, ClientError> {
        let result = self.backend.upload(&self.name, path, body, options).await;
        self.settle("upload", path, result)
    }

    pub async fn download(&self, path: &str) -> Result<Bytes, ClientError> {
        let result = self.backend.download(&self.name, path).await;
        self.settle("download", path, result)
    }

    /// Public URL of an object. Computed locally.
    pub fn get_public_url(&self, path: &str) -> Result<Url, ClientError> {
        let result = self.backend.public_url(&self.name, path);
        self.settle("get_public_url", path, result)
    }

    fn settle<T>(
        &self,
        operation: &'static str,
        path: &str,
        result: Result<T, resilink_api::Error>,
    ) -> Result<T, ClientError> {
        result.map_err(|e| {
            error!(bucket = %self.name, path, operation, error = %e, "storage operation failed");
            ClientError::from(e)
        })
    }
}

// ── Auth ─────────────────────────────────────────────────────────────

/// Wrapped auth operations. Obtain via [`SafeClient::auth`].
pub struct Auth<'a, B: Backend> {
    backend: &'a B,
}

impl<B: Backend> Auth<'_, B> {
    /// Current session. `unwrap_or_default()` treats failure as signed out.
    pub async fn get_session(&self) -> Result<Option<Session>, ClientError> {
        self.backend.session().await.map_err(|e| {
            error!(operation = "get_session", error = %e, "auth operation failed");
            ClientError::from(e)
        })
    }

    pub async fn sign_out(&self) -> Result<(), ClientError> {
        self.backend.sign_out().await.map_err(|e| {
            error!(operation = "sign_out", error = %e, "auth operation failed");
            ClientError::from(e)
        })
    }

    /// Register an auth listener. Never fails: when registration is refused
    /// the returned subscription is inert and its `unsubscribe()` does nothing.
    pub fn on_auth_state_change(&self, callback: AuthCallback) -> AuthSubscription {
        match self.backend.on_auth_state_change(callback) {
            Ok(listener) => AuthSubscription::Active(listener),
            Err(e) => {
                error!(operation = "on_auth_state_change", error = %e, "auth listener not registered");
                AuthSubscription::Inert
            }
        }
    }
}

/// Handle returned by [`Auth::on_auth_state_change`].
#[derive(Debug, Clone)]
pub enum AuthSubscription {
    Active(AuthListener),
    /// Registration failed; nothing to undo.
    Inert,
}

impl AuthSubscription {
    pub fn unsubscribe(&self) {
        if let Self::Active(listener) = self {
            listener.unsubscribe();
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}
