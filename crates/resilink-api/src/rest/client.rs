use std::sync::{Arc, RwLock};

use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

use super::auth::{AuthListener, AuthListeners};
use super::{check_status, decode_rows};
use crate::backend::{
    AuthCallback, AuthEvent, Backend, Query, Row, Session, StoredObject, UploadOptions,
};
use crate::error::Error;
use crate::fetch::{FetchRequest, Fetcher};
use crate::realtime::{LiveChannel, ReconnectConfig};
use crate::retry::RetryPolicy;
use crate::transport::TransportConfig;

/// Table probed by [`Backend::probe`].
const PROBE_TABLE: &str = "connection_test";

/// Realtime switches for a [`RestBackend`].
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub enabled: bool,
    pub reconnect: ReconnectConfig,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Backend client speaking the hosted service's REST, storage, auth and
/// realtime endpoints.
///
/// Every HTTP call carries the public `apikey` header plus a bearer token:
/// the session's access token when signed in, otherwise the anon key.
pub struct RestBackend {
    pub(super) fetcher: Fetcher,
    base_url: Url,
    anon_key: SecretString,
    pub(super) session: RwLock<Option<Session>>,
    pub(super) listeners: Arc<AuthListeners>,
    realtime: RealtimeSettings,
}

impl RestBackend {
    /// Create a backend client for the service at `base_url`.
    ///
    /// `anon_key` is installed as the `apikey` default header on the HTTP
    /// client built from `transport`.
    pub fn new(
        base_url: Url,
        anon_key: SecretString,
        transport: &TransportConfig,
        policy: RetryPolicy,
    ) -> Result<Self, Error> {
        let http = transport
            .clone()
            .with_api_key(anon_key.clone())
            .build_client()?;
        Ok(Self::with_fetcher(
            base_url,
            anon_key,
            Fetcher::new(http, policy),
        ))
    }

    /// Create a backend client around an existing [`Fetcher`].
    ///
    /// The fetcher's HTTP client is expected to carry the `apikey` header.
    pub fn with_fetcher(mut base_url: Url, anon_key: SecretString, fetcher: Fetcher) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            fetcher,
            base_url,
            anon_key,
            session: RwLock::new(None),
            listeners: AuthListeners::new(),
            realtime: RealtimeSettings::default(),
        }
    }

    /// Replace the realtime settings.
    pub fn with_realtime(mut self, realtime: RealtimeSettings) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    // ── URL builders ────────────────────────────────────────────────

    /// `base_url` + the given path segments (each percent-encoded).
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::ClientSetup(format!("base URL cannot have a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn rest_url(&self, table: &str) -> Result<Url, Error> {
        self.endpoint(["rest", "v1", table])
    }

    pub(super) fn auth_url(&self, action: &str) -> Result<Url, Error> {
        self.endpoint(["auth", "v1", action])
    }

    fn object_url(&self, public: bool, bucket: &str, path: &str) -> Result<Url, Error> {
        let path = object_path(bucket, path)?;
        let prefix: &[&str] = if public {
            &["storage", "v1", "object", "public"]
        } else {
            &["storage", "v1", "object"]
        };
        self.endpoint(
            prefix
                .iter()
                .copied()
                .chain([bucket])
                .chain(path.split('/').filter(|s| !s.is_empty())),
        )
    }

    fn realtime_url(&self) -> Result<Url, Error> {
        let mut url = self.endpoint(["realtime", "v1", "websocket"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| Error::RealtimeConnect(format!("cannot derive websocket URL from {url}")))?;
        url.query_pairs_mut()
            .append_pair("apikey", self.anon_key.expose_secret())
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    // ── Request helpers ─────────────────────────────────────────────

    /// Attach the bearer token for the current caller.
    pub(super) fn authorized(&self, request: FetchRequest) -> FetchRequest {
        let token = self.current_session().map_or_else(
            || self.anon_key.expose_secret().to_owned(),
            |s| s.access_token,
        );
        request.sensitive_header("authorization", &format!("Bearer {token}"))
    }

    async fn send_rows(&self, url: &Url, request: FetchRequest) -> Result<Vec<Row>, Error> {
        let resp = self.fetcher.fetch(url.as_str(), &request).await.into_result()?;
        let resp = check_status(resp)?;
        decode_rows(&resp)
    }
}

impl Backend for RestBackend {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, Error> {
        let url = self.rest_url(table)?;
        let request = self
            .authorized(FetchRequest::get())
            .query(query.to_read_params());
        self.send_rows(&url, request).await
    }

    async fn insert(&self, table: &str, rows: &serde_json::Value) -> Result<Vec<Row>, Error> {
        let url = self.rest_url(table)?;
        let request = self
            .authorized(FetchRequest::post())
            .header("prefer", "return=representation")
            .json(rows);
        self.send_rows(&url, request).await
    }

    async fn update(
        &self,
        table: &str,
        changes: &serde_json::Value,
        filter: &Query,
    ) -> Result<Vec<Row>, Error> {
        require_filter(table, "update", filter)?;
        let url = self.rest_url(table)?;
        let request = self
            .authorized(FetchRequest::patch())
            .header("prefer", "return=representation")
            .query(filter.filter_params())
            .json(changes);
        self.send_rows(&url, request).await
    }

    async fn delete(&self, table: &str, filter: &Query) -> Result<Vec<Row>, Error> {
        require_filter(table, "delete", filter)?;
        let url = self.rest_url(table)?;
        let request = self
            .authorized(FetchRequest::delete())
            .header("prefer", "return=representation")
            .query(filter.filter_params());
        self.send_rows(&url, request).await
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> Result<StoredObject, Error> {
        let url = self.object_url(false, bucket, path)?;
        let request = self
            .authorized(FetchRequest::post())
            .header("x-upsert", if options.upsert { "true" } else { "false" })
            .bytes(body, &options.content_type);
        let resp = self.fetcher.fetch(url.as_str(), &request).await.into_result()?;
        let resp = check_status(resp)?;
        resp.json()
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Bytes, Error> {
        let url = self.object_url(false, bucket, path)?;
        let request = self.authorized(FetchRequest::get());
        let resp = self.fetcher.fetch(url.as_str(), &request).await.into_result()?;
        let resp = check_status(resp)?;
        Ok(resp.body().clone())
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, Error> {
        self.object_url(true, bucket, path)
    }

    async fn session(&self) -> Result<Option<Session>, Error> {
        Ok(self.current_session())
    }

    async fn sign_out(&self) -> Result<(), Error> {
        self.sign_out_impl().await
    }

    fn on_auth_state_change(&self, callback: AuthCallback) -> Result<AuthListener, Error> {
        let listener = self.listeners.register(Arc::clone(&callback))?;
        let session = self.current_session();
        callback(AuthEvent::InitialSession, session.as_ref());
        Ok(listener)
    }

    fn channel(&self, topic: &str) -> Result<LiveChannel, Error> {
        if !self.realtime.enabled {
            return Err(Error::RealtimeDisabled);
        }
        let url = self.realtime_url()?;
        let channel = LiveChannel::new(topic, url, self.realtime.reconnect.clone());
        Ok(match self.current_session() {
            Some(session) => channel.with_access_token(SecretString::from(session.access_token)),
            None => channel,
        })
    }

    async fn probe(&self) -> Result<(), Error> {
        let url = self.rest_url(PROBE_TABLE)?;
        let request = self.authorized(FetchRequest::get()).query([
            ("select".to_string(), "*".to_string()),
            ("limit".to_string(), "1".to_string()),
        ]);
        let resp = self
            .fetcher
            .fetch_once(url.as_str(), &request)
            .await
            .into_result()?;
        check_status(resp)?;
        debug!("backend probe succeeded");
        Ok(())
    }
}

fn require_filter(table: &str, operation: &'static str, filter: &Query) -> Result<(), Error> {
    if filter.is_unfiltered() {
        return Err(Error::UnfilteredWrite {
            table: table.to_owned(),
            operation,
        });
    }
    Ok(())
}

/// Validate a storage location and strip leading slashes from the path.
fn object_path<'a>(bucket: &str, path: &'a str) -> Result<&'a str, Error> {
    if bucket.trim().is_empty() {
        return Err(Error::Storage {
            bucket: bucket.to_owned(),
            message: "bucket name is empty".into(),
        });
    }
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(Error::Storage {
            bucket: bucket.to_owned(),
            message: "object path is empty".into(),
        });
    }
    Ok(trimmed)
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url.as_str())
            .field("realtime", &self.realtime.enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn backend(base: &str) -> RestBackend {
        RestBackend::new(
            Url::parse(base).unwrap(),
            SecretString::from("anon-key".to_string()),
            &TransportConfig::default(),
            RetryPolicy::web(),
        )
        .unwrap()
    }

    #[test]
    fn public_url_points_at_public_object_path() {
        let b = backend("https://proj.example.co");
        let url = b.public_url("avatars", "/users/u-1/me.png").unwrap();
        assert_eq!(
            url.as_str(),
            "https://proj.example.co/storage/v1/object/public/avatars/users/u-1/me.png"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let b = backend("https://gateway.example.com/project");
        let url = b.rest_url("messages").unwrap();
        assert_eq!(url.as_str(), "https://gateway.example.com/project/rest/v1/messages");
    }

    #[test]
    fn empty_storage_locations_are_rejected() {
        let b = backend("https://proj.example.co");
        assert!(matches!(b.public_url("", "a.png"), Err(Error::Storage { .. })));
        assert!(matches!(b.public_url("avatars", "//"), Err(Error::Storage { .. })));
    }

    #[test]
    fn realtime_url_switches_scheme_and_carries_key() {
        let b = backend("https://proj.example.co");
        let url = b.realtime_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/realtime/v1/websocket");
        let pairs: Vec<_> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("apikey".to_string(), "anon-key".to_string())));
        assert!(pairs.contains(&("vsn".to_string(), "1.0.0".to_string())));

        let local = backend("http://127.0.0.1:54321");
        assert_eq!(local.realtime_url().unwrap().scheme(), "ws");
    }

    #[test]
    fn disabled_realtime_refuses_channels() {
        let b = backend("https://proj.example.co").with_realtime(RealtimeSettings {
            enabled: false,
            ..RealtimeSettings::default()
        });
        assert!(matches!(b.channel("room:1"), Err(Error::RealtimeDisabled)));
    }

    #[test]
    fn channel_topic_is_prefixed() {
        let b = backend("https://proj.example.co");
        assert_eq!(b.channel("room:1").unwrap().topic(), "realtime:room:1");
    }
}
