// Shared in-memory backend for resilink-core integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use resilink_api::{
    AuthCallback, AuthEvent, AuthListener, AuthListeners, Backend, Error, LiveChannel, Query,
    ReconnectConfig, Row, Session, StoredObject, UploadOptions,
};
use resilink_core::{Platform, RuntimeConfig, SafeClient};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Ok,
    Fail,
    Hang,
}

pub struct FakeBackend {
    pub rows: Mutex<Vec<Row>>,
    pub failing: AtomicBool,
    pub probe: Mutex<Probe>,
    pub probe_calls: AtomicUsize,
    pub session: Mutex<Option<Session>>,
    pub session_fails: AtomicBool,
    pub listeners: Arc<AuthListeners>,
    pub listeners_refused: AtomicBool,
    pub channel_refused: AtomicBool,
    pub channel_calls: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            probe: Mutex::new(Probe::Ok),
            probe_calls: AtomicUsize::new(0),
            session: Mutex::new(None),
            session_fails: AtomicBool::new(false),
            listeners: AuthListeners::new(),
            listeners_refused: AtomicBool::new(false),
            channel_refused: AtomicBool::new(false),
            channel_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeBackend {
    pub fn failing() -> Self {
        let fake = Self::default();
        fake.failing.store(true, Ordering::SeqCst);
        fake
    }

    pub fn with_probe(self, probe: Probe) -> Self {
        *self.probe.lock().unwrap() = probe;
        self
    }

    pub fn with_session(self, user_id: &str) -> Self {
        *self.session.lock().unwrap() = Some(session(user_id));
        self
    }

    fn outage() -> Error {
        Error::Unreachable {
            attempts: 4,
            message: "Server error: 503".into(),
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Self::outage())
        } else {
            Ok(())
        }
    }
}

pub fn session(user_id: &str) -> Session {
    serde_json::from_value(serde_json::json!({
        "access_token": "jwt",
        "user": { "id": user_id }
    }))
    .unwrap()
}

impl Backend for FakeBackend {
    async fn select(&self, _table: &str, _query: &Query) -> Result<Vec<Row>, Error> {
        self.check()?;
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn insert(&self, _table: &str, rows: &serde_json::Value) -> Result<Vec<Row>, Error> {
        self.check()?;
        self.rows.lock().unwrap().push(rows.clone());
        Ok(vec![rows.clone()])
    }

    async fn update(
        &self,
        _table: &str,
        changes: &serde_json::Value,
        _filter: &Query,
    ) -> Result<Vec<Row>, Error> {
        self.check()?;
        Ok(vec![changes.clone()])
    }

    async fn delete(&self, _table: &str, _filter: &Query) -> Result<Vec<Row>, Error> {
        self.check()?;
        Ok(std::mem::take(&mut *self.rows.lock().unwrap()))
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        _body: Bytes,
        _options: &UploadOptions,
    ) -> Result<StoredObject, Error> {
        self.check()?;
        Ok(StoredObject {
            key: format!("{bucket}/{path}"),
        })
    }

    async fn download(&self, _bucket: &str, _path: &str) -> Result<Bytes, Error> {
        self.check()?;
        Ok(Bytes::from_static(b"content"))
    }

    fn public_url(&self, bucket: &str, path: &str) -> Result<Url, Error> {
        if bucket.is_empty() {
            return Err(Error::Storage {
                bucket: bucket.into(),
                message: "bucket name is empty".into(),
            });
        }
        Ok(Url::parse(&format!("https://fake.test/storage/v1/object/public/{bucket}/{path}")).unwrap())
    }

    async fn session(&self) -> Result<Option<Session>, Error> {
        if self.session_fails.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        Ok(self.session.lock().unwrap().clone())
    }

    async fn sign_out(&self) -> Result<(), Error> {
        self.check()?;
        *self.session.lock().unwrap() = None;
        self.listeners.notify(AuthEvent::SignedOut, None);
        Ok(())
    }

    fn on_auth_state_change(&self, callback: AuthCallback) -> Result<AuthListener, Error> {
        if self.listeners_refused.load(Ordering::SeqCst) {
            return Err(Error::Listener("refused".into()));
        }
        self.listeners.register(callback)
    }

    fn channel(&self, topic: &str) -> Result<LiveChannel, Error> {
        self.channel_calls.fetch_add(1, Ordering::SeqCst);
        if self.channel_refused.load(Ordering::SeqCst) {
            return Err(Error::RealtimeDisabled);
        }
        let url = Url::parse("ws://127.0.0.1:9/realtime/v1/websocket").unwrap();
        Ok(LiveChannel::new(topic, url, ReconnectConfig::default()))
    }

    async fn probe(&self) -> Result<(), Error> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let probe = *self.probe.lock().unwrap();
        match probe {
            Probe::Ok => Ok(()),
            Probe::Fail => Err(Self::outage()),
            Probe::Hang => std::future::pending().await,
        }
    }
}

pub fn client(backend: FakeBackend, platform: Platform) -> (Arc<FakeBackend>, SafeClient<FakeBackend>) {
    let backend = Arc::new(backend);
    let client = SafeClient::new(Arc::clone(&backend), RuntimeConfig::for_platform(platform));
    (backend, client)
}
