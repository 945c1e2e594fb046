// Auth flows for the REST backend: password sign-in, session restore,
// sign-out, and auth state listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, warn};

use super::RestBackend;
use crate::backend::{AuthCallback, AuthEvent, Session};
use crate::error::Error;
use crate::fetch::FetchRequest;

/// Listener slots per backend. Registration beyond this is refused.
pub const MAX_AUTH_LISTENERS: usize = 64;

// ── Listener registry ────────────────────────────────────────────────

/// Set of auth state callbacks, keyed by registration id.
pub struct AuthListeners {
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, AuthCallback>>,
}

impl AuthListeners {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(HashMap::new()),
        })
    }

    /// Add a callback. Fails once [`MAX_AUTH_LISTENERS`] are registered.
    pub fn register(self: &Arc<Self>, callback: AuthCallback) -> Result<AuthListener, Error> {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        if callbacks.len() >= MAX_AUTH_LISTENERS {
            return Err(Error::Listener(format!(
                "limit of {MAX_AUTH_LISTENERS} auth listeners reached"
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        callbacks.insert(id, callback);
        Ok(AuthListener {
            id,
            registry: Arc::downgrade(self),
        })
    }

    /// Invoke every callback. Callbacks run outside the registry lock.
    pub fn notify(&self, event: AuthEvent, session: Option<&Session>) {
        let snapshot: Vec<AuthCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        debug!(?event, listeners = snapshot.len(), "notifying auth listeners");
        for callback in snapshot {
            callback(event, session);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Registration handle returned by `on_auth_state_change`.
///
/// `unsubscribe()` is idempotent and safe after the backend is dropped.
#[derive(Debug, Clone)]
pub struct AuthListener {
    id: u64,
    registry: Weak<AuthListeners>,
}

impl AuthListener {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

// ── Sign-in / sign-out ───────────────────────────────────────────────

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

impl RestBackend {
    /// Exchange email + password for a session via the backend's token endpoint.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, Error> {
        let url = self.auth_url("token")?;
        let request = self
            .authorized(FetchRequest::post())
            .query([("grant_type".to_string(), "password".to_string())])
            .json(&PasswordGrant {
                email,
                password: password.expose_secret(),
            });

        let resp = self.fetcher.fetch(url.as_str(), &request).await.into_result()?;
        let status = resp.status();
        if status.is_client_error() {
            let message = super::error_message(&resp);
            warn!(status = status.as_u16(), "password sign-in rejected");
            return Err(Error::Authentication { message });
        }
        let resp = super::check_status(resp)?;
        let session: Session = resp.json()?;

        self.store_session(Some(session.clone()));
        self.listeners.notify(AuthEvent::SignedIn, Some(&session));
        Ok(session)
    }

    /// Install a previously obtained session (e.g. restored by the host app).
    pub fn set_session(&self, session: Session) {
        self.store_session(Some(session.clone()));
        self.listeners.notify(AuthEvent::SignedIn, Some(&session));
    }

    pub(super) async fn sign_out_impl(&self) -> Result<(), Error> {
        let Some(session) = self.current_session() else {
            debug!("sign-out without session, nothing to revoke");
            return Ok(());
        };

        let url = self.auth_url("logout")?;
        let request = FetchRequest::post()
            .sensitive_header("authorization", &format!("Bearer {}", session.access_token));
        let outcome = self
            .fetcher
            .fetch(url.as_str(), &request)
            .await
            .into_result()
            .and_then(super::check_status);

        // The local session is dropped even when revocation fails.
        self.store_session(None);
        self.listeners.notify(AuthEvent::SignedOut, None);

        outcome.map(|_| ())
    }

    pub(super) fn current_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_session(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> AuthCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_: AuthEvent, _: Option<&Session>| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let listeners = AuthListeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = listeners.register(counting_callback(&hits)).unwrap();

        listeners.notify(AuthEvent::SignedIn, None);
        handle.unsubscribe();
        handle.unsubscribe();
        listeners.notify(AuthEvent::SignedOut, None);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn registration_is_capped() {
        let listeners = AuthListeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..MAX_AUTH_LISTENERS {
            listeners.register(counting_callback(&hits)).unwrap();
        }
        assert!(matches!(
            listeners.register(counting_callback(&hits)),
            Err(Error::Listener(_))
        ));
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_harmless() {
        let listeners = AuthListeners::new();
        let handle = listeners
            .register(Arc::new(|_: AuthEvent, _: Option<&Session>| {}))
            .unwrap();
        drop(listeners);
        handle.unsubscribe();
    }
}
