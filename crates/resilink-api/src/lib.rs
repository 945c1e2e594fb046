// resilink-api: Resilient async transport for a hosted REST + realtime backend

pub mod backend;
pub mod error;
pub mod fetch;
pub mod realtime;
pub mod rest;
pub mod retry;
pub mod transport;

pub use backend::{
    AuthCallback, AuthEvent, AuthListener, Backend, Query, Row, Session, StoredObject,
    UploadOptions, User,
};
pub use error::Error;
pub use fetch::{FailureKind, FetchFailure, FetchRequest, FetchResponse, Fetcher};
pub use realtime::{EventCallback, LiveChannel, LiveSubscription, RealtimeMessage, ReconnectConfig};
pub use rest::auth::AuthListeners;
pub use rest::{RealtimeSettings, RestBackend};
pub use retry::RetryPolicy;
pub use transport::{TlsMode, TransportConfig};
