//! Resilient fetch: the single choke point for backend HTTP traffic.
//!
//! [`Fetcher::fetch`] performs one logical request with bounded latency and
//! bounded retries and always resolves to a [`FetchResponse`]:
//!
//! - each attempt is raced against the policy's per-attempt timeout,
//! - timeouts, transport failures and 5xx responses are retried with
//!   exponential backoff,
//! - any other status (including 4xx) is returned as-is,
//! - a hard ceiling races the whole retry loop.
//!
//! Failures never surface as `Err`. Once retries are exhausted (or the
//! ceiling fires) the caller gets a synthesized `200` response whose
//! [`error`](FetchResponse::error) field is populated. Losing futures are
//! dropped, which cancels the in-flight request.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use crate::error::Error;
use crate::retry::RetryPolicy;

// ── Request ─────────────────────────────────────────────────────────

/// A request description that can be replayed on every attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    /// Add a header. Names are case-insensitive; invalid names or values
    /// are dropped with a debug log.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Some((name, value)) = parse_header(name, value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Add a header whose value must not show up in logs.
    pub fn sensitive_header(mut self, name: &str, value: &str) -> Self {
        if let Some((name, mut value)) = parse_header(name, value) {
            value.set_sensitive(true);
            self.headers.insert(name, value);
        }
        self
    }

    pub fn query(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(params);
        self
    }

    /// Attach a JSON body and the matching content type.
    pub fn json(mut self, body: &impl Serialize) -> Self {
        match serde_json::to_vec(body) {
            Ok(bytes) => {
                self.body = Some(Bytes::from(bytes));
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Err(e) => debug!(error = %e, "request body could not be serialized"),
        }
        self
    }

    /// Attach a raw body with the given content type.
    pub fn bytes(mut self, body: Bytes, content_type: &str) -> Self {
        self.body = Some(body);
        self.header("content-type", content_type)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

fn parse_header(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    let name = match HeaderName::from_bytes(name.as_bytes()) {
        Ok(n) => n,
        Err(e) => {
            debug!(header = name, error = %e, "dropping invalid header name");
            return None;
        }
    };
    match HeaderValue::from_str(value) {
        Ok(v) => Some((name, v)),
        Err(e) => {
            debug!(header = %name, error = %e, "dropping invalid header value");
            None
        }
    }
}

// ── Response ────────────────────────────────────────────────────────

/// Why a fetch gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The last attempt hit the per-attempt timeout.
    Timeout,
    /// The last attempt got a 5xx.
    ServerError,
    /// The last attempt failed below HTTP (DNS, refused, reset).
    Transport,
    /// The hard ceiling fired before the retry loop finished.
    Deadline,
}

/// Failure details embedded in a synthesized response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub message: String,
    pub kind: FailureKind,
    pub attempts: u32,
}

impl From<FetchFailure> for Error {
    fn from(failure: FetchFailure) -> Self {
        Error::Unreachable {
            attempts: failure.attempts,
            message: failure.message,
        }
    }
}

/// Outcome of a resilient fetch. Always present, never an `Err`.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    error: Option<FetchFailure>,
    synthesized: bool,
}

#[derive(Serialize)]
struct SyntheticBody<'a> {
    error: Option<SyntheticError<'a>>,
    data: serde_json::Value,
}

#[derive(Serialize)]
struct SyntheticError<'a> {
    message: &'a str,
}

impl FetchResponse {
    fn from_parts(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            error: None,
            synthesized: false,
        }
    }

    /// `{"error": null, "data": {}}` with status 200.
    pub fn empty_success() -> Self {
        let body = SyntheticBody {
            error: None,
            data: serde_json::json!({}),
        };
        Self::synthetic(&body, None)
    }

    /// `{"error": {"message": ...}, "data": null}` with status 200.
    pub fn failure(failure: FetchFailure) -> Self {
        let message = failure.message.clone();
        let body = SyntheticBody {
            error: Some(SyntheticError { message: &message }),
            data: serde_json::Value::Null,
        };
        Self::synthetic(&body, Some(failure))
    }

    fn synthetic(body: &SyntheticBody<'_>, error: Option<FetchFailure>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = serde_json::to_vec(body).map(Bytes::from).unwrap_or_default();
        Self {
            status: StatusCode::OK,
            headers,
            body,
            error,
            synthesized: true,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Populated when the fetch gave up.
    pub fn error(&self) -> Option<&FetchFailure> {
        self.error.as_ref()
    }

    /// `true` if this response was produced locally rather than by the server.
    pub fn is_synthesized(&self) -> bool {
        self.synthesized
    }

    /// Server (or synthesized) status is 2xx and no failure is embedded.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.is_success()
    }

    /// Body as lossy UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|e| {
            let body = self.text();
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    }

    /// Convert an embedded failure into an `Err`, passing real responses through.
    pub fn into_result(self) -> Result<Self, Error> {
        match self.error {
            Some(failure) => Err(failure.into()),
            None => Ok(self),
        }
    }
}

// ── Fetcher ─────────────────────────────────────────────────────────

/// Outcome of one attempt that is eligible for retry.
enum AttemptFailure {
    Timeout,
    Server(StatusCode),
    Transport(reqwest::Error),
}

impl AttemptFailure {
    fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout => FailureKind::Timeout,
            Self::Server(_) => FailureKind::ServerError,
            Self::Transport(_) => FailureKind::Transport,
        }
    }

    fn message(&self, policy: &RetryPolicy) -> String {
        match self {
            Self::Timeout => format!(
                "Request timed out after {}ms",
                policy.request_timeout().as_millis()
            ),
            Self::Server(status) => format!("Server error: {}", status.as_u16()),
            Self::Transport(e) => e.to_string(),
        }
    }
}

/// HTTP client wrapper that applies a [`RetryPolicy`] to every request.
#[derive(Debug, Clone)]
pub struct Fetcher {
    http: reqwest::Client,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(http: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { http, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Perform one logical request with retries and a hard ceiling.
    pub async fn fetch(&self, target: &str, request: &FetchRequest) -> FetchResponse {
        let Some(url) = parse_target(target) else {
            warn!(target, "malformed fetch target, returning empty response");
            return FetchResponse::empty_success();
        };

        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let hard_timeout = self.policy.hard_timeout();

        match tokio::time::timeout(hard_timeout, self.retry_loop(&url, request, &attempts)).await {
            Ok(response) => {
                debug!(
                    url = %url,
                    status = response.status().as_u16(),
                    elapsed_ms = elapsed_ms(started),
                    "fetch settled"
                );
                response
            }
            Err(_) => {
                let failure = FetchFailure {
                    message: format!(
                        "Request force timed out after {}ms",
                        hard_timeout.as_millis()
                    ),
                    kind: FailureKind::Deadline,
                    attempts: attempts.load(Ordering::Relaxed),
                };
                error!(url = %url, attempts = failure.attempts, "fetch hit hard deadline");
                FetchResponse::failure(failure)
            }
        }
    }

    /// Perform exactly one attempt (no retry, no backoff).
    ///
    /// Used by reachability probes that must answer fast.
    pub async fn fetch_once(&self, target: &str, request: &FetchRequest) -> FetchResponse {
        let Some(url) = parse_target(target) else {
            warn!(target, "malformed probe target, returning empty response");
            return FetchResponse::empty_success();
        };

        match self.attempt(&url, request).await {
            Ok(response) => response,
            Err(failure) => FetchResponse::failure(FetchFailure {
                message: failure.message(&self.policy),
                kind: failure.kind(),
                attempts: 1,
            }),
        }
    }

    async fn retry_loop(
        &self,
        url: &Url,
        request: &FetchRequest,
        attempts: &AtomicU32,
    ) -> FetchResponse {
        let mut attempt: u32 = 0;

        loop {
            attempts.store(attempt + 1, Ordering::Relaxed);

            let failure = match self.attempt(url, request).await {
                Ok(response) => return response,
                Err(failure) => failure,
            };

            if attempt >= self.policy.max_retries() {
                let message = failure.message(&self.policy);
                error!(
                    url = %url,
                    attempts = attempt + 1,
                    error = %message,
                    "request failed, retries exhausted"
                );
                return FetchResponse::failure(FetchFailure {
                    message,
                    kind: failure.kind(),
                    attempts: attempt + 1,
                });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                url = %url,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure.message(&self.policy),
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One attempt raced against the per-attempt timeout.
    async fn attempt(
        &self,
        url: &Url,
        request: &FetchRequest,
    ) -> Result<FetchResponse, AttemptFailure> {
        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let exchange = async {
            let resp = builder.send().await?;
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp.bytes().await?;
            Ok::<_, reqwest::Error>(FetchResponse::from_parts(status, headers, body))
        };

        match tokio::time::timeout(self.policy.request_timeout(), exchange).await {
            Err(_) => Err(AttemptFailure::Timeout),
            Ok(Err(e)) => Err(AttemptFailure::Transport(e)),
            Ok(Ok(resp)) if resp.status().is_server_error() => {
                Err(AttemptFailure::Server(resp.status()))
            }
            Ok(Ok(resp)) => Ok(resp),
        }
    }
}

/// Accept only absolute `http`/`https` URLs with a host.
fn parse_target(target: &str) -> Option<Url> {
    let url = Url::parse(target).ok()?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Some(url),
        _ => None,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_targets() {
        assert!(parse_target("").is_none());
        assert!(parse_target("not a url").is_none());
        assert!(parse_target("/rest/v1/profiles").is_none());
        assert!(parse_target("ftp://example.com/file").is_none());
        assert!(parse_target("https://example.com/rest/v1/profiles").is_some());
    }

    #[test]
    fn empty_success_has_null_error_and_empty_data() {
        let resp = FetchResponse::empty_success();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.is_synthesized());
        assert!(resp.is_success());
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body, serde_json::json!({ "error": null, "data": {} }));
    }

    #[test]
    fn failure_keeps_ok_status_with_embedded_error() {
        let resp = FetchResponse::failure(FetchFailure {
            message: "Server error: 503".into(),
            kind: FailureKind::ServerError,
            attempts: 4,
        });
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.is_success());
        let body: serde_json::Value = resp.json().unwrap();
        assert_eq!(body["error"]["message"], "Server error: 503");
        assert!(body["data"].is_null());

        match resp.into_result() {
            Err(Error::Unreachable { attempts, message }) => {
                assert_eq!(attempts, 4);
                assert_eq!(message, "Server error: 503");
            }
            other => panic!("expected Unreachable, got {other:?}"),
        }
    }

    #[test]
    fn request_builder_collects_headers_and_query() {
        let req = FetchRequest::get()
            .header("prefer", "return=representation")
            .query([("select".to_string(), "*".to_string())]);
        assert_eq!(*req.method(), Method::GET);
        assert_eq!(req.headers.get("prefer").unwrap(), "return=representation");
        assert_eq!(req.query.len(), 1);
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let req = FetchRequest::get()
            .header("Prefer", "return=representation")
            .sensitive_header("Authorization", "Bearer x");
        assert_eq!(req.headers.get("prefer").unwrap(), "return=representation");
        let auth = req.headers.get("authorization").unwrap();
        assert_eq!(auth, "Bearer x");
        assert!(auth.is_sensitive());
    }

    #[test]
    fn invalid_headers_are_dropped() {
        let req = FetchRequest::get()
            .header("bad name", "v")
            .header("x-ok", "line\nbreak")
            .sensitive_header("x-token", "\u{7f}");
        assert!(req.headers.is_empty());
    }
}
