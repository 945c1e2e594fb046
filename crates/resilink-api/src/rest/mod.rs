// REST/WebSocket implementation of the `Backend` trait.
//
// Tables go through `/rest/v1`, objects through `/storage/v1/object`, auth
// through `/auth/v1`, and realtime through `/realtime/v1/websocket`. All HTTP
// traffic is routed through the resilient `Fetcher`.

pub mod auth;
mod client;

pub use client::{RealtimeSettings, RestBackend};

use serde::Deserialize;

use crate::error::Error;
use crate::fetch::FetchResponse;

/// Error body shapes the backend uses across its services.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl ErrorBody {
    fn parse(resp: &FetchResponse) -> Self {
        serde_json::from_slice(resp.body()).unwrap_or_default()
    }

    fn message(&self) -> Option<String> {
        self.message
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.error_description.clone())
            .or_else(|| match &self.error {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                _ => None,
            })
    }

    fn code(&self) -> Option<String> {
        match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Best-effort human message for a non-success response.
fn error_message(resp: &FetchResponse) -> String {
    ErrorBody::parse(resp).message().unwrap_or_else(|| {
        let text = resp.text();
        if text.trim().is_empty() {
            resp.status()
                .canonical_reason()
                .unwrap_or("request failed")
                .to_owned()
        } else {
            text
        }
    })
}

/// Map a non-2xx response to `Error`, passing 2xx through.
fn check_status(resp: FetchResponse) -> Result<FetchResponse, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = ErrorBody::parse(&resp);
    let message = body.message().unwrap_or_else(|| error_message(&resp));
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication { message });
    }
    Err(Error::Backend {
        status: status.as_u16(),
        message,
        code: body.code(),
    })
}

/// Decode a table response into rows. Accepts an array, a single object,
/// or an empty body.
fn decode_rows(resp: &FetchResponse) -> Result<Vec<crate::backend::Row>, Error> {
    if resp.body().iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    match resp.json::<serde_json::Value>()? {
        serde_json::Value::Array(rows) => Ok(rows),
        serde_json::Value::Null => Ok(Vec::new()),
        row => Ok(vec![row]),
    }
}
