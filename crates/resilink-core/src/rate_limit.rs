// ── Rate limiter ──
//
// In-memory sliding-window throttle for sensitive user actions, checked
// before a request reaches the network. Keys are `"{action}_{identifier}"`;
// each key holds the timestamps of recently allowed requests, oldest first.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ClientError;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Identifier used when the caller has none.
pub const ANONYMOUS: &str = "anonymous";

/// Idle keys are swept once every this many checks.
const SWEEP_EVERY: u64 = 256;

// ── Actions ──────────────────────────────────────────────────────────

/// Throttled user actions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(serialize_all = "camelCase")]
pub enum RateAction {
    Login,
    Signup,
    ResetPassword,
    FileUpload,
    MessagePost,
    MessagePostDaily,
    JobPost,
    ContestPost,
    WorkUpload,
}

/// `requests` allowed per sliding `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: usize,
    pub window: Duration,
}

impl RateAction {
    pub fn limit(self) -> RateLimit {
        let (requests, window) = match self {
            Self::Login => (10, 15 * MINUTE),
            Self::Signup | Self::ResetPassword => (4, HOUR),
            Self::FileUpload => (10, 10 * MINUTE),
            Self::MessagePost => (30, MINUTE),
            Self::MessagePostDaily => (500, DAY),
            Self::JobPost => (5, DAY),
            Self::ContestPost => (2, DAY),
            Self::WorkUpload => (10, DAY),
        };
        RateLimit { requests, window }
    }
}

/// Longest window of any action; keys idle longer than this hold nothing.
const LONGEST_WINDOW: Duration = DAY;

// ── Decision ─────────────────────────────────────────────────────────

/// Result of a rate-limit check.
///
/// Serializes as `{"allowed": true}` or
/// `{"allowed": false, "retryAfter": 42, "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied {
        retry_after_secs: u64,
        message: String,
    },
}

impl RateDecision {
    fn denied(retry_after_secs: u64) -> Self {
        Self::Denied {
            retry_after_secs,
            message: format!("Too many requests. Try again in {retry_after_secs} seconds."),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Allowed => None,
            Self::Denied {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
        }
    }

    /// `Err(ClientError::RateLimited)` on denial.
    pub fn into_result(self) -> Result<(), ClientError> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied {
                retry_after_secs,
                message,
            } => Err(ClientError::RateLimited {
                retry_after_secs,
                message,
            }),
        }
    }
}

impl Serialize for RateDecision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Allowed => {
                let mut s = serializer.serialize_struct("RateDecision", 1)?;
                s.serialize_field("allowed", &true)?;
                s.end()
            }
            Self::Denied {
                retry_after_secs,
                message,
            } => {
                let mut s = serializer.serialize_struct("RateDecision", 3)?;
                s.serialize_field("allowed", &false)?;
                s.serialize_field("retryAfter", retry_after_secs)?;
                s.serialize_field("message", message)?;
                s.end()
            }
        }
    }
}

// ── Limiter ──────────────────────────────────────────────────────────

/// Sliding-window counters keyed by action and identifier.
///
/// Share one instance (behind an `Arc`) across the app. Each key is updated
/// atomically; different keys never contend. The two message-post windows of
/// one identifier are checked and recorded together under that identifier's
/// lock.
#[derive(Debug, Default)]
pub struct RateLimiter {
    log: DashMap<String, Vec<Instant>>,
    message_locks: DashMap<String, Arc<Mutex<()>>>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and, if allowed, record one request.
    pub fn check_limit(&self, action: RateAction, identifier: &str) -> RateDecision {
        let lock = is_message_action(action).then(|| self.message_lock(identifier));
        let held = lock
            .as_ref()
            .map(|l| l.lock().unwrap_or_else(PoisonError::into_inner));
        let decision = self.evaluate(action, identifier, Instant::now(), true);
        drop(held);
        self.maybe_sweep();
        if let RateDecision::Denied {
            retry_after_secs, ..
        } = &decision
        {
            warn!(%action, identifier, retry_after_secs, "rate limit exceeded");
        }
        decision
    }

    /// String-keyed variant. Unknown actions are always allowed.
    pub fn check_limit_named(&self, action: &str, identifier: &str) -> RateDecision {
        match action.parse::<RateAction>() {
            Ok(action) => self.check_limit(action, identifier),
            Err(_) => {
                debug!(action, "no rate limit configured for action");
                RateDecision::Allowed
            }
        }
    }

    /// Enforce both the per-minute and the daily message ceilings.
    ///
    /// A request is recorded against both windows only when both allow it.
    pub fn check_message_post(&self, identifier: &str) -> RateDecision {
        let decision = {
            let lock = self.message_lock(identifier);
            let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.evaluate_message_post(identifier, Instant::now())
        };
        self.maybe_sweep();
        decision
    }

    /// Caller holds the identifier's message lock.
    fn evaluate_message_post(&self, identifier: &str, now: Instant) -> RateDecision {
        for action in [RateAction::MessagePost, RateAction::MessagePostDaily] {
            let decision = self.evaluate(action, identifier, now, false);
            if !decision.is_allowed() {
                warn!(%action, identifier, "rate limit exceeded");
                return decision;
            }
        }
        self.evaluate(RateAction::MessagePost, identifier, now, true);
        self.evaluate(RateAction::MessagePostDaily, identifier, now, true);
        RateDecision::Allowed
    }

    fn message_lock(&self, identifier: &str) -> Arc<Mutex<()>> {
        let lock = self
            .message_locks
            .entry(normalize(identifier).to_owned())
            .or_default();
        Arc::clone(lock.value())
    }

    /// Requests still allowed in the current window. Records nothing.
    pub fn remaining(&self, action: RateAction, identifier: &str) -> usize {
        let limit = action.limit();
        let now = Instant::now();
        let used = self.log.get(&key(action, identifier)).map_or(0, |times| {
            times
                .iter()
                .filter(|t| now.duration_since(**t) < limit.window)
                .count()
        });
        limit.requests.saturating_sub(used)
    }

    /// Run `operation` only if `action` is allowed for `identifier`.
    pub async fn guard<T, F>(
        &self,
        action: RateAction,
        identifier: &str,
        operation: F,
    ) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        self.check_limit(action, identifier).into_result()?;
        operation.await
    }

    /// Forget the history of one key.
    pub fn reset(&self, action: RateAction, identifier: &str) {
        self.log.remove(&key(action, identifier));
    }

    /// Forget everything.
    pub fn clear_all(&self) {
        self.log.clear();
        self.message_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.log.len()
    }

    fn evaluate(
        &self,
        action: RateAction,
        identifier: &str,
        now: Instant,
        record: bool,
    ) -> RateDecision {
        let limit = action.limit();
        let mut times = self.log.entry(key(action, identifier)).or_default();
        times.retain(|t| now.duration_since(*t) < limit.window);

        if times.len() >= limit.requests {
            let oldest = times.first().copied().unwrap_or(now);
            let wait = (oldest + limit.window).saturating_duration_since(now);
            let secs = u64::try_from(wait.as_nanos().div_ceil(1_000_000_000)).unwrap_or(u64::MAX);
            return RateDecision::denied(secs);
        }

        if record {
            times.push(now);
        }
        RateDecision::Allowed
    }

    /// Drop keys whose newest entry is older than every window.
    fn maybe_sweep(&self) {
        let n = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SWEEP_EVERY != 0 {
            return;
        }
        let now = Instant::now();
        let before = self.log.len();
        self.log.retain(|_, times| {
            times
                .last()
                .is_some_and(|t| now.duration_since(*t) < LONGEST_WINDOW)
        });
        self.message_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        debug!(before, after = self.log.len(), "swept idle rate-limit keys");
    }
}

fn key(action: RateAction, identifier: &str) -> String {
    format!("{action}_{}", normalize(identifier))
}

fn normalize(identifier: &str) -> &str {
    if identifier.is_empty() {
        ANONYMOUS
    } else {
        identifier
    }
}

fn is_message_action(action: RateAction) -> bool {
    matches!(action, RateAction::MessagePost | RateAction::MessagePostDaily)
}
