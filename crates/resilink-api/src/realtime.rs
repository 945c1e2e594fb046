//! Live realtime channel over the backend's Phoenix-protocol WebSocket.
//!
//! A [`LiveChannel`] is created per topic but does not connect until
//! [`subscribe`](LiveChannel::subscribe) is called. The background task then
//! joins `realtime:{topic}`, sends a heartbeat every 30 seconds, and
//! reconnects with exponential backoff + jitter when the socket drops.
//!
//! Incoming frames are dispatched to callbacks registered with
//! [`on`](LiveChannel::on) by event name. Broadcast frames are dispatched
//! under the event name carried inside their payload. Callbacks registered
//! for `"*"` see every message.
//!
//! ```rust,ignore
//! let channel = backend.channel("room:42")?;
//! let _typing = channel.on("typing", Arc::new(|msg| println!("{:?}", msg.payload)));
//! let subscription = channel.subscribe();
//! channel.send_broadcast("typing", serde_json::json!({ "user": "u-1" }))?;
//! subscription.unsubscribe();
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_TOPIC: &str = "phoenix";
const WILDCARD: &str = "*";

// ── RealtimeMessage ──────────────────────────────────────────────────

/// One Phoenix frame: `{topic, event, payload, ref}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl RealtimeMessage {
    /// The `{type: "system", event: "connected", timestamp}` notice
    /// delivered to `"system"` listeners once a join is acknowledged.
    pub fn connected(topic: &str) -> Self {
        Self {
            topic: topic.to_owned(),
            event: "system".into(),
            payload: json!({
                "type": "system",
                "event": "connected",
                "timestamp": chrono::Utc::now().timestamp_millis(),
            }),
            reference: None,
        }
    }
}

/// Callback invoked for every dispatched message.
pub type EventCallback = Arc<dyn Fn(Arc<RealtimeMessage>) + Send + Sync>;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for WebSocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── LiveChannel ──────────────────────────────────────────────────────

struct Listener {
    event: String,
    callback: EventCallback,
}

struct ChannelShared {
    topic: String,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl ChannelShared {
    fn add(&self, event: &str, callback: EventCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            id,
            Listener {
                event: event.to_owned(),
                callback,
            },
        );
        id
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `message` to listeners of its event and to wildcard listeners.
    /// Callbacks run outside the lock.
    fn dispatch(&self, message: RealtimeMessage) {
        let targets: Vec<EventCallback> = self
            .lock()
            .values()
            .filter(|l| l.event == message.event || l.event == WILDCARD)
            .map(|l| Arc::clone(&l.callback))
            .collect();
        if targets.is_empty() {
            tracing::trace!(event = %message.event, "no listener for realtime event");
            return;
        }
        let message = Arc::new(message);
        for callback in targets {
            callback(Arc::clone(&message));
        }
    }
}

/// Realtime channel bound to one backend topic.
///
/// Dropping the channel stops its background connection.
pub struct LiveChannel {
    shared: Arc<ChannelShared>,
    ws_url: Url,
    reconnect: ReconnectConfig,
    access_token: Option<SecretString>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    started: AtomicBool,
}

impl LiveChannel {
    /// Prepare a channel for `topic`. Nothing is connected yet.
    pub fn new(topic: &str, ws_url: Url, reconnect: ReconnectConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(ChannelShared {
                topic: format!("realtime:{topic}"),
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
            }),
            ws_url,
            reconnect,
            access_token: None,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            started: AtomicBool::new(false),
        }
    }

    /// Send the user's access token in the join payload.
    pub fn with_access_token(mut self, token: SecretString) -> Self {
        self.access_token = Some(token);
        self
    }

    /// Wire topic, e.g. `realtime:room:42`.
    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    /// Register `callback` for `event` (`"*"` for every message).
    pub fn on(&self, event: &str, callback: EventCallback) -> LiveSubscription {
        let id = self.shared.add(event, callback);
        LiveSubscription {
            kind: SubscriptionKind::Listener {
                id,
                shared: Arc::downgrade(&self.shared),
            },
        }
    }

    /// Start the background connection. Calling it again returns another
    /// handle to the same connection.
    pub fn subscribe(&self) -> LiveSubscription {
        if !self.started.swap(true, Ordering::SeqCst) {
            self.spawn_loop();
        }
        LiveSubscription {
            kind: SubscriptionKind::Channel {
                shared: Arc::downgrade(&self.shared),
            },
        }
    }

    /// Queue a broadcast to every other subscriber of this topic.
    ///
    /// Frames queued before the join completes are sent once connected.
    pub fn send_broadcast(&self, event: &str, payload: serde_json::Value) -> Result<(), Error> {
        if self.shared.cancel.is_cancelled() {
            return Err(Error::RealtimeConnect("channel is closed".into()));
        }
        let frame = json!({
            "topic": self.shared.topic,
            "event": "broadcast",
            "payload": { "type": "broadcast", "event": event, "payload": payload },
        });
        self.outbound_tx
            .send(frame.to_string())
            .map_err(|_| Error::RealtimeConnect("channel task has exited".into()))
    }

    /// `true` once the channel has been unsubscribed or dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    fn spawn_loop(&self) {
        let Some(outbound_rx) = self
            .outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(topic = %self.shared.topic, "no async runtime, realtime channel stays offline");
            return;
        };

        let session = ConnectionSettings {
            ws_url: self.ws_url.clone(),
            reconnect: self.reconnect.clone(),
            access_token: self.access_token.clone(),
        };
        let shared = Arc::clone(&self.shared);
        runtime.spawn(async move {
            ws_loop(session, shared, outbound_rx).await;
        });
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for LiveChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveChannel")
            .field("topic", &self.shared.topic)
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ── LiveSubscription ─────────────────────────────────────────────────

/// Handle returned by [`LiveChannel::on`] and [`LiveChannel::subscribe`].
#[derive(Debug, Clone)]
pub struct LiveSubscription {
    kind: SubscriptionKind,
}

#[derive(Debug, Clone)]
enum SubscriptionKind {
    /// A single event listener.
    Listener { id: u64, shared: Weak<ChannelShared> },
    /// The channel connection itself.
    Channel { shared: Weak<ChannelShared> },
}

impl LiveSubscription {
    /// Remove the listener, or close the connection and drop every listener.
    /// Safe to call more than once.
    pub fn unsubscribe(&self) {
        match &self.kind {
            SubscriptionKind::Listener { id, shared } => {
                if let Some(shared) = shared.upgrade() {
                    shared.remove(*id);
                }
            }
            SubscriptionKind::Channel { shared } => {
                if let Some(shared) = shared.upgrade() {
                    shared.cancel.cancel();
                    shared.clear();
                }
            }
        }
    }
}

impl std::fmt::Debug for ChannelShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelShared")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

// ── Background reconnection loop ─────────────────────────────────────

struct ConnectionSettings {
    ws_url: Url,
    reconnect: ReconnectConfig,
    access_token: Option<SecretString>,
}

/// Main loop: connect → join → read → on error, backoff → reconnect.
async fn ws_loop(
    settings: ConnectionSettings,
    shared: Arc<ChannelShared>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let mut attempt: u32 = 0;
    let cancel = shared.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&settings, &shared, &mut outbound_rx) => {
                match result {
                    Ok(()) => {
                        tracing::info!(topic = %shared.topic, "realtime socket closed, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(topic = %shared.topic, error = %e, attempt, "realtime socket error");

                        if let Some(max) = settings.reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    topic = %shared.topic,
                                    max_retries = max,
                                    "realtime reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &settings.reconnect);
                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "waiting before realtime reconnect"
                        );

                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }

    tracing::debug!(topic = %shared.topic, "realtime loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_read(
    settings: &ConnectionSettings,
    shared: &ChannelShared,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
) -> Result<(), Error> {
    tracing::info!(topic = %shared.topic, "connecting realtime socket");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(settings.ws_url.as_str())
        .await
        .map_err(|e| Error::RealtimeConnect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();
    let mut refs = FrameRefs::default();

    let join_ref = refs.next();
    let join = join_frame(
        &shared.topic,
        &join_ref,
        settings.access_token.as_ref().map(|t| t.expose_secret()),
    );
    write
        .send(Message::Text(join.into()))
        .await
        .map_err(|e| Error::RealtimeConnect(e.to_string()))?;

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    );
    let mut joined = false;

    loop {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                let frame = heartbeat_frame(&refs.next());
                write
                    .send(Message::Text(frame.into()))
                    .await
                    .map_err(|e| Error::RealtimeConnect(e.to_string()))?;
            }
            outbound = outbound_rx.recv(), if joined => {
                let Some(frame) = outbound else { return Ok(()) };
                write
                    .send(Message::Text(frame.into()))
                    .await
                    .map_err(|e| Error::RealtimeConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match handle_frame(&text, shared, &join_ref) {
                            FrameOutcome::Continue => {}
                            FrameOutcome::Joined => joined = true,
                            FrameOutcome::Closed => return Ok(()),
                            FrameOutcome::Failed(reason) => return Err(Error::RealtimeConnect(reason)),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "realtime close frame received");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(Error::RealtimeConnect(e.to_string())),
                    None => return Ok(()),
                    _ => {}
                }
            }
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────

#[derive(Default)]
struct FrameRefs(u64);

impl FrameRefs {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

fn join_frame(topic: &str, reference: &str, access_token: Option<&str>) -> String {
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false, "ack": false },
            "presence": { "key": "" },
        },
    });
    if let Some(token) = access_token {
        payload["access_token"] = json!(token);
    }
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": payload,
        "ref": reference,
    })
    .to_string()
}

fn heartbeat_frame(reference: &str) -> String {
    json!({
        "topic": HEARTBEAT_TOPIC,
        "event": "heartbeat",
        "payload": {},
        "ref": reference,
    })
    .to_string()
}

#[derive(Debug, PartialEq, Eq)]
enum FrameOutcome {
    Continue,
    Joined,
    Closed,
    Failed(String),
}

/// Parse one text frame and dispatch it to listeners.
fn handle_frame(text: &str, shared: &ChannelShared, join_ref: &str) -> FrameOutcome {
    let message: RealtimeMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse realtime frame");
            return FrameOutcome::Continue;
        }
    };

    if message.topic != shared.topic {
        return FrameOutcome::Continue;
    }

    match message.event.as_str() {
        "phx_reply" if message.reference.as_deref() == Some(join_ref) => {
            if message.payload["status"] == "ok" {
                tracing::info!(topic = %shared.topic, "realtime channel joined");
                shared.dispatch(RealtimeMessage::connected(&shared.topic));
                FrameOutcome::Joined
            } else {
                let reason = message.payload["response"].to_string();
                tracing::warn!(topic = %shared.topic, %reason, "realtime join rejected");
                FrameOutcome::Failed(format!("join rejected: {reason}"))
            }
        }
        "phx_reply" => FrameOutcome::Continue,
        "phx_close" => FrameOutcome::Closed,
        "phx_error" => FrameOutcome::Failed("channel error from server".into()),
        "broadcast" => {
            let event = message.payload["event"]
                .as_str()
                .unwrap_or("broadcast")
                .to_owned();
            shared.dispatch(RealtimeMessage {
                topic: message.topic,
                event,
                payload: message.payload["payload"].clone(),
                reference: message.reference,
            });
            FrameOutcome::Continue
        }
        _ => {
            shared.dispatch(message);
            FrameOutcome::Continue
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    fn channel() -> LiveChannel {
        let url = Url::parse("ws://127.0.0.1:1/realtime/v1/websocket").unwrap();
        LiveChannel::new("room:42", url, ReconnectConfig::default())
    }

    fn recorder() -> (EventCallback, Arc<Mutex<Vec<RealtimeMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: EventCallback = Arc::new(move |msg: Arc<RealtimeMessage>| {
            sink.lock().unwrap().push((*msg).clone());
        });
        (callback, seen)
    }

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d10 = calculate_backoff(10, &config);
        assert!(d10 <= Duration::from_secs(13), "delay {d10:?} should be capped");
        let _ = calculate_backoff(u32::MAX, &config);
    }

    #[test]
    fn topic_is_prefixed() {
        assert_eq!(channel().topic(), "realtime:room:42");
    }

    #[test]
    fn join_frame_carries_topic_ref_and_token() {
        let frame: serde_json::Value =
            serde_json::from_str(&join_frame("realtime:room:1", "1", Some("jwt"))).unwrap();
        assert_eq!(frame["event"], "phx_join");
        assert_eq!(frame["topic"], "realtime:room:1");
        assert_eq!(frame["ref"], "1");
        assert_eq!(frame["payload"]["access_token"], "jwt");
        assert_eq!(frame["payload"]["config"]["broadcast"]["self"], false);
    }

    #[test]
    fn heartbeat_targets_phoenix_topic() {
        let frame: serde_json::Value = serde_json::from_str(&heartbeat_frame("7")).unwrap();
        assert_eq!(frame["topic"], "phoenix");
        assert_eq!(frame["event"], "heartbeat");
        assert_eq!(frame["ref"], "7");
    }

    #[test]
    fn join_ack_notifies_system_listeners() {
        let ch = channel();
        let (callback, seen) = recorder();
        let _sub = ch.on("system", callback);

        let reply = json!({
            "topic": "realtime:room:42",
            "event": "phx_reply",
            "payload": { "status": "ok", "response": {} },
            "ref": "1"
        });
        let outcome = handle_frame(&reply.to_string(), &ch.shared, "1");

        assert_eq!(outcome, FrameOutcome::Joined);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload["type"], "system");
        assert_eq!(seen[0].payload["event"], "connected");
        assert!(seen[0].payload["timestamp"].is_i64());
    }

    #[test]
    fn rejected_join_fails_the_connection() {
        let ch = channel();
        let reply = json!({
            "topic": "realtime:room:42",
            "event": "phx_reply",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } },
            "ref": "1"
        });
        assert!(matches!(
            handle_frame(&reply.to_string(), &ch.shared, "1"),
            FrameOutcome::Failed(_)
        ));
    }

    #[test]
    fn broadcast_dispatches_by_inner_event_name() {
        let ch = channel();
        let (typing, typing_seen) = recorder();
        let (all, all_seen) = recorder();
        let _a = ch.on("typing", typing);
        let _b = ch.on("*", all);

        let frame = json!({
            "topic": "realtime:room:42",
            "event": "broadcast",
            "payload": { "type": "broadcast", "event": "typing", "payload": { "user": "u-1" } },
            "ref": null
        });
        handle_frame(&frame.to_string(), &ch.shared, "1");

        let typing_seen = typing_seen.lock().unwrap();
        assert_eq!(typing_seen.len(), 1);
        assert_eq!(typing_seen[0].event, "typing");
        assert_eq!(typing_seen[0].payload["user"], "u-1");
        assert_eq!(all_seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn frames_for_other_topics_are_ignored() {
        let ch = channel();
        let (callback, seen) = recorder();
        let _sub = ch.on("*", callback);

        let frame = json!({ "topic": "phoenix", "event": "phx_reply", "payload": {}, "ref": "2" });
        assert_eq!(
            handle_frame(&frame.to_string(), &ch.shared, "1"),
            FrameOutcome::Continue
        );
        assert_eq!(handle_frame("not json at all", &ch.shared, "1"), FrameOutcome::Continue);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribing_a_listener_stops_delivery() {
        let ch = channel();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = ch.on(
            "message",
            Arc::new(move |_: Arc<RealtimeMessage>| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let frame = json!({ "topic": "realtime:room:42", "event": "message", "payload": {} });
        handle_frame(&frame.to_string(), &ch.shared, "1");
        sub.unsubscribe();
        sub.unsubscribe();
        handle_frame(&frame.to_string(), &ch.shared, "1");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_unsubscribe_closes_and_clears() {
        let ch = channel();
        let (callback, _seen) = recorder();
        let _listener = ch.on("message", callback);

        // No runtime here: subscribe marks the channel started without connecting.
        let sub = ch.subscribe();
        sub.unsubscribe();

        assert!(ch.is_closed());
        assert!(ch.shared.lock().is_empty());
        assert!(ch.send_broadcast("typing", json!({})).is_err());
    }
}
