// ── Realtime channel abstraction ──
//
// A `ChannelHandle` is created per chat room. It is either backed by a live
// backend channel or, when fallback mode is on or the backend refuses to
// create a channel, by a local mock with the same surface. The choice is
// made once at creation: a mocked handle never turns live.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use resilink_api::{Backend, EventCallback, LiveChannel, LiveSubscription, RealtimeMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::SafeClient;
use crate::config::FallbackState;
use crate::error::ClientError;

/// Delay before a mocked channel reports itself connected.
pub const SIMULATED_CONNECT_DELAY: Duration = Duration::from_millis(500);

/// Event name that receives connection notices.
pub const SYSTEM_EVENT: &str = "system";

/// Topic for a chat room.
pub fn room_topic(room_id: &str) -> String {
    format!("room:{room_id}")
}

// ── ChannelHandle ────────────────────────────────────────────────────

/// Which implementation a handle ended up with.
#[derive(Debug)]
pub enum ChannelState {
    Live(LiveChannel),
    Mocked(MockChannel),
}

/// Per-room publish/subscribe handle. Dropping it closes the channel.
#[derive(Debug)]
pub struct ChannelHandle {
    topic: String,
    state: ChannelState,
}

impl ChannelHandle {
    /// Create the handle for `room_id`. Never fails: any problem obtaining a
    /// live channel yields a mocked one.
    pub fn open<B: Backend>(backend: &B, fallback: &FallbackState, room_id: &str) -> Self {
        let topic = room_topic(room_id);

        if fallback.is_in_fallback_mode() {
            info!(%topic, "fallback mode on, using mock channel");
            return Self::mocked(topic);
        }

        match backend.channel(&topic) {
            Ok(live) => {
                debug!(%topic, "live channel created");
                Self {
                    topic,
                    state: ChannelState::Live(live),
                }
            }
            Err(e) => {
                warn!(%topic, error = %e, "channel creation failed, using mock channel");
                Self::mocked(topic)
            }
        }
    }

    fn mocked(topic: String) -> Self {
        let mock = MockChannel::new(&topic);
        Self {
            topic,
            state: ChannelState::Mocked(mock),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, ChannelState::Live(_))
    }

    pub fn is_mocked(&self) -> bool {
        matches!(self.state, ChannelState::Mocked(_))
    }

    /// Register `callback` for `event`.
    pub fn on(&self, event: &str, callback: EventCallback) -> Subscription {
        match &self.state {
            ChannelState::Live(live) => Subscription::Live(live.on(event, callback)),
            ChannelState::Mocked(mock) => Subscription::Mocked(mock.on(event, callback)),
        }
    }

    /// Join the channel. `unsubscribe()` on the result tears it down.
    pub fn subscribe(&self) -> Subscription {
        match &self.state {
            ChannelState::Live(live) => Subscription::Live(live.subscribe()),
            ChannelState::Mocked(mock) => Subscription::Mocked(mock.subscribe()),
        }
    }

    /// Broadcast to the room. Mocked channels drop the message.
    pub fn send(&self, event: &str, payload: serde_json::Value) -> Result<(), ClientError> {
        match &self.state {
            ChannelState::Live(live) => live.send_broadcast(event, payload).map_err(|e| {
                warn!(topic = %self.topic, event, error = %e, "broadcast failed");
                ClientError::from(e)
            }),
            ChannelState::Mocked(_) => {
                debug!(topic = %self.topic, event, "mock channel dropped broadcast");
                Ok(())
            }
        }
    }
}

impl<B: Backend> SafeClient<B> {
    /// Realtime handle for `room_id`, honoring the fallback flag.
    pub fn channel(&self, room_id: &str) -> ChannelHandle {
        ChannelHandle::open(self.backend().as_ref(), &self.runtime().fallback, room_id)
    }
}

/// Handle returned by [`ChannelHandle::on`] and [`ChannelHandle::subscribe`].
#[derive(Debug, Clone)]
pub enum Subscription {
    Live(LiveSubscription),
    Mocked(MockSubscription),
}

impl Subscription {
    /// Safe to call more than once.
    pub fn unsubscribe(&self) {
        match self {
            Self::Live(sub) => sub.unsubscribe(),
            Self::Mocked(sub) => sub.unsubscribe(),
        }
    }
}

// ── Mock channel ─────────────────────────────────────────────────────

struct MockEntry {
    id: u64,
    callback: EventCallback,
    timer: CancellationToken,
}

/// Event name → at most one callback.
struct MockRegistry {
    topic: String,
    entries: Mutex<HashMap<String, MockEntry>>,
    next_id: AtomicU64,
}

impl MockRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MockEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Callback currently registered under `event` with registration `id`.
    fn current(&self, event: &str, id: u64) -> Option<EventCallback> {
        self.lock()
            .get(event)
            .filter(|entry| entry.id == id)
            .map(|entry| Arc::clone(&entry.callback))
    }

    fn remove(&self, event: &str, id: u64) {
        let mut entries = self.lock();
        if entries.get(event).is_some_and(|entry| entry.id == id) {
            if let Some(entry) = entries.remove(event) {
                entry.timer.cancel();
            }
        }
    }

    fn clear(&self) {
        for (_, entry) in self.lock().drain() {
            entry.timer.cancel();
        }
    }
}

/// Local stand-in for a realtime channel while the backend is unreachable.
pub struct MockChannel {
    registry: Arc<MockRegistry>,
}

impl MockChannel {
    pub fn new(topic: &str) -> Self {
        Self {
            registry: Arc::new(MockRegistry {
                topic: topic.to_owned(),
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `callback` for `event`, replacing any earlier one.
    ///
    /// A `"system"` listener receives a simulated connected notice after
    /// [`SIMULATED_CONNECT_DELAY`] unless it is unsubscribed first.
    pub fn on(&self, event: &str, callback: EventCallback) -> MockSubscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let timer = CancellationToken::new();

        let replaced = self.registry.lock().insert(
            event.to_owned(),
            MockEntry {
                id,
                callback,
                timer: timer.clone(),
            },
        );
        if let Some(old) = replaced {
            old.timer.cancel();
        }

        if event == SYSTEM_EVENT {
            self.schedule_connected(id, timer);
        }

        MockSubscription {
            kind: MockKind::Listener {
                event: event.to_owned(),
                id,
            },
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Nothing to join; the returned handle clears every callback.
    pub fn subscribe(&self) -> MockSubscription {
        debug!(topic = %self.registry.topic, "mock channel subscribed");
        MockSubscription {
            kind: MockKind::Channel,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of registered callbacks.
    pub fn listener_count(&self) -> usize {
        self.registry.lock().len()
    }

    fn schedule_connected(&self, id: u64, timer: CancellationToken) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(topic = %self.registry.topic, "no async runtime, connected notice not scheduled");
            return;
        };
        let registry = Arc::downgrade(&self.registry);
        runtime.spawn(async move {
            tokio::select! {
                biased;
                () = timer.cancelled() => {}
                () = tokio::time::sleep(SIMULATED_CONNECT_DELAY) => {
                    let Some(registry) = registry.upgrade() else { return };
                    if let Some(callback) = registry.current(SYSTEM_EVENT, id) {
                        callback(Arc::new(RealtimeMessage::connected(&registry.topic)));
                    }
                }
            }
        });
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.registry.clear();
    }
}

impl std::fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChannel")
            .field("topic", &self.registry.topic)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum MockKind {
    Listener { event: String, id: u64 },
    Channel,
}

/// Subscription on a [`MockChannel`].
#[derive(Clone)]
pub struct MockSubscription {
    kind: MockKind,
    registry: Weak<MockRegistry>,
}

impl MockSubscription {
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match &self.kind {
            MockKind::Listener { event, id } => registry.remove(event, *id),
            MockKind::Channel => registry.clear(),
        }
    }
}

impl std::fmt::Debug for MockSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSubscription")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
