// Pool-keyed subscription registry and broadcast fan-out.
//
// Wire announcements follow subscriber-count transitions: a pool is announced
// to the authority only when its count goes 0→1 and revoked only on 1→0.
// While the transport is down the announcement is deferred; the connection
// manager replays every non-empty pool on (re)connection, so a fresh epoch
// starts from a consistent interest set.
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tabula_wire::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;

pub type SubscriberFn = Arc<dyn Fn(&ServerMessage) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: SubscriberFn,
}

#[derive(Default)]
struct RegistryState {
    pools: HashMap<String, Vec<Subscriber>>,
    next_id: u64,
    connected: bool,
}

pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    control: mpsc::UnboundedSender<ClientMessage>,
}

impl SubscriptionRegistry {
    /// Returns the registry and the control-frame stream consumed by the
    /// connection manager. The registry starts disconnected; announcements
    /// are deferred until [`mark_connected`](Self::mark_connected).
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ClientMessage>) {
        let (control, control_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                state: Mutex::new(RegistryState::default()),
                control,
            }),
            control_rx,
        )
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register interest in a pool. The callback runs inline on the dispatch
    /// path, in registration order relative to its siblings.
    pub fn subscribe(
        self: &Arc<Self>,
        pool: impl Into<String>,
        callback: impl Fn(&ServerMessage) + Send + Sync + 'static,
    ) -> Subscription {
        let pool = pool.into();
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        let subscribers = state.pools.entry(pool.clone()).or_default();
        let was_empty = subscribers.is_empty();
        subscribers.push(Subscriber {
            id,
            callback: Arc::new(callback),
        });
        if was_empty && state.connected {
            let _ = self.control.send(ClientMessage::Subscribe { pool: pool.clone() });
        }
        drop(state);
        Subscription {
            registry: self.clone(),
            pool,
            id,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Fan a broadcast out to every subscriber of its pool.
    ///
    /// A pool with no local subscribers is an expected race (the authority
    /// may broadcast to a pool we unsubscribed from mid-flight), so the
    /// message is dropped with a log line, never an error. A panicking
    /// callback is isolated so its siblings still run.
    pub fn dispatch(&self, message: &ServerMessage) {
        let pool = message.pool();
        let callbacks: Option<Vec<SubscriberFn>> = {
            let state = self.lock();
            state
                .pools
                .get(pool)
                .filter(|subscribers| !subscribers.is_empty())
                .map(|subscribers| {
                    subscribers
                        .iter()
                        .map(|subscriber| subscriber.callback.clone())
                        .collect()
                })
        };
        let Some(callbacks) = callbacks else {
            metrics::counter!("tabula_client_broadcasts_unroutable_total").increment(1);
            tracing::warn!(pool, "ignoring broadcast for pool with no subscribers");
            return;
        };
        metrics::counter!("tabula_client_broadcasts_dispatched_total").increment(1);
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| (*callback)(message))).is_err() {
                tracing::error!(pool, "subscriber callback panicked");
            }
        }
    }

    /// Flip to connected and return every pool that needs a subscribe
    /// announcement on the new epoch. Done in one critical section so a
    /// concurrent subscribe is either in the returned set or announces
    /// itself through the control stream, never both.
    pub(crate) fn mark_connected(&self) -> Vec<String> {
        let mut state = self.lock();
        state.connected = true;
        state
            .pools
            .iter()
            .filter(|(_, subscribers)| !subscribers.is_empty())
            .map(|(pool, _)| pool.clone())
            .collect()
    }

    pub(crate) fn mark_disconnected(&self) {
        self.lock().connected = false;
    }

    fn cancel(&self, pool: &str, id: u64) {
        let mut state = self.lock();
        let Some(subscribers) = state.pools.get_mut(pool) else {
            return;
        };
        subscribers.retain(|subscriber| subscriber.id != id);
        if subscribers.is_empty() {
            state.pools.remove(pool);
            // A fresh connection starts with no server-side subscriptions,
            // so there is nothing to revoke while disconnected.
            if state.connected {
                let _ = self.control.send(ClientMessage::Unsubscribe {
                    pool: pool.to_string(),
                });
            }
        }
    }
}

/// Interest handle owned by the subscriber (typically a window). Cancellation
/// is explicit and idempotent; dropping the handle does not cancel.
pub struct Subscription {
    registry: Arc<SubscriptionRegistry>,
    pool: String,
    id: u64,
    cancelled: AtomicBool,
}

impl Subscription {
    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.cancel(&self.pool, self.id);
    }
}
