// Canonical entity cache.
//
// Caching is caller intent: `resolve(id, cache)` only retains the document
// when asked, mirroring the difference between the locally-controlled
// character (kept hot, merged in place on every update broadcast) and a
// one-off lookup. Cached documents stay resident until a delete broadcast
// evicts them; there is no ref-counted eviction.
use crate::api::{RequestClient, Status, failure_reason};
use crate::events::EventBus;
use crate::subscriptions::{Subscription, SubscriptionRegistry};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tabula_common::{EntityId, Entry};
use tabula_patch::{ChangeOp, ChangeSet};
use tabula_wire::ServerMessage;
use tokio::sync::watch;

/// Shared handle to a cached document. Updates are merged in place, so every
/// holder observes the mutation; writes outside the change algebra bypass
/// field events and are discouraged.
pub type SharedEntry = Arc<RwLock<Entry>>;

/// Fetch result: either the full document or a permission-filtered view
/// (name visible, body redacted). `partial` is an expected alternate path,
/// not a failure.
#[derive(Debug, Clone)]
pub struct FetchedEntry {
    pub entry: Entry,
    pub partial: bool,
}

/// Resolution result handed to callers.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub entry: SharedEntry,
    pub partial: bool,
}

/// Collaborator boundary for fetching canonical documents by id.
#[async_trait]
pub trait EntityFetcher: Send + Sync {
    async fn fetch(&self, id: EntityId) -> Result<FetchedEntry>;
}

/// Default fetcher over the request envelope: POSTs `{id}` and classifies the
/// reply status; a hard failure surfaces the server-supplied reason.
pub struct ApiEntityFetcher {
    requests: Arc<RequestClient>,
    endpoint: String,
}

impl ApiEntityFetcher {
    pub fn new(requests: Arc<RequestClient>, endpoint: impl Into<String>) -> Self {
        Self {
            requests,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EntityFetcher for ApiEntityFetcher {
    async fn fetch(&self, id: EntityId) -> Result<FetchedEntry> {
        let body = self
            .requests
            .request(&self.endpoint, json!({"id": id.to_string()}))
            .await?;
        let entity = |body: &serde_json::Value| -> Result<Entry> {
            serde_json::from_value(body.get("entity").cloned().unwrap_or_default())
                .context("decode entity payload")
        };
        match Status::parse(&body) {
            Status::Success => Ok(FetchedEntry {
                entry: entity(&body)?,
                partial: false,
            }),
            Status::Partial => Ok(FetchedEntry {
                entry: entity(&body)?,
                partial: true,
            }),
            Status::Other(_) => bail!("{}", failure_reason(&body)),
        }
    }
}

struct CachedEntry {
    handle: SharedEntry,
    partial: bool,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<EntityId, CachedEntry>,
    in_flight: HashSet<EntityId>,
    // Ids deleted while their fetch was still in flight; the commit path
    // consults this so a stale fetch result is never trusted into the cache.
    tombstones: HashSet<EntityId>,
    subscriptions: HashMap<EntityId, Subscription>,
}

pub struct EntityCache {
    state: Mutex<CacheState>,
    fetcher: Arc<dyn EntityFetcher>,
    registry: Arc<SubscriptionRegistry>,
    events: Arc<EventBus>,
    // Bumped whenever an in-flight fetch settles; concurrent resolves for the
    // same id wait on this instead of issuing duplicate network calls.
    fetch_gen: watch::Sender<u64>,
}

impl EntityCache {
    pub fn new(
        fetcher: Arc<dyn EntityFetcher>,
        registry: Arc<SubscriptionRegistry>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let (fetch_gen, _) = watch::channel(0);
        Arc::new(Self {
            state: Mutex::new(CacheState::default()),
            fetcher,
            registry,
            events,
            fetch_gen,
        })
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<SharedEntry> {
        self.lock().entries.get(&id).map(|cached| cached.handle.clone())
    }

    /// Resolve a document by id.
    ///
    /// A cached id returns synchronously. Otherwise the document is fetched;
    /// with `cache = true` it is retained and a subscription on the entity's
    /// own pool keeps it current (`update` merges in place, `delete` evicts).
    pub async fn resolve(self: &Arc<Self>, id: EntityId, cache: bool) -> Result<Resolved> {
        // A nil id is a programmer error, not a lookup miss.
        if id.is_nil() {
            bail!("resolve called with the nil entity id");
        }

        loop {
            let waiter = self.fetch_gen.subscribe();
            {
                let mut state = self.lock();
                if let Some(cached) = state.entries.get(&id) {
                    return Ok(Resolved {
                        entry: cached.handle.clone(),
                        partial: cached.partial,
                    });
                }
                if !state.in_flight.contains(&id) {
                    state.in_flight.insert(id);
                    break;
                }
            }
            // Another resolve owns the fetch for this id; wait for it to
            // settle, then re-check (it may not have cached the result).
            let mut waiter = waiter;
            let _ = waiter.changed().await;
        }

        let fetched = self.fetcher.fetch(id).await;

        let (result, subscribe) = {
            let mut state = self.lock();
            state.in_flight.remove(&id);
            let tombstoned = state.tombstones.remove(&id);
            match fetched {
                Ok(FetchedEntry { entry, partial }) => {
                    let handle = Arc::new(RwLock::new(entry));
                    let mut subscribe = false;
                    if cache && !tombstoned {
                        state.entries.insert(
                            id,
                            CachedEntry {
                                handle: handle.clone(),
                                partial,
                            },
                        );
                        subscribe = true;
                    }
                    (Ok(Resolved { entry: handle, partial }), subscribe)
                }
                Err(err) => (Err(err), false),
            }
        };
        // Wake every waiter, success or not.
        self.fetch_gen.send_modify(|generation| *generation += 1);

        if subscribe {
            self.track(id);
        }
        result
    }

    /// Drop a document and tear down its update subscription. Invoked by the
    /// delete broadcast; also marks ids with an in-flight fetch so the stale
    /// result is discarded at commit.
    pub fn evict(&self, id: EntityId) {
        let (removed, subscription) = {
            let mut state = self.lock();
            if state.in_flight.contains(&id) {
                state.tombstones.insert(id);
            }
            (
                state.entries.remove(&id).is_some(),
                state.subscriptions.remove(&id),
            )
        };
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
        if removed {
            metrics::counter!("tabula_client_cache_evictions_total").increment(1);
            tracing::debug!(entity = %id, "evicted entity");
        }
    }

    // Subscribe to the entity's own pool and route update/delete broadcasts
    // back into the cache.
    fn track(self: &Arc<Self>, id: EntityId) {
        let weak = Arc::downgrade(self);
        let subscription = self.registry.subscribe(id.to_string(), move |message| {
            let Some(cache) = weak.upgrade() else {
                return;
            };
            match message {
                ServerMessage::Update {
                    id: updated,
                    changes,
                    ..
                } if *updated == id => cache.apply_update(id, changes),
                ServerMessage::Delete { id: deleted, .. } if *deleted == id => cache.evict(id),
                _ => {}
            }
        });

        let stale = {
            let mut state = self.lock();
            if state.entries.contains_key(&id) {
                state.subscriptions.insert(id, subscription)
            } else {
                // Evicted between commit and here; do not leave a live
                // subscription behind.
                Some(subscription)
            }
        };
        if let Some(stale) = stale {
            stale.cancel();
        }
    }

    fn apply_update(&self, id: EntityId, changes: &ChangeSet) {
        let handle = self.get(id);
        let Some(handle) = handle else {
            return;
        };
        let events = self.events.clone();
        let mut entry = handle.write().unwrap_or_else(|e| e.into_inner());
        entry.apply_changes(
            changes,
            Some(&mut |op, path, value| {
                if op == ChangeOp::Set {
                    events.dispatch(&format!("{id}.{path}"), value);
                }
            }),
        );
        metrics::counter!("tabula_client_cache_updates_total").increment(1);
    }
}
