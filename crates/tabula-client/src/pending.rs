// Debounced write coalescing for high-frequency field edits.
//
// Dragging a slider can produce dozens of changes per second; sending each
// one as its own mutation request floods the authority and every subscriber.
// Changes queue per entity instead: the first change opens a short window,
// further changes extend it, and on expiry the merged fields flush as a
// single `$set` descriptor.
use crate::api::RequestClient;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tabula_common::EntityId;
use tabula_patch::ChangeSet;
use tokio::task::JoinHandle;
use tokio::time::Instant;

// First queued change waits this long before flushing.
const INITIAL_WINDOW: Duration = Duration::from_millis(250);
// Each further change pushes the flush out to this far from now.
const EXTENDED_WINDOW: Duration = Duration::from_millis(500);

struct PendingChange {
    expiration: Instant,
    changes: Map<String, Value>,
}

pub struct PendingUpdates {
    state: Mutex<HashMap<EntityId, PendingChange>>,
    requests: Arc<RequestClient>,
    endpoint: String,
}

impl PendingUpdates {
    pub fn new(requests: Arc<RequestClient>, endpoint: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            requests,
            endpoint: endpoint.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityId, PendingChange>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue dotted-path field values for `id`. Later values for the same
    /// path replace earlier ones; the flush sends the merged map as one
    /// `$set` group.
    pub fn add(&self, id: EntityId, changes: Map<String, Value>) {
        let mut state = self.lock();
        match state.get_mut(&id) {
            Some(pending) => {
                pending.expiration = Instant::now() + EXTENDED_WINDOW;
                pending.changes.extend(changes);
            }
            None => {
                state.insert(
                    id,
                    PendingChange {
                        expiration: Instant::now() + INITIAL_WINDOW,
                        changes,
                    },
                );
            }
        }
    }

    /// Flush every entity whose window has expired.
    pub async fn flush_expired(&self) {
        let now = Instant::now();
        let due: Vec<(EntityId, Map<String, Value>)> = {
            let mut state = self.lock();
            let ids: Vec<EntityId> = state
                .iter()
                .filter(|(_, pending)| now > pending.expiration)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.remove(&id).map(|pending| (id, pending.changes)))
                .collect()
        };
        for (id, changes) in due {
            self.send(id, changes).await;
        }
    }

    /// Flush everything regardless of expiry; used at shutdown so queued
    /// edits are not lost.
    pub async fn flush_all(&self) {
        let due: Vec<(EntityId, Map<String, Value>)> = {
            let mut state = self.lock();
            state
                .drain()
                .map(|(id, pending)| (id, pending.changes))
                .collect()
        };
        for (id, changes) in due {
            self.send(id, changes).await;
        }
    }

    async fn send(&self, id: EntityId, changes: Map<String, Value>) {
        let mut descriptor = ChangeSet::new();
        for (path, value) in changes {
            descriptor.set(path, value);
        }
        let body = json!({"id": id.to_string(), "changes": descriptor});
        if let Err(error) = self.requests.request(&self.endpoint, body).await {
            tracing::warn!(entity = %id, %error, "pending update flush failed");
        }
    }

    /// Periodic flusher; abort the handle at shutdown.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.flush_expired().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::ScriptedApi;
    use crate::api::{ApiReply, LogNotifier};
    use serde_json::json;

    fn build(replies: usize) -> (Arc<ScriptedApi>, PendingUpdates) {
        let api = ScriptedApi::new(
            (0..replies)
                .map(|_| ApiReply::ok(json!({"status": "success"})))
                .collect(),
        );
        let requests = Arc::new(RequestClient::new(api.clone(), Arc::new(LogNotifier)));
        (api, PendingUpdates::new(requests, "/entry/update"))
    }

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn changes_coalesce_into_one_flush() {
        let (api, pending) = build(1);
        let id = EntityId::new();

        pending.add(id, fields(&[("hp", json!(7))]));
        pending.add(id, fields(&[("hp", json!(6)), ("mp", json!(2))]));

        // Still inside the extended window: nothing flushes.
        tokio::time::advance(Duration::from_millis(400)).await;
        pending.flush_expired().await;
        assert!(api.requests.lock().expect("lock").is_empty());

        tokio::time::advance(Duration::from_millis(200)).await;
        pending.flush_expired().await;

        let requests = api.requests.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        let (endpoint, body) = &requests[0];
        assert_eq!(endpoint, "/entry/update");
        assert_eq!(body["id"], json!(id.to_string()));
        assert_eq!(body["changes"], json!({"$set": {"hp": 6, "mp": 2}}));
    }

    #[tokio::test(start_paused = true)]
    async fn first_change_flushes_after_the_initial_window() {
        let (api, pending) = build(1);
        let id = EntityId::new();
        pending.add(id, fields(&[("name", json!("Bob"))]));

        tokio::time::advance(Duration::from_millis(300)).await;
        pending.flush_expired().await;
        assert_eq!(api.requests.lock().expect("lock").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entities_flush_independently() {
        let (api, pending) = build(2);
        let left = EntityId::new();
        let right = EntityId::new();
        pending.add(left, fields(&[("hp", json!(1))]));
        pending.add(right, fields(&[("hp", json!(2))]));

        tokio::time::advance(Duration::from_millis(300)).await;
        pending.flush_expired().await;
        assert_eq!(api.requests.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn flush_all_drains_unexpired_changes() {
        let (api, pending) = build(1);
        pending.add(EntityId::new(), fields(&[("hp", json!(3))]));
        pending.flush_all().await;
        assert_eq!(api.requests.lock().expect("lock").len(), 1);
    }
}
