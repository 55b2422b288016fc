// Field-level reactivity: an explicit event bus instead of callback fields
// threaded through documents. View code registers interest in an event key
// (typically `"{entity_id}.{field_path}"`) and the cache dispatches on every
// observed set, so a hit-point label can update without a full re-render.
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub type EventCallback = std::sync::Arc<dyn Fn(&Value) + Send + Sync>;

/// Registration receipt; pass back to [`EventBus::deregister`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHandle {
    event: String,
    id: u64,
}

#[derive(Default)]
pub struct EventBus {
    state: Mutex<HashMap<String, Vec<(u64, EventCallback)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        event: impl Into<String>,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> EventHandle {
        let event = event.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .entry(event.clone())
            .or_default()
            .push((id, std::sync::Arc::new(callback)));
        EventHandle { event, id }
    }

    /// Deregistering an unknown handle is a no-op.
    pub fn deregister(&self, handle: &EventHandle) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(callbacks) = state.get_mut(&handle.event) {
            callbacks.retain(|(id, _)| *id != handle.id);
            if callbacks.is_empty() {
                state.remove(&handle.event);
            }
        }
    }

    pub fn dispatch(&self, event: &str, payload: &Value) {
        // Snapshot outside the lock so callbacks may (de)register freely.
        let callbacks: Vec<EventCallback> = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.get(event) {
                Some(callbacks) => callbacks.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };
        for callback in callbacks {
            (*callback)(payload);
        }
    }

    /// Dispatch `payload` at `root` and at every dotted prefix of `path`
    /// below it: `("settings", "a.b")` fires `settings`, `settings.a`,
    /// `settings.a.b`. Lets listeners watch a whole subtree of fields.
    pub fn dispatch_prefixed(&self, root: &str, path: &str, payload: &Value) {
        self.dispatch(root, payload);
        if path.is_empty() {
            return;
        }
        let mut prefix = root.to_string();
        for component in path.split('.') {
            prefix.push('.');
            prefix.push_str(component);
            self.dispatch(&prefix, payload);
        }
    }
}
