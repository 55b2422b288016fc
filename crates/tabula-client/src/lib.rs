// State-synchronization client for a virtual tabletop session.
//
// CLIENT DESIGN NOTES
// -------------------
// The pieces compose around one inbound path: the connection manager reads
// broadcast frames off the persistent QUIC stream and hands them to the
// subscription registry, which fans each one out by pool; subscribers (the
// entity cache, windows) merge change descriptors into their local documents
// through the patch algebra, consulting permissions when deciding what to
// render or allow.
//
// Key decisions:
//
// A) Single-writer per QUIC stream. Control frames (auth/subscribe/
//    unsubscribe) flow through one queue into one writer loop per epoch;
//    nothing else touches the send side, so there is no hidden lock
//    contention on the stream.
//
// B) Everything is dependency-injected. The registry, cache, event bus, and
//    request client are constructed explicitly and passed by reference; two
//    independent sessions can coexist in one process and tests wire up the
//    pieces they need in isolation.
//
// C) Delivery is at-most-once per connection epoch. A broadcast sent while
//    the socket is down is gone; the registry replays pool interest on
//    reconnect, and consumers that need consistency after a gap re-fetch
//    canonical state instead of trusting accumulated deltas.
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tabula_transport::TransportConfig;
use tokio::task::JoinHandle;

mod api;
mod cache;
mod config;
mod connection;
mod events;
mod frame_io;
mod pending;
mod session;
mod subscriptions;

pub use api::{Api, ApiReply, LogNotifier, Notifier, RequestClient, Status, failure_reason};
pub use cache::{
    ApiEntityFetcher, EntityCache, EntityFetcher, FetchedEntry, Resolved, SharedEntry,
};
pub use config::ClientConfig;
pub use connection::{ConnectionHandle, ConnectionOptions, StaleHook, spawn_connection};
pub use events::{EventBus, EventCallback, EventHandle};
pub use pending::PendingUpdates;
pub use session::Session;
pub use subscriptions::{SubscriberFn, Subscription, SubscriptionRegistry};

const PENDING_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Everything needed to start a session.
pub struct SyncOptions {
    pub addr: SocketAddr,
    pub server_name: String,
    pub quinn: quinn::ClientConfig,
    pub transport: TransportConfig,
    pub config: ClientConfig,
    pub session: Session,
    pub api: Arc<dyn Api>,
    pub notifier: Arc<dyn Notifier>,
    /// Overrides the default [`ApiEntityFetcher`] (tests, alternate
    /// protocols).
    pub fetcher: Option<Arc<dyn EntityFetcher>>,
    pub fetch_endpoint: String,
    pub update_endpoint: String,
    pub stale_hook: Option<StaleHook>,
}

impl SyncOptions {
    pub fn new(
        addr: SocketAddr,
        server_name: impl Into<String>,
        quinn: quinn::ClientConfig,
        session: Session,
        api: Arc<dyn Api>,
    ) -> Self {
        Self {
            addr,
            server_name: server_name.into(),
            quinn,
            transport: TransportConfig::default(),
            config: ClientConfig::default(),
            session,
            api,
            notifier: Arc::new(LogNotifier),
            fetcher: None,
            fetch_endpoint: "/entry/get".to_string(),
            update_endpoint: "/entry/update".to_string(),
            stale_hook: None,
        }
    }
}

/// One running sync session: the wired-up services plus the connection task.
///
/// Constructed by [`SyncClient::start`], torn down by
/// [`SyncClient::shutdown`]. All services are shared handles; clone freely.
pub struct SyncClient {
    pub registry: Arc<SubscriptionRegistry>,
    pub cache: Arc<EntityCache>,
    pub events: Arc<EventBus>,
    pub requests: Arc<RequestClient>,
    pub pending: Arc<PendingUpdates>,
    pending_task: JoinHandle<()>,
    connection: ConnectionHandle,
}

impl SyncClient {
    /// Wire up the services and spawn the connection task. Returns without
    /// waiting for the first connect; subscriptions made in the meantime are
    /// announced on establishment.
    pub fn start(options: SyncOptions) -> Result<Self> {
        let events = Arc::new(EventBus::new());
        let requests = Arc::new(RequestClient::new(
            options.api.clone(),
            options.notifier.clone(),
        ));
        requests.set_token(Some(options.session.token.clone()));

        let (registry, control_rx) = SubscriptionRegistry::new();
        let fetcher = options.fetcher.clone().unwrap_or_else(|| {
            Arc::new(ApiEntityFetcher::new(
                requests.clone(),
                options.fetch_endpoint.clone(),
            ))
        });
        let cache = EntityCache::new(fetcher, registry.clone(), events.clone());
        let pending = Arc::new(PendingUpdates::new(
            requests.clone(),
            options.update_endpoint.clone(),
        ));
        let pending_task = pending.clone().spawn(PENDING_FLUSH_INTERVAL);

        let connection = spawn_connection(
            ConnectionOptions {
                addr: options.addr,
                server_name: options.server_name,
                quinn: options.quinn,
                transport: options.transport,
                config: options.config,
                token: options.session.token.clone(),
            },
            registry.clone(),
            control_rx,
            options.stale_hook,
        )?;

        Ok(Self {
            registry,
            cache,
            events,
            requests,
            pending,
            pending_task,
            connection,
        })
    }

    /// Stop the session: flush queued edits, then close the connection.
    pub async fn shutdown(self) {
        self.pending_task.abort();
        self.pending.flush_all().await;
        self.connection.shutdown().await;
    }
}
