// Persistent-connection manager: owns the QUIC session, the reconnect policy,
// and the inbound dispatch loop.
//
// Each connection epoch runs one ordered bidirectional stream. The send side
// is a single-writer loop fed by the control channel (concurrent writers on
// one QUIC stream serialize behind a lock, so we never share it); the receive
// side is read inline and fanned out through the subscription registry, which
// preserves per-pool ordering end to end.
//
// Reconnects back off exponentially from the configured base. Once the
// consecutive-failure count passes the stale threshold, the next successful
// connect first fires the stale hook: the client may have missed arbitrary
// state and the host should restart from scratch rather than trust a
// long-stale cache. Missed broadcasts are never replayed; consumers needing
// consistency after a gap re-fetch canonical state themselves.
use crate::config::ClientConfig;
use crate::frame_io::{read_frame_into, write_client_message};
use crate::subscriptions::SubscriptionRegistry;
use anyhow::Result;
use bytes::BytesMut;
use quinn::{RecvStream, SendStream};
use std::net::SocketAddr;
use std::sync::Arc;
use tabula_transport::{QuicClient, QuicConnection, TransportConfig};
use tabula_wire::{ClientMessage, ServerMessage};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Host hook fired when a reconnect succeeds after the stale threshold.
pub type StaleHook = Arc<dyn Fn() + Send + Sync>;

/// Connection endpoint and session parameters.
pub struct ConnectionOptions {
    pub addr: SocketAddr,
    pub server_name: String,
    pub quinn: quinn::ClientConfig,
    pub transport: TransportConfig,
    pub config: ClientConfig,
    /// Session token, sent once immediately after connect; the authority
    /// ignores subscribe frames until it arrives.
    pub token: String,
}

/// Running connection task. Dropping the handle without calling
/// [`shutdown`](Self::shutdown) also stops the task, just less politely.
pub struct ConnectionHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

pub fn spawn_connection(
    options: ConnectionOptions,
    registry: Arc<SubscriptionRegistry>,
    control_rx: mpsc::UnboundedReceiver<ClientMessage>,
    stale_hook: Option<StaleHook>,
) -> Result<ConnectionHandle> {
    let bind_addr: SocketAddr = "0.0.0.0:0".parse().expect("bind addr");
    let quic = QuicClient::bind(bind_addr, options.quinn.clone(), options.transport.clone())?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_connection(
        quic,
        options,
        registry,
        control_rx,
        stale_hook,
        shutdown_rx,
    ));
    Ok(ConnectionHandle {
        shutdown: shutdown_tx,
        task,
    })
}

enum EpochEnd {
    Shutdown,
    Lost,
}

async fn run_connection(
    quic: QuicClient,
    options: ConnectionOptions,
    registry: Arc<SubscriptionRegistry>,
    control_rx: mpsc::UnboundedReceiver<ClientMessage>,
    stale_hook: Option<StaleHook>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;
    let mut control_rx = Some(control_rx);

    loop {
        let rx = match control_rx.take() {
            Some(rx) => rx,
            // The control writer never returned its receiver (task failure);
            // nothing sane can continue.
            None => break,
        };
        let (end, rx) = run_epoch(
            &quic,
            &options,
            &registry,
            rx,
            &stale_hook,
            &mut shutdown_rx,
            &mut failures,
        )
        .await;
        control_rx = rx;
        registry.mark_disconnected();
        if matches!(end, EpochEnd::Shutdown) {
            break;
        }

        let delay = options.config.backoff_delay(failures);
        failures = failures.saturating_add(1);
        metrics::counter!("tabula_client_reconnects_total").increment(1);
        tracing::debug!(failures, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    registry.mark_disconnected();
}

#[allow(clippy::too_many_arguments)]
async fn run_epoch(
    quic: &QuicClient,
    options: &ConnectionOptions,
    registry: &Arc<SubscriptionRegistry>,
    mut control_rx: mpsc::UnboundedReceiver<ClientMessage>,
    stale_hook: &Option<StaleHook>,
    shutdown_rx: &mut watch::Receiver<bool>,
    failures: &mut u32,
) -> (EpochEnd, Option<mpsc::UnboundedReceiver<ClientMessage>>) {
    let connection: QuicConnection = tokio::select! {
        _ = shutdown_rx.changed() => return (EpochEnd::Shutdown, Some(control_rx)),
        result = quic.connect(options.addr, &options.server_name) => match result {
            Ok(connection) => connection,
            Err(error) => {
                tracing::debug!(%error, "connect failed");
                return (EpochEnd::Lost, Some(control_rx));
            }
        }
    };

    let (mut send, mut recv) = match connection.open_bi().await {
        Ok(streams) => streams,
        Err(error) => {
            tracing::debug!(%error, "open session stream failed");
            return (EpochEnd::Lost, Some(control_rx));
        }
    };

    // Authenticate before anything else; subscribe frames are not honored
    // until the token lands.
    let auth = ClientMessage::Auth {
        token: options.token.clone(),
    };
    if write_client_message(&mut send, &auth).await.is_err() {
        return (EpochEnd::Lost, Some(control_rx));
    }

    // Reconnecting after that many consecutive failures means an unknown
    // amount of missed state: let the host restart before resubscription.
    if *failures >= options.config.stale_threshold {
        if let Some(hook) = stale_hook.as_deref() {
            hook();
        }
    }
    *failures = 0;

    // Control frames queued against the dead epoch are stale: pending
    // subscribes are covered by the replay below, pending unsubscribes are
    // moot on a connection that starts with no server-side subscriptions.
    while control_rx.try_recv().is_ok() {}

    for pool in registry.mark_connected() {
        let replay = ClientMessage::Subscribe { pool };
        if write_client_message(&mut send, &replay).await.is_err() {
            return (EpochEnd::Lost, Some(control_rx));
        }
    }
    tracing::debug!(peer = %connection.info().peer_addr, "session established");

    // Single writer for the control stream; the reader stays on this task.
    let (stop_tx, stop_rx) = watch::channel(false);
    let writer = tokio::spawn(run_control_writer(send, control_rx, stop_rx));

    let end = read_loop(&mut recv, registry, options, shutdown_rx).await;

    let _ = stop_tx.send(true);
    drop(connection);
    match writer.await {
        Ok(rx) => (end, Some(rx)),
        Err(error) => {
            tracing::error!(%error, "control writer task failed");
            (EpochEnd::Shutdown, None)
        }
    }
}

async fn read_loop(
    recv: &mut RecvStream,
    registry: &Arc<SubscriptionRegistry>,
    options: &ConnectionOptions,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> EpochEnd {
    let mut scratch = BytesMut::with_capacity(64 * 1024);
    loop {
        let frame = tokio::select! {
            // Abandoning a partially-read frame is fine here: the connection
            // is torn down with it.
            _ = shutdown_rx.changed() => return EpochEnd::Shutdown,
            frame = read_frame_into(recv, &mut scratch, options.config.max_frame_bytes) => frame,
        };
        match frame {
            Ok(Some(frame)) => match ServerMessage::decode(frame) {
                Ok(message) => {
                    metrics::counter!("tabula_client_broadcasts_received_total").increment(1);
                    registry.dispatch(&message);
                }
                // Broadcasts are best-effort; a malformed one is logged,
                // never fatal.
                Err(error) => tracing::warn!(%error, "ignoring malformed broadcast"),
            },
            Ok(None) => {
                tracing::debug!("session stream finished");
                return EpochEnd::Lost;
            }
            Err(error) => {
                tracing::debug!(%error, "session stream failed");
                return EpochEnd::Lost;
            }
        }
    }
}

async fn run_control_writer(
    mut send: SendStream,
    mut rx: mpsc::UnboundedReceiver<ClientMessage>,
    mut stop: watch::Receiver<bool>,
) -> mpsc::UnboundedReceiver<ClientMessage> {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            message = rx.recv() => match message {
                Some(message) => {
                    if let Err(error) = write_client_message(&mut send, &message).await {
                        tracing::debug!(%error, "control writer stopped");
                        break;
                    }
                }
                // Registry gone; nothing will ever be sent again.
                None => break,
            }
        }
    }
    rx
}
