//! The manager-protocol client
//!
//! [`ManagerClient`] owns one persistent, authenticated TCP connection to the
//! PBX manager interface. A single read-loop task consumes the socket; any
//! number of concurrent callers may [`submit`](ManagerClient::submit) actions.
//! Responses are correlated to callers by action id, never by arrival order,
//! so interleaved responses to concurrently outstanding actions resolve each
//! caller with its own response.
//!
//! Connection lifecycle:
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Ready
//!                    ▲                           │ socket error / close
//!                    │        ReconnectWait ◄────┘
//!                    └──────────────┘   (backoff, ceiling → Degraded)
//! ```
//!
//! After the retry ceiling the client stays [`ConnectionState::Degraded`] and
//! fails submissions fast until [`reconnect_now`](ManagerClient::reconnect_now)
//! resets the attempt counter.
//!
//! # Example
//!
//! ```rust,no_run
//! use trunkline_manager_core::{ManagerClient, ManagerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig::new("pbx.local", "admin", "secret");
//! let client = ManagerClient::connect(config);
//! client.ready().await?;
//!
//! let mut events = client.subscribe();
//! let response = client.submit("Ping", &[]).await?;
//! println!("success: {}", response.is_success());
//!
//! while let Ok(event) = events.recv().await {
//!     println!("event: {:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::event::ManagerEvent;
use crate::protocol::{serialize_action, ManagerResponse, Message, MessageBuffer};

/// Capacity of the unsolicited-event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where the client currently is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted yet
    Disconnected,
    /// TCP connect in progress
    Connecting,
    /// Socket up, login handshake in progress
    Authenticating,
    /// Authenticated and subscribed; actions are accepted
    Ready,
    /// Connection lost, next attempt scheduled
    ReconnectWait,
    /// Retry ceiling reached; waiting for a manual reconnect
    Degraded,
    /// Deliberately shut down
    Closed,
}

/// State shared between submitting callers and the read loop.
///
/// Registering a pending action and writing its frame happen under one
/// acquisition of this lock, so the read loop can never observe a response
/// whose action id is about to be registered.
struct TxState {
    writer: Option<OwnedWriteHalf>,
    pending: HashMap<String, oneshot::Sender<ManagerResponse>>,
    next_action_id: u64,
}

struct ClientInner {
    config: ManagerConfig,
    tx: Mutex<TxState>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ManagerEvent>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    retry: Notify,
    shutdown_notify: Notify,
    shutdown: AtomicBool,
}

/// Handle to the manager connection; cheap to clone and share across tasks
#[derive(Clone)]
pub struct ManagerClient {
    inner: Arc<ClientInner>,
    supervisor: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ManagerClient {
    /// Create the client and start its connection supervisor.
    ///
    /// Returns immediately; connection progress is observable through
    /// [`state`](Self::state) / [`state_watch`](Self::state_watch), or await
    /// [`ready`](Self::ready).
    pub fn connect(config: ManagerConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(ClientInner {
            config,
            tx: Mutex::new(TxState {
                writer: None,
                pending: HashMap::new(),
                next_action_id: 0,
            }),
            state,
            events,
            read_task: Mutex::new(None),
            retry: Notify::new(),
            shutdown_notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        });
        let supervisor = tokio::spawn(run_supervisor(inner.clone()));
        Self {
            inner,
            supervisor: Arc::new(Mutex::new(Some(supervisor))),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch channel following connection state transitions
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the connection is ready.
    ///
    /// Fails with [`ManagerError::NotConnected`] if the client goes degraded
    /// or closed first.
    pub async fn ready(&self) -> ManagerResult<()> {
        let mut watch = self.inner.state.subscribe();
        loop {
            match *watch.borrow() {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Degraded | ConnectionState::Closed => {
                    return Err(ManagerError::NotConnected)
                }
                _ => {}
            }
            if watch.changed().await.is_err() {
                return Err(ManagerError::NotConnected);
            }
        }
    }

    /// Subscribe to unsolicited events, delivered in wire order
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events.subscribe()
    }

    /// Submit an action and await its correlated response.
    ///
    /// Fails fast with [`ManagerError::NotConnected`] unless the connection
    /// is ready; fails with [`ManagerError::Timeout`] when no response
    /// arrives within the configured action timeout, in which case the
    /// pending entry is removed and any late response is dropped unmatched.
    pub async fn submit(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> ManagerResult<ManagerResponse> {
        if self.state() != ConnectionState::Ready {
            return Err(ManagerError::NotConnected);
        }
        self.inner.submit_unchecked(action, params).await
    }

    /// Reset the attempt counter and retry immediately.
    ///
    /// The only way out of [`ConnectionState::Degraded`]. In any other state
    /// the request is discarded; a permit banked while the connection is
    /// healthy would otherwise fire on the first scheduled backoff after a
    /// later connection loss.
    pub fn reconnect_now(&self) {
        if *self.inner.state.borrow() != ConnectionState::Degraded {
            return;
        }
        // notify_one stores a permit, so a request that races the supervisor
        // entering its degraded wait is not lost
        self.inner.retry.notify_one();
    }

    /// Shut the connection down for good; no reconnect is scheduled
    pub async fn close(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.shutdown_notify.notify_waiters();
        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
        }
        self.inner.teardown().await;
        self.inner.set_state(ConnectionState::Closed);
    }
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, current = ?state, "manager connection state change");
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Submit without the ready-state gate; used for the login handshake
    async fn submit_unchecked(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> ManagerResult<ManagerResponse> {
        let (resolve, response) = oneshot::channel();
        let action_id;
        {
            // The read loop cannot dispatch the response until this lock is
            // released, so writing the frame and registering the pending
            // entry are atomic relative to it regardless of their order.
            let mut tx = self.tx.lock().await;
            tx.next_action_id += 1;
            action_id = tx.next_action_id.to_string();
            let frame = serialize_action(action, params, &action_id);
            match tx.writer.as_mut() {
                Some(writer) => writer
                    .write_all(&frame)
                    .await
                    .map_err(|e| ManagerError::connection(e.to_string()))?,
                None => return Err(ManagerError::NotConnected),
            }
            tx.pending.insert(action_id.clone(), resolve);
        }

        let deadline = self.config.action_timeout();
        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(response)) => Ok(response),
            // The pending entry was dropped during teardown
            Ok(Err(_)) => Err(ManagerError::ConnectionLost),
            Err(_) => {
                self.tx.lock().await.pending.remove(&action_id);
                Err(ManagerError::Timeout {
                    seconds: self.config.action_timeout_secs,
                })
            }
        }
    }

    /// Route one inbound frame: matched response, unsolicited event, or drop
    async fn dispatch(&self, message: Message) {
        let action_id = message.action_id().map(str::to_string);
        if let Some(id) = action_id {
            let resolver = self.tx.lock().await.pending.remove(&id);
            if let Some(resolver) = resolver {
                let _ = resolver.send(ManagerResponse::new(message));
                return;
            }
            // Fall through: an event frame may legitimately carry an
            // ActionID we never issued, or the action already timed out.
        }
        match ManagerEvent::from_message(&message) {
            Some(event) => {
                let _ = self.events.send(event);
            }
            None => debug!(?message, "dropping unmatched frame"),
        }
    }

    /// One full connection attempt: TCP connect, login, event subscription.
    ///
    /// On success the read loop is running and a receiver signalling its
    /// termination is returned.
    async fn connect_once(self: &Arc<Self>) -> ManagerResult<oneshot::Receiver<()>> {
        let addr = (self.config.host.as_str(), self.config.port);
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ManagerError::connection(e.to_string()))?;
        let (read_half, write_half) = stream.into_split();
        {
            let mut tx = self.tx.lock().await;
            tx.writer = Some(write_half);
        }
        let (closed_tx, closed_rx) = oneshot::channel();
        let read_task = tokio::spawn(read_loop(self.clone(), read_half, closed_tx));
        *self.read_task.lock().await = Some(read_task);

        self.set_state(ConnectionState::Authenticating);
        let login = self
            .submit_unchecked(
                "Login",
                &[
                    ("Username", self.config.username.as_str()),
                    ("Secret", self.config.secret.as_str()),
                ],
            )
            .await?;
        if !login.is_success() {
            return Err(ManagerError::auth(
                login.message_text().unwrap_or("login rejected").to_string(),
            ));
        }
        // Subscribe to the event feed before accepting external submissions
        let events = self
            .submit_unchecked("Events", &[("EventMask", "on")])
            .await?;
        if !events.is_success() {
            return Err(ManagerError::protocol(
                events
                    .message_text()
                    .unwrap_or("event subscription rejected")
                    .to_string(),
            ));
        }
        Ok(closed_rx)
    }

    /// Drop the connection halves and fail every outstanding action
    async fn teardown(&self) {
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }
        let mut tx = self.tx.lock().await;
        tx.writer = None;
        // Dropping the resolvers fails the waiting callers with ConnectionLost
        if !tx.pending.is_empty() {
            warn!(
                outstanding = tx.pending.len(),
                "failing outstanding actions on disconnect"
            );
        }
        tx.pending.clear();
    }
}

/// Consume the socket, yielding complete frames to dispatch.
///
/// Never blocks on partial data: bytes accumulate in the buffer until a
/// frame boundary is observed, then control returns to the socket.
async fn read_loop(inner: Arc<ClientInner>, mut read_half: OwnedReadHalf, closed: oneshot::Sender<()>) {
    let mut buffer = MessageBuffer::new();
    let mut chunk = [0u8; 4096];
    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                debug!("manager peer closed the connection");
                break;
            }
            Ok(n) => {
                buffer.extend(&chunk[..n]);
                while let Some(message) = buffer.next_message() {
                    inner.dispatch(message).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "manager socket read failed");
                break;
            }
        }
    }
    let _ = closed.send(());
}

/// Connection supervisor: owns the attempt counter and the single reconnect
/// timer. At most one timer is armed at a time; manual retry requests are
/// honored only from the degraded wait.
async fn run_supervisor(inner: Arc<ClientInner>) {
    let mut attempt: u32 = 0;
    loop {
        if inner.is_shutdown() {
            break;
        }
        inner.set_state(ConnectionState::Connecting);
        match inner.connect_once().await {
            Ok(mut closed) => {
                attempt = 0;
                inner.set_state(ConnectionState::Ready);
                info!(
                    host = %inner.config.host,
                    port = inner.config.port,
                    "manager connection ready"
                );
                tokio::select! {
                    _ = &mut closed => {}
                    _ = inner.shutdown_notify.notified() => {}
                }
                inner.teardown().await;
                if inner.is_shutdown() {
                    break;
                }
                warn!("manager connection lost");
            }
            Err(err) => {
                inner.teardown().await;
                if inner.is_shutdown() {
                    break;
                }
                warn!(error = %err, attempt, "manager connection attempt failed");
            }
        }

        attempt += 1;
        if attempt > inner.config.reconnect.max_attempts {
            warn!(
                attempts = attempt - 1,
                "retry ceiling reached; manager client degraded until manual reconnect"
            );
            inner.set_state(ConnectionState::Degraded);
            tokio::select! {
                _ = inner.retry.notified() => {
                    info!("manual reconnect requested");
                    attempt = 0;
                }
                _ = inner.shutdown_notify.notified() => break,
            }
            continue;
        }

        let delay = inner.config.reconnect.delay_for(attempt - 1);
        inner.set_state(ConnectionState::ReconnectWait);
        debug!(delay_ms = delay.as_millis() as u64, attempt, "reconnect scheduled");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = inner.shutdown_notify.notified() => break,
        }
    }
    inner.teardown().await;
    inner.set_state(ConnectionState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;

    fn unreachable_config() -> ManagerConfig {
        // Port 1 on loopback: connection refused immediately
        ManagerConfig::new("127.0.0.1", "admin", "secret")
            .with_port(1)
            .with_reconnect(ReconnectPolicy {
                base_delay_ms: 10,
                max_delay_ms: 50,
                max_attempts: 2,
            })
    }

    #[tokio::test]
    async fn submit_fails_fast_when_not_connected() {
        let client = ManagerClient::connect(unreachable_config());
        let err = client.submit("Ping", &[]).await.expect_err("not connected");
        assert!(matches!(err, ManagerError::NotConnected));
        client.close().await;
    }

    #[tokio::test]
    async fn exhausted_retries_leave_client_degraded() {
        let client = ManagerClient::connect(unreachable_config());
        let mut watch = client.state_watch();
        let degraded = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if *watch.borrow() == ConnectionState::Degraded {
                    break;
                }
                if watch.changed().await.is_err() {
                    panic!("state channel closed");
                }
            }
        })
        .await;
        assert!(degraded.is_ok(), "client never went degraded");

        // Degraded submissions fail fast rather than queue
        let err = client.submit("Ping", &[]).await.expect_err("degraded");
        assert!(matches!(err, ManagerError::NotConnected));
        client.close().await;
    }

    #[tokio::test]
    async fn reconnect_request_outside_degraded_is_discarded() {
        let client = ManagerClient::connect(unreachable_config());
        // Not degraded yet; this must not bank a wakeup permit
        client.reconnect_now();

        let mut watch = client.state_watch();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if *watch.borrow() == ConnectionState::Degraded {
                    break;
                }
                if watch.changed().await.is_err() {
                    panic!("state channel closed");
                }
            }
        })
        .await
        .expect("client never degraded");

        // A banked permit would kick the supervisor straight back into
        // Connecting; the degraded state must hold instead
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(client.state(), ConnectionState::Degraded);

        // From Degraded the request is honored
        client.reconnect_now();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if *watch.borrow() != ConnectionState::Degraded {
                    break;
                }
                if watch.changed().await.is_err() {
                    panic!("state channel closed");
                }
            }
        })
        .await
        .expect("manual reconnect was not honored");

        client.close().await;
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let client = ManagerClient::connect(unreachable_config());
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Closed);
    }
}
