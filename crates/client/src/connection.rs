//! Connection manager: one WebSocket per channel group.
//!
//! A driver task owns the socket. It feeds text frames to the router, keeps
//! `ConnectionState` current and reconnects after unclean closes while the
//! group still has subscribers.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwap;
use deskpulse_protocol::{new_id, Channel};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::RealtimeConfig;
use crate::error::RealtimeError;
use crate::registry::SubscriberRegistry;
use crate::router::MessageRouter;

pub const NORMAL_CLOSE: u16 = 1000;
/// Close frame without a status code
pub const NO_STATUS_CLOSE: u16 = 1005;
/// Stream ended without a close frame, or the connect attempt failed
pub const ABNORMAL_CLOSE: u16 = 1006;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The manager's current driver. Shared with the driver so it can vacate
/// the slot in the same critical section that decides to stop.
type Slot = Arc<Mutex<Option<ConnectionHandle>>>;

fn lock_slot(slot: &Mutex<Option<ConnectionHandle>>) -> MutexGuard<'_, Option<ConnectionHandle>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Observable state of one channel group's connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    /// Successful handshakes over the manager's lifetime
    pub connects: u64,
    pub last_close_code: Option<u16>,
}

pub type SharedState = Arc<ArcSwap<ConnectionState>>;

fn update_state(state: &ArcSwap<ConnectionState>, f: impl Fn(&mut ConnectionState)) {
    state.rcu(|current| {
        let mut next = (**current).clone();
        f(&mut next);
        next
    });
}

/// Reconnect only after an unclean close, and only if someone is listening.
pub fn should_reconnect(close_code: u16, subscribers: usize) -> bool {
    close_code != NORMAL_CLOSE && subscribers > 0
}

#[derive(Debug)]
enum DriverCommand {
    Disconnect,
}

/// Handle to a running driver. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    channel: Channel,
    commands: mpsc::Sender<DriverCommand>,
}

impl ConnectionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// False once the driver task has exited.
    pub fn is_live(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Ask the driver to close with 1000. Safe from non-async contexts.
    pub fn close(&self) -> Result<(), RealtimeError> {
        self.commands
            .try_send(DriverCommand::Disconnect)
            .map_err(|_| RealtimeError::ChannelClosed)
    }
}

pub struct ConnectionManager {
    channel: Channel,
    config: Arc<RealtimeConfig>,
    registry: Arc<SubscriberRegistry>,
    state: SharedState,
    current: Slot,
}

impl ConnectionManager {
    pub fn new(channel: Channel, config: Arc<RealtimeConfig>) -> Self {
        Self {
            channel,
            config,
            registry: Arc::new(SubscriberRegistry::new()),
            state: Arc::new(ArcSwap::from_pointee(ConnectionState::default())),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Lock-free snapshot of the connection state.
    pub fn state(&self) -> Arc<ConnectionState> {
        self.state.load_full()
    }

    fn current(&self) -> MutexGuard<'_, Option<ConnectionHandle>> {
        lock_slot(&self.current)
    }

    /// Return the live driver for this group, spawning one if needed.
    pub fn get_or_create_connection(&self) -> Result<ConnectionHandle, RealtimeError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| RealtimeError::NoRuntime)?;

        let mut current = self.current();
        if let Some(handle) = current.as_ref().filter(|h| h.is_live()) {
            return Ok(handle.clone());
        }

        let url = self.config.ws_url(self.channel)?;
        let (command_tx, command_rx) = mpsc::channel(4);
        let handle = ConnectionHandle {
            id: new_id(),
            channel: self.channel,
            commands: command_tx,
        };

        info!(
            component = "connection",
            event = "ws.driver.spawned",
            connection_id = %handle.id,
            channel = %self.channel,
            url = %url,
        );

        let driver = self.driver(&handle, url);
        runtime.spawn(driver.run(command_rx));

        *current = Some(handle.clone());
        Ok(handle)
    }

    fn driver(&self, handle: &ConnectionHandle, url: String) -> Driver {
        Driver {
            connection_id: handle.id.clone(),
            channel: self.channel,
            url,
            reconnect_delay: self.config.reconnect_delay,
            router: MessageRouter::new(self.channel, self.registry.clone()),
            registry: self.registry.clone(),
            state: self.state.clone(),
            slot: self.current.clone(),
        }
    }

    /// Intentional close (1000). Cancels a pending reconnect. Returns false
    /// when there was no live driver.
    pub fn disconnect(&self) -> bool {
        match self.current().take() {
            Some(handle) if handle.is_live() => handle.close().is_ok(),
            _ => false,
        }
    }
}

enum SessionEnd {
    Requested,
    Closed(u16),
}

struct Driver {
    connection_id: String,
    channel: Channel,
    url: String,
    reconnect_delay: Duration,
    router: MessageRouter,
    registry: Arc<SubscriberRegistry>,
    state: SharedState,
    slot: Slot,
}

impl Driver {
    async fn run(self, mut commands: mpsc::Receiver<DriverCommand>) {
        loop {
            let connected = tokio::select! {
                result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
                _ = commands.recv() => {
                    self.stopped("disconnect_requested");
                    return;
                }
            };

            let end = match connected {
                Ok((socket, _response)) => {
                    self.on_open();
                    self.pump(socket, &mut commands).await
                }
                Err(e) => {
                    self.on_error(&RealtimeError::Connect(e.to_string()).to_string());
                    SessionEnd::Closed(ABNORMAL_CLOSE)
                }
            };

            let code = match end {
                SessionEnd::Requested => {
                    self.on_close(NORMAL_CLOSE);
                    self.stopped("disconnect_requested");
                    return;
                }
                SessionEnd::Closed(code) => code,
            };
            self.on_close(code);

            let Some(subscribers) = self.reconnect_or_release(code) else {
                self.stopped(if code == NORMAL_CLOSE {
                    "normal_close"
                } else {
                    "no_subscribers"
                });
                return;
            };

            update_state(&self.state, |s| s.reconnect_attempts += 1);
            info!(
                component = "connection",
                event = "ws.reconnect.scheduled",
                connection_id = %self.connection_id,
                channel = %self.channel,
                close_code = code,
                attempt = self.state.load().reconnect_attempts,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                subscribers = subscribers,
            );

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = commands.recv() => {
                    self.stopped("disconnect_requested");
                    return;
                }
            }
        }
    }

    /// Count subscribers under the manager's slot lock. When stopping, the
    /// slot is cleared before the lock is released, so a subscriber that
    /// registers after the count spawns a fresh driver instead of getting
    /// this one's handle. `None` means stop.
    fn reconnect_or_release(&self, code: u16) -> Option<usize> {
        let mut slot = lock_slot(&self.slot);
        let subscribers = self.registry.len();
        if should_reconnect(code, subscribers) {
            return Some(subscribers);
        }
        if slot.as_ref().is_some_and(|h| h.id == self.connection_id) {
            *slot = None;
        }
        None
    }

    /// Read frames until the socket closes or a disconnect is requested.
    async fn pump(&self, socket: Socket, commands: &mut mpsc::Receiver<DriverCommand>) -> SessionEnd {
        let (mut write, mut read) = socket.split();

        loop {
            tokio::select! {
                // A command or every handle dropped; both mean stop
                _ = commands.recv() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: Utf8Bytes::from_static("client disconnect"),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!(
                            component = "connection",
                            event = "ws.close.send_failed",
                            connection_id = %self.connection_id,
                            error = %e,
                        );
                    }
                    return SessionEnd::Requested;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.router.on_message(text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(
                            component = "connection",
                            event = "ws.message.binary_ignored",
                            connection_id = %self.connection_id,
                            bytes = data.len(),
                        );
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame
                            .as_ref()
                            .map(|f| u16::from(f.code))
                            .unwrap_or(NO_STATUS_CLOSE);
                        info!(
                            component = "connection",
                            event = "ws.connection.close_frame",
                            connection_id = %self.connection_id,
                            channel = %self.channel,
                            close_code = code,
                            "Server sent close frame"
                        );
                        return SessionEnd::Closed(code);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.on_error(&RealtimeError::from(e).to_string());
                        return SessionEnd::Closed(ABNORMAL_CLOSE);
                    }
                    None => return SessionEnd::Closed(ABNORMAL_CLOSE),
                }
            }
        }
    }

    fn on_open(&self) {
        update_state(&self.state, |s| {
            s.is_connected = true;
            s.last_error = None;
            s.reconnect_attempts = 0;
            s.connects += 1;
        });
        info!(
            component = "connection",
            event = "ws.connection.opened",
            connection_id = %self.connection_id,
            channel = %self.channel,
            "WebSocket connection opened"
        );
    }

    fn on_error(&self, error: &str) {
        update_state(&self.state, |s| s.last_error = Some(error.to_string()));
        warn!(
            component = "connection",
            event = "ws.connection.error",
            connection_id = %self.connection_id,
            channel = %self.channel,
            error = %error,
            "WebSocket error"
        );
    }

    fn on_close(&self, code: u16) {
        update_state(&self.state, |s| {
            s.is_connected = false;
            s.last_close_code = Some(code);
        });
        info!(
            component = "connection",
            event = "ws.connection.closed",
            connection_id = %self.connection_id,
            channel = %self.channel,
            close_code = code,
            "WebSocket connection closed"
        );
    }

    fn stopped(&self, reason: &'static str) {
        update_state(&self.state, |s| s.is_connected = false);
        info!(
            component = "connection",
            event = "ws.driver.stopped",
            connection_id = %self.connection_id,
            channel = %self.channel,
            reason = reason,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DomainFilter, Liveness};
    use crate::router::ChangeEvent;

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    fn manager(origin: String) -> ConnectionManager {
        let config = RealtimeConfig::new(origin).with_reconnect_delay(Duration::from_millis(20));
        ConnectionManager::new(Channel::Tickets, Arc::new(config))
    }

    #[test]
    fn reconnect_rule() {
        assert!(should_reconnect(ABNORMAL_CLOSE, 1));
        assert!(should_reconnect(NO_STATUS_CLOSE, 3));
        assert!(should_reconnect(1011, 1));
        assert!(!should_reconnect(NORMAL_CLOSE, 1));
        assert!(!should_reconnect(ABNORMAL_CLOSE, 0));
    }

    #[test]
    fn connecting_outside_a_runtime_fails() {
        let manager = manager("http://127.0.0.1:1".into());
        assert!(matches!(
            manager.get_or_create_connection(),
            Err(RealtimeError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn bad_origin_is_a_config_error() {
        let manager = manager("desk.example.com".into());
        assert!(matches!(
            manager.get_or_create_connection(),
            Err(RealtimeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn live_driver_is_shared_until_disconnect() {
        // Accepts TCP but never completes the handshake, so the driver stays
        // parked in its connect phase.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let manager = manager(format!("http://{addr}"));

        let first = manager.get_or_create_connection().unwrap();
        let second = manager.get_or_create_connection().unwrap();
        assert_eq!(first.id(), second.id());
        assert!(first.is_live());

        assert!(manager.disconnect());
        assert!(wait_until(|| !first.is_live()).await);
        assert!(!manager.disconnect());

        let third = manager.get_or_create_connection().unwrap();
        assert_ne!(third.id(), first.id());
        manager.disconnect();
        drop(listener);
    }

    fn spawned_slot(manager: &ConnectionManager) -> (ConnectionHandle, Driver) {
        let (commands, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle {
            id: new_id(),
            channel: manager.channel,
            commands,
        };
        *manager.current() = Some(handle.clone());
        let driver = manager.driver(&handle, "ws://127.0.0.1:1/ws".into());
        (handle, driver)
    }

    #[test]
    fn stopping_driver_vacates_the_slot() {
        let manager = manager("http://127.0.0.1:1".into());
        let (_handle, driver) = spawned_slot(&manager);

        assert_eq!(driver.reconnect_or_release(1011), None);
        assert!(manager.current().is_none());
    }

    #[test]
    fn subscriber_registered_before_the_check_keeps_the_driver() {
        let manager = manager("http://127.0.0.1:1".into());
        let (handle, driver) = spawned_slot(&manager);
        let _sub = manager.registry().register(
            DomainFilter::Channel(Channel::Tickets),
            Arc::new(|_: &Arc<ChangeEvent>, _: &Liveness| {}),
        );

        assert_eq!(driver.reconnect_or_release(1011), Some(1));
        assert_eq!(manager.current().as_ref().map(|h| h.id().to_string()), Some(handle.id));
    }

    #[test]
    fn stale_driver_leaves_a_newer_handle_alone() {
        let manager = manager("http://127.0.0.1:1".into());
        let (_old, stale) = spawned_slot(&manager);
        let (newer, _driver) = spawned_slot(&manager);

        assert_eq!(stale.reconnect_or_release(1011), None);
        assert_eq!(manager.current().as_ref().map(|h| h.id().to_string()), Some(newer.id));
    }

    #[tokio::test]
    async fn refused_connect_without_subscribers_stops() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let manager = manager(format!("http://{addr}"));
        let handle = manager.get_or_create_connection().unwrap();

        assert!(wait_until(|| !handle.is_live()).await);
        let state = manager.state();
        assert!(!state.is_connected);
        assert!(state.last_error.is_some());
        assert_eq!(state.last_close_code, Some(ABNORMAL_CLOSE));
        assert_eq!(state.reconnect_attempts, 0);
    }
}
