//! Pipeline WebSocket connection lifecycle.
//!
//! One read loop task per connection consumes frames strictly in order,
//! routing each through the [`EventRouter`] before reading the next. When the
//! connection drops without a requested disconnect, the same task waits a
//! fixed delay and reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use vrclink_api::SessionProvider;

use crate::decoder::decode;
use crate::{EventRouter, PipelineError, PresenceEvent};

/// Default pipeline endpoint.
pub const DEFAULT_PIPELINE_URL: &str = "wss://pipeline.vrchat.cloud/";

type PipelineStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A disconnect was requested and the read loop is shutting down.
    Closing,
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// WebSocket URL, without the `authToken` parameter.
    pub pipeline_url: String,
    /// Reconnect after connections that were not closed by `disconnect()`.
    pub auto_reconnect: bool,
    pub reconnect_delay: Duration,
    /// A connection silent for this long is considered dead.
    pub read_timeout: Duration,
    /// Interval between client keepalive pings.
    pub ping_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            pipeline_url: DEFAULT_PIPELINE_URL.to_string(),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(2),
            read_timeout: Duration::from_secs(300),
            ping_interval: Duration::from_secs(60),
        }
    }
}

impl SupervisorConfig {
    pub fn with_pipeline_url(mut self, url: impl Into<String>) -> Self {
        self.pipeline_url = url.into();
        self
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }
}

/// Owns the pipeline connection.
///
/// Dropping the supervisor stops the read loop.
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    session: Arc<dyn SessionProvider>,
    router: EventRouter,
    config: SupervisorConfig,
    handle: Handle,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    /// Read loop tasks still alive, including their reconnect waits.
    running: watch::Sender<usize>,
    /// Set by `disconnect()`, cleared by `connect()`.
    user_disconnect: AtomicBool,
}

impl ConnectionSupervisor {
    /// Create a supervisor. The read loop is spawned on `handle`.
    pub fn new(
        session: Arc<dyn SessionProvider>,
        router: EventRouter,
        config: SupervisorConfig,
        handle: Handle,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        let (running, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                session,
                router,
                config,
                handle,
                state,
                shutdown,
                running,
                user_disconnect: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Open the pipeline connection and start the read loop.
    ///
    /// Returns once the socket is open. Fails with
    /// [`PipelineError::AlreadyConnected`] unless the state is
    /// [`ConnectionState::Disconnected`].
    pub async fn connect(&self) -> Result<(), PipelineError> {
        let inner = &self.inner;
        if !inner.transition(ConnectionState::Disconnected, ConnectionState::Connecting) {
            return Err(PipelineError::AlreadyConnected);
        }

        inner.user_disconnect.store(false, Ordering::SeqCst);
        inner.shutdown.send_replace(false);

        let stream = match inner.open().await {
            Ok(stream) => stream,
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let Some(stream) = inner.established(stream).await else {
            return Ok(());
        };
        inner.running.send_modify(|n| *n += 1);
        inner.handle.spawn(Arc::clone(inner).run(stream));
        Ok(())
    }

    /// Request the connection to close and cancel any pending reconnect.
    ///
    /// Returns immediately; the read loop sends a close frame and finishes
    /// its current event. Callbacks for events still in flight are dropped.
    pub fn disconnect(&self) {
        self.inner.request_disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|s| *s == state).await;
    }

    /// Wait until the read loop has exited with no reconnect pending.
    ///
    /// Resolves after a requested disconnect, after a drop when
    /// auto-reconnect is off, and when reconnecting gives up on an expired
    /// session. Resolves immediately if nothing is running.
    pub async fn closed(&self) {
        let mut rx = self.inner.running.subscribe();
        let _ = rx.wait_for(|running| *running == 0).await;
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.inner.request_disconnect();
    }
}

impl Inner {
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn user_requested(&self) -> bool {
        self.user_disconnect.load(Ordering::SeqCst)
    }

    fn request_disconnect(&self) {
        self.user_disconnect.store(true, Ordering::SeqCst);
        self.shutdown.send_replace(true);

        if self.transition(ConnectionState::Connected, ConnectionState::Closing) {
            info!("pipeline disconnect requested");
        } else {
            debug!(state = ?*self.state.borrow(), "disconnect requested with no open connection");
        }
    }

    fn build_url(&self, token: &str) -> String {
        let separator = if self.config.pipeline_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}authToken={}", self.config.pipeline_url, separator, token)
    }

    async fn open(&self) -> Result<PipelineStream, PipelineError> {
        let token = self.session.session_token().await?;

        info!(url = %self.config.pipeline_url, "connecting to pipeline");

        let (stream, _) = connect_async(self.build_url(&token))
            .await
            .map_err(|e| PipelineError::WebSocket(format!("connection failed: {}", e)))?;
        Ok(stream)
    }

    /// Mark a freshly opened stream as connected and fire `on_connect`.
    ///
    /// If `disconnect()` landed while the socket was opening, the stream is
    /// closed and `None` returned with no callback fired.
    async fn established(&self, mut stream: PipelineStream) -> Option<PipelineStream> {
        self.transition(ConnectionState::Connecting, ConnectionState::Connected);

        if self.user_requested() {
            info!("disconnect requested while connecting, closing");
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "failed to send close frame");
            }
            self.set_state(ConnectionState::Disconnected);
            return None;
        }

        info!("pipeline connected");
        self.router.deliver(PresenceEvent::Connected).await;
        Some(stream)
    }

    /// Read loop and reconnect cycle for one supervisor.
    async fn run(self: Arc<Self>, stream: PipelineStream) {
        self.supervise(stream).await;
        self.running.send_modify(|n| *n = n.saturating_sub(1));
    }

    async fn supervise(&self, mut stream: PipelineStream) {
        loop {
            match self.read_loop(stream).await {
                Ok(()) => info!("pipeline connection closed"),
                Err(e) => error!(error = %e, "pipeline connection lost"),
            }

            self.set_state(ConnectionState::Disconnected);
            self.router.deliver(PresenceEvent::Disconnected).await;

            if !self.config.auto_reconnect || self.user_requested() {
                return;
            }

            let Some(opened) = self.reconnect().await else {
                return;
            };
            stream = match self.established(opened).await {
                Some(stream) => stream,
                None => return,
            };
        }
    }

    /// Retry opening the connection at a fixed interval.
    ///
    /// Gives up on a requested disconnect, an authentication failure, or when
    /// another `connect()` got there first.
    async fn reconnect(&self) -> Option<PipelineStream> {
        let mut delay = Constant::new(self.config.reconnect_delay);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            let wait = delay.next_backoff().unwrap_or(self.config.reconnect_delay);
            info!(delay_ms = wait.as_millis() as u64, "reconnecting to pipeline");

            tokio::select! {
                _ = stopped(&mut shutdown_rx) => {
                    debug!("reconnect cancelled");
                    return None;
                }
                _ = sleep(wait) => {}
            }

            if self.user_requested() {
                return None;
            }

            if !self.transition(ConnectionState::Disconnected, ConnectionState::Connecting) {
                debug!("connection already re-established, abandoning reconnect");
                return None;
            }

            match self.open().await {
                Ok(stream) => return Some(stream),
                Err(e) if e.is_auth() => {
                    error!(error = %e, "session is no longer valid, not reconnecting");
                    self.set_state(ConnectionState::Disconnected);
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, "reconnect attempt failed");
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
    }

    /// Consume frames until the connection ends.
    ///
    /// Returns `Ok` for a local or server-initiated close, `Err` when the
    /// connection failed or went silent past `read_timeout`.
    async fn read_loop(&self, stream: PipelineStream) -> Result<(), PipelineError> {
        let (mut write, mut read) = stream.split();
        let mut shutdown_rx = self.shutdown.subscribe();
        let read_timeout = self.config.read_timeout;
        // interval_at rejects a zero period
        let ping_interval = self.config.ping_interval.max(Duration::from_millis(1));

        let idle = sleep(read_timeout);
        tokio::pin!(idle);
        let mut keepalive = interval_at(Instant::now() + ping_interval, ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow_and_update() {
                info!("closing pipeline connection");
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!(error = %e, "failed to send close frame");
                }
                return Ok(());
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {}

                _ = &mut idle => {
                    warn!("pipeline read timeout after {}s", read_timeout.as_secs());
                    return Err(PipelineError::WebSocket("read timeout".to_string()));
                }

                _ = keepalive.tick() => {
                    trace!("sending keepalive ping");
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(|e| PipelineError::WebSocket(format!("ping failed: {}", e)))?;
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text).await;
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // tungstenite queues the pong itself
                            trace!("received ping");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(frame = ?frame, "pipeline connection closed by server");
                            return Ok(());
                        }
                        Some(Ok(_)) => {
                            trace!("ignoring non-text frame");
                        }
                        Some(Err(e)) => {
                            return Err(PipelineError::WebSocket(format!("read error: {}", e)));
                        }
                        None => {
                            return Err(PipelineError::WebSocket("stream ended".to_string()));
                        }
                    }
                    idle.as_mut().reset(Instant::now() + read_timeout);
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let event = match decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping pipeline frame");
                return;
            }
        };

        match self.router.apply(&event.event_type, event.payload).await {
            Ok(Some(presence)) if self.user_requested() => {
                debug!(event = presence.kind(), "disconnect requested, dropping callback");
            }
            Ok(Some(presence)) => self.router.deliver(presence).await,
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, event_type = %event.event_type, "failed to route pipeline event");
            }
        }
    }
}

async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
