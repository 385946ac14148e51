//! AMQP 0-9-1 Session
//!
//! A session owns one transport, one channel, and all negotiated state. It
//! is a single-owner value: at most one logical operation is in flight at a
//! time, and every state transition of the connection/channel lifecycle
//! flags goes through [`Session::set_state`].
//!
//! # Session Lifecycle
//!
//! 1. **Closed**: initial state
//! 2. **Established**: handshake (and channel open) completed
//! 3. **CloseWait**: the peer initiated a close; we still owe a `close-ok`
//! 4. **Closed**: torn down
//!
//! # Examples
//!
//! ```rust,no_run
//! use dumq_amqp091::session::{Role, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::builder()
//!         .host("localhost")
//!         .port(5672)
//!         .user("guest")
//!         .password("guest")
//!         .role(Role::Publisher)
//!         .build();
//!
//!     session.setup().await?;
//!     session.basic_publish(b"hello", Default::default()).await?;
//!     session.teardown(None).await;
//!     Ok(())
//! }
//! ```

use log::trace;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::constants::{
    DEFAULT_FRAME_SIZE, DEFAULT_HEARTBEAT, DEFAULT_LOCALE, DEFAULT_MAX_CHANNELS,
    DEFAULT_MECHANISM, PROTOCOL_HEADER, PROTOCOL_VERSION,
};
use crate::consumer::{HeartbeatMonitor, Shutdown};
use crate::error::{AmqpError, AmqpResult};
use crate::frame::{Frame, MethodFrame};
use crate::transport::Transport;

/// Lifecycle state of the connection or channel endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointState {
    /// Not open, or torn down
    Closed,
    /// Open and usable
    Established,
    /// Peer initiated a close; a `close-ok` is still owed
    CloseWait,
}

/// What the session is configured to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Receive deliveries from a queue
    Consumer,
    /// Publish messages to an exchange
    Publisher,
}

/// AMQP 0-9-1 Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Broker hostname
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Whether to wrap the connection in TLS
    pub ssl: bool,
    /// TCP/TLS establishment timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Heartbeat interval in seconds advertised in `tune-ok`
    pub heartbeat: u16,
    /// Login user
    pub user: String,
    /// Login password
    pub password: String,
    /// Virtual host selected at `connection.open`
    pub virtual_host: String,
    /// Consumer or publisher
    pub role: Role,
    /// Default exchange for publish and bind
    pub exchange: String,
    /// Default queue for declare, bind, and consume
    pub queue: String,
    /// Default routing key
    pub routing_key: String,
    /// Channel number to open
    pub channel: u16,
    /// Maximum frame size advertised in `tune-ok`
    pub frame_max: u32,
    /// Maximum channel count advertised in `tune-ok`
    pub channel_max: u16,
    /// Locale requested in `start-ok`
    pub locale: String,
    /// SASL mechanism
    pub mechanism: String,
    /// Whether the broker should consider deliveries acked on send
    pub no_ack: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            host: "localhost".to_string(),
            port: 5672,
            ssl: false,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
            heartbeat: DEFAULT_HEARTBEAT,
            user: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
            role: Role::Consumer,
            exchange: String::new(),
            queue: String::new(),
            routing_key: String::new(),
            channel: 1,
            frame_max: DEFAULT_FRAME_SIZE,
            channel_max: DEFAULT_MAX_CHANNELS,
            locale: DEFAULT_LOCALE.to_string(),
            mechanism: DEFAULT_MECHANISM.to_string(),
            no_ack: false,
        }
    }
}

/// AMQP 0-9-1 Session
pub struct Session {
    /// Session configuration
    pub(crate) config: SessionConfig,
    /// Transport, present once connected
    pub(crate) transport: Option<Transport>,
    /// Protocol version implemented by the client
    pub(crate) version: (u8, u8, u8),
    /// Negotiated maximum frame size
    pub(crate) frame_max: u32,
    /// Negotiated maximum channel count
    pub(crate) channel_max: u16,
    /// Negotiated heartbeat interval in seconds
    pub(crate) heartbeat: u16,
    /// Chosen SASL mechanism
    pub(crate) mechanism: String,
    /// Channel number confirmed by `channel.open-ok`
    pub(crate) channel: u16,
    /// Connection lifecycle state
    pub(crate) connection_state: EndpointState,
    /// Channel lifecycle state
    pub(crate) channel_state: EndpointState,
    /// Class/method pair of the operation in flight
    pub(crate) ongoing: Option<(u16, u16)>,
    /// Heartbeat liveness estimator
    pub(crate) monitor: HeartbeatMonitor,
    /// Cooperative cancellation flag
    pub(crate) shutdown: Shutdown,
}

impl Session {
    /// Create a session from a configuration
    pub fn new(config: SessionConfig) -> Self {
        let frame_max = config.frame_max;
        let channel_max = config.channel_max;
        let heartbeat = config.heartbeat;
        let mechanism = config.mechanism.clone();
        let channel = config.channel;
        Session {
            config,
            transport: None,
            version: PROTOCOL_VERSION,
            frame_max,
            channel_max,
            heartbeat,
            mechanism,
            channel,
            connection_state: EndpointState::Closed,
            channel_state: EndpointState::Closed,
            ongoing: None,
            monitor: HeartbeatMonitor::new(),
            shutdown: Shutdown::new(),
        }
    }

    /// Create a session builder
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Get the session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get the connection lifecycle state
    pub fn connection_state(&self) -> EndpointState {
        self.connection_state
    }

    /// Get the channel lifecycle state
    pub fn channel_state(&self) -> EndpointState {
        self.channel_state
    }

    /// Get the channel number
    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Get the negotiated maximum frame size
    pub fn frame_max(&self) -> u32 {
        self.frame_max
    }

    /// Get the negotiated maximum channel count
    pub fn channel_max(&self) -> u16 {
        self.channel_max
    }

    /// Get the negotiated heartbeat interval in seconds
    pub fn heartbeat(&self) -> u16 {
        self.heartbeat
    }

    /// Get the protocol version triple
    pub fn version(&self) -> (u8, u8, u8) {
        self.version
    }

    /// Get a cancellation handle for the consume loop
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Per-read timeout
    pub(crate) fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.config.read_timeout_ms)
    }

    /// TCP/TLS establishment timeout
    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.config.connect_timeout_ms)
    }

    /// Negotiated heartbeat interval as a duration
    pub(crate) fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.heartbeat))
    }

    /// Transition the two lifecycle flags.
    ///
    /// The sole mutator of `channel_state` and `connection_state`.
    pub(crate) fn set_state(
        &mut self,
        channel_state: EndpointState,
        connection_state: EndpointState,
    ) {
        trace!(
            "state transition: channel {:?} -> {:?}, connection {:?} -> {:?}",
            self.channel_state,
            channel_state,
            self.connection_state,
            connection_state
        );
        self.channel_state = channel_state;
        self.connection_state = connection_state;
    }

    /// Install a connected transport
    pub(crate) fn attach_transport(&mut self, transport: Transport) {
        self.transport = Some(transport);
    }

    pub(crate) fn transport_mut(&mut self) -> AmqpResult<&mut Transport> {
        self.transport.as_mut().ok_or(AmqpError::NotInitialized)
    }

    /// Send the protocol banner and decode the peer's first method frame
    /// (expected: `connection.start`).
    pub async fn send_protocol_header(&mut self) -> AmqpResult<MethodFrame> {
        let transport = self.transport_mut()?;
        transport.send_raw(&PROTOCOL_HEADER).await?;
        let reply = transport.receive_frame().await?;
        reply.into_method()
    }

    /// Fire-and-forget frame send (heartbeats, body frames, acks)
    pub async fn send_frame(&mut self, frame: &Frame) -> AmqpResult<()> {
        self.transport_mut()?.send_frame(frame).await
    }

    /// Read one full frame from the transport
    pub async fn consume_frame(&mut self) -> AmqpResult<Frame> {
        self.transport_mut()?.receive_frame().await
    }

    /// Send a method frame and consume exactly one peer frame, the
    /// synchronous reply of AMQP's class-level request/reply pattern.
    pub async fn wire_method(&mut self, frame: Frame) -> AmqpResult<Frame> {
        let transport = self.transport_mut()?;
        transport.send_frame(&frame).await?;
        transport.receive_frame().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("channel", &self.channel)
            .field("connection_state", &self.connection_state)
            .field("channel_state", &self.channel_state)
            .field("frame_max", &self.frame_max)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

/// Session Builder for constructing AMQP 0-9-1 sessions
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    config: SessionConfig,
}

impl SessionBuilder {
    /// Create a new session builder
    pub fn new() -> Self {
        SessionBuilder {
            config: SessionConfig::default(),
        }
    }

    /// Set the broker hostname
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the broker port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Enable TLS
    pub fn ssl(mut self, ssl: bool) -> Self {
        self.config.ssl = ssl;
        self
    }

    /// Set the login user
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    /// Set the login password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    /// Set the virtual host
    pub fn virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.config.virtual_host = virtual_host.into();
        self
    }

    /// Set the session role
    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Set the default exchange
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.config.exchange = exchange.into();
        self
    }

    /// Set the default queue
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.config.queue = queue.into();
        self
    }

    /// Set the default routing key
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.config.routing_key = routing_key.into();
        self
    }

    /// Set the channel number
    pub fn channel(mut self, channel: u16) -> Self {
        self.config.channel = channel;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config.connect_timeout_ms = connect_timeout.as_millis() as u64;
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.config.read_timeout_ms = read_timeout.as_millis() as u64;
        self
    }

    /// Set the heartbeat interval in seconds
    pub fn heartbeat(mut self, heartbeat: u16) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    /// Set the advertised maximum frame size
    pub fn frame_max(mut self, frame_max: u32) -> Self {
        self.config.frame_max = frame_max;
        self
    }

    /// Set the advertised maximum channel count
    pub fn channel_max(mut self, channel_max: u16) -> Self {
        self.config.channel_max = channel_max;
        self
    }

    /// Set the locale
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.config.locale = locale.into();
        self
    }

    /// Set the SASL mechanism
    pub fn mechanism(mut self, mechanism: impl Into<String>) -> Self {
        self.config.mechanism = mechanism.into();
        self
    }

    /// Set whether deliveries are considered acked on send
    pub fn no_ack(mut self, no_ack: bool) -> Self {
        self.config.no_ack = no_ack;
        self
    }

    /// Build the session
    pub fn build(self) -> Session {
        Session::new(self.config)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
