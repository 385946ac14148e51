//! AMQP 0-9-1 Connection Driver
//!
//! Implements the connection lifecycle on top of the session wire contract:
//! the ordered `setup` exchange (protocol header, `start`/`start-ok`,
//! `tune`/`tune-ok`, `connection.open`, `channel.open`) and the best-effort
//! `teardown` that mirrors close/close-ok at the channel and connection
//! levels.
//!
//! # Handshake
//!
//! ```text
//! client                                server
//!   │ ── "AMQP\0\0\x09\x01" ──────────►  │
//!   │ ◄───────────── connection.start ── │
//!   │ ── connection.start-ok ──────────► │
//!   │ ◄────────────── connection.tune ── │
//!   │ ── connection.tune-ok ───────────► │
//!   │ ── connection.open ──────────────► │
//!   │ ◄─────────── connection.open-ok ── │
//!   │ ── channel.open ─────────────────► │
//!   │ ◄────────────── channel.open-ok ── │
//! ```
//!
//! Failures abort at the first broken step; version or mechanism rejection
//! sends no further bytes.

use log::{debug, warn};

use crate::constants::{
    channel as channel_method, class, connection, COPYRIGHT, CONNECTION_FORCED, PRODUCT,
    VERSION,
};
use crate::error::{AmqpError, AmqpResult};
use crate::frame::{Arguments, Frame, MethodFrame};
use crate::session::{EndpointState, Session};
use crate::transport::TransportBuilder;
use crate::types::{FieldTable, FieldValue};

/// Reason attached to a close we initiate.
///
/// Unset fields are filled at send time: the reply code defaults to
/// `CONNECTION_FORCED`, the text to empty, and the class/method ids to the
/// session's in-flight operation (or zero).
#[derive(Debug, Clone, Default)]
pub struct CloseReason {
    /// AMQP reply code
    pub reply_code: Option<u16>,
    /// Human-readable reply text
    pub reply_text: Option<String>,
    /// Class id of the method the close refers to
    pub class_id: Option<u16>,
    /// Method id of the method the close refers to
    pub method_id: Option<u16>,
}

impl CloseReason {
    /// Create a reason with a code and text
    pub fn new(reply_code: u16, reply_text: impl Into<String>) -> Self {
        CloseReason {
            reply_code: Some(reply_code),
            reply_text: Some(reply_text.into()),
            class_id: None,
            method_id: None,
        }
    }

    fn resolve(reason: Option<CloseReason>, ongoing: Option<(u16, u16)>) -> (u16, String, u16, u16) {
        let reason = reason.unwrap_or_default();
        let (ongoing_class, ongoing_method) = ongoing.unwrap_or((0, 0));
        (
            reason.reply_code.unwrap_or(CONNECTION_FORCED),
            reason.reply_text.unwrap_or_default(),
            reason.class_id.unwrap_or(ongoing_class),
            reason.method_id.unwrap_or(ongoing_method),
        )
    }
}

impl Session {
    /// Connect the transport and run the full handshake, leaving both the
    /// connection and the channel established.
    ///
    /// On failure the session is torn down best-effort and the error is
    /// returned.
    pub async fn setup(&mut self) -> AmqpResult<()> {
        let transport = TransportBuilder::new()
            .host(self.config.host.clone())
            .port(self.config.port)
            .ssl(self.config.ssl)
            .connect_timeout(self.connect_timeout())
            .connect()
            .await?;
        self.attach_transport(transport);

        match self.handshake().await {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(
                    e,
                    AmqpError::Transport(_) | AmqpError::Io(_) | AmqpError::Timeout(_)
                ) {
                    self.set_state(EndpointState::Closed, EndpointState::Closed);
                }
                self.teardown(None).await;
                Err(e)
            }
        }
    }

    pub(crate) async fn handshake(&mut self) -> AmqpResult<()> {
        debug!(
            "handshake with {}:{} vhost {}",
            self.config.host, self.config.port, self.config.virtual_host
        );

        let start = self
            .send_protocol_header()
            .await?
            .expect(class::CONNECTION, connection::START)?;

        let major = start.arguments.octet("version_major")?;
        let minor = start.arguments.octet("version_minor")?;
        // revision is not compared
        if (major, minor) != (self.version.0, self.version.1) {
            self.set_state(EndpointState::Closed, EndpointState::Closed);
            return Err(AmqpError::protocol("protocol version does not match"));
        }

        let mechanisms = start.arguments.string("mechanisms")?;
        if !mechanisms
            .split_whitespace()
            .any(|mechanism| mechanism == self.mechanism)
        {
            self.set_state(EndpointState::Closed, EndpointState::Closed);
            return Err(AmqpError::protocol(format!(
                "mechanism {} is not offered by the server ({})",
                self.mechanism, mechanisms
            )));
        }

        let start_ok = MethodFrame::new(
            class::CONNECTION,
            connection::START_OK,
            Arguments::from(vec![
                ("client_properties", FieldValue::Table(self.client_properties())),
                ("mechanism", FieldValue::ShortStr(self.mechanism.clone())),
                (
                    "response",
                    FieldValue::LongStr(format!(
                        "\0{}\0{}",
                        self.config.user, self.config.password
                    )),
                ),
                ("locale", FieldValue::ShortStr(self.config.locale.clone())),
            ]),
        );
        let tune = self
            .wire_method(Frame::Method(0, start_ok))
            .await?
            .into_method()?
            .expect(class::CONNECTION, connection::TUNE)?;

        let peer_channel_max = tune.arguments.short("channel_max")?;
        let peer_frame_max = tune.arguments.long("frame_max")?;
        // zero from the peer means unlimited; keep our own cap
        if peer_channel_max != 0 {
            self.channel_max = self.channel_max.min(peer_channel_max);
        }
        if peer_frame_max != 0 {
            self.frame_max = self.frame_max.min(peer_frame_max);
        }
        self.heartbeat = self.config.heartbeat;
        debug!(
            "tuned: channel_max {}, frame_max {}, heartbeat {}s",
            self.channel_max, self.frame_max, self.heartbeat
        );

        let tune_ok = MethodFrame::new(
            class::CONNECTION,
            connection::TUNE_OK,
            Arguments::from(vec![
                ("channel_max", FieldValue::U16(self.channel_max)),
                ("frame_max", FieldValue::U32(self.frame_max)),
                ("heartbeat", FieldValue::U16(self.heartbeat)),
            ]),
        );
        self.send_frame(&Frame::Method(0, tune_ok)).await?;

        let open = MethodFrame::new(
            class::CONNECTION,
            connection::OPEN,
            Arguments::from(vec![
                (
                    "virtual_host",
                    FieldValue::ShortStr(self.config.virtual_host.clone()),
                ),
                ("capabilities", FieldValue::ShortStr(String::new())),
                ("insist", FieldValue::Bool(false)),
            ]),
        );
        self.wire_method(Frame::Method(0, open))
            .await?
            .into_method()?
            .expect(class::CONNECTION, connection::OPEN_OK)?;
        self.set_state(EndpointState::Closed, EndpointState::Established);

        let channel_open = MethodFrame::new(
            class::CHANNEL,
            channel_method::OPEN,
            Arguments::from(vec![("out_of_band", FieldValue::ShortStr(String::new()))]),
        );
        let reply = self
            .wire_method(Frame::Method(self.config.channel, channel_open))
            .await?;
        let confirmed_channel = reply.channel();
        reply
            .into_method()?
            .expect(class::CHANNEL, channel_method::OPEN_OK)?;
        self.channel = confirmed_channel;
        self.set_state(EndpointState::Established, EndpointState::Established);
        debug!("channel {} open", self.channel);
        Ok(())
    }

    fn client_properties(&self) -> FieldTable {
        let mut capabilities = FieldTable::new();
        capabilities.insert("authentication_failure_close", true);

        let mut properties = FieldTable::new();
        properties.insert("product", PRODUCT);
        properties.insert("version", VERSION);
        properties.insert("platform", crate::constants::platform());
        properties.insert("copyright", COPYRIGHT);
        properties.insert("capabilities", FieldValue::Table(capabilities));
        properties
    }

    /// Close the channel and the connection, mirroring the peer where a
    /// close was already received, then drop the transport.
    ///
    /// Best-effort: I/O errors are logged and swallowed, and calling this
    /// on an already-closed session is a no-op.
    pub async fn teardown(&mut self, reason: Option<CloseReason>) {
        match self.channel_state {
            EndpointState::Established => {
                if let Err(e) = self.close_channel(reason.clone()).await {
                    warn!("channel close failed: {}", e);
                }
            }
            EndpointState::CloseWait => {
                let close_ok = MethodFrame::new(
                    class::CHANNEL,
                    channel_method::CLOSE_OK,
                    Arguments::new(),
                );
                if let Err(e) = self.send_frame(&Frame::Method(self.channel, close_ok)).await {
                    warn!("channel close-ok failed: {}", e);
                }
            }
            EndpointState::Closed => {}
        }
        self.set_state(EndpointState::Closed, self.connection_state);

        match self.connection_state {
            EndpointState::Established => {
                if let Err(e) = self.close_connection(reason).await {
                    warn!("connection close failed: {}", e);
                }
            }
            EndpointState::CloseWait => {
                let close_ok = MethodFrame::new(
                    class::CONNECTION,
                    connection::CLOSE_OK,
                    Arguments::new(),
                );
                if let Err(e) = self.send_frame(&Frame::Method(0, close_ok)).await {
                    warn!("connection close-ok failed: {}", e);
                }
            }
            EndpointState::Closed => {}
        }
        self.set_state(EndpointState::Closed, EndpointState::Closed);

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown().await {
                debug!("transport shutdown failed: {}", e);
            }
        }
        self.ongoing = None;
    }

    async fn close_channel(&mut self, reason: Option<CloseReason>) -> AmqpResult<()> {
        let close = self.close_method(class::CHANNEL, channel_method::CLOSE, reason);
        self.wire_method(Frame::Method(self.channel, close))
            .await?
            .into_method()?
            .expect(class::CHANNEL, channel_method::CLOSE_OK)?;
        Ok(())
    }

    async fn close_connection(&mut self, reason: Option<CloseReason>) -> AmqpResult<()> {
        let close = self.close_method(class::CONNECTION, connection::CLOSE, reason);
        self.wire_method(Frame::Method(0, close))
            .await?
            .into_method()?
            .expect(class::CONNECTION, connection::CLOSE_OK)?;
        Ok(())
    }

    fn close_method(
        &self,
        class_id: u16,
        method_id: u16,
        reason: Option<CloseReason>,
    ) -> MethodFrame {
        let (reply_code, reply_text, failing_class, failing_method) =
            CloseReason::resolve(reason, self.ongoing);
        MethodFrame::new(
            class_id,
            method_id,
            Arguments::from(vec![
                ("reply_code", FieldValue::U16(reply_code)),
                ("reply_text", FieldValue::ShortStr(reply_text)),
                ("class_id", FieldValue::U16(failing_class)),
                ("method_id", FieldValue::U16(failing_method)),
            ]),
        )
    }
}
