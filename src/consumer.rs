//! AMQP 0-9-1 Consume Loop
//!
//! A single-threaded event interleaver. After `setup` and
//! `prepare_to_consume`, the loop owns the transport: it reads frames under
//! the configured read timeout, assembles deliveries (method, header, then
//! body frames until the announced size is reached), invokes the handler,
//! acknowledges, and tracks peer liveness with a windowed heartbeat
//! estimator. It exits on peer-initiated close, transport loss, heartbeat
//! timeout, or cooperative cancellation, then tears the session down.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dumq_amqp091::prelude::*;
//! use futures::FutureExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::builder().queue("jobs").build();
//!     session.setup().await?;
//!     session.prepare_to_consume().await?;
//!
//!     let mut handler = |delivery: Delivery| {
//!         async move {
//!             println!("got: {:?}", delivery.body_as_text());
//!             Ok::<(), AmqpError>(())
//!         }
//!         .boxed()
//!     };
//!     session.consume(&mut handler).await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use log::{debug, error, warn};
use tokio::time::{timeout, Duration, Instant};

use crate::constants::{basic, channel as channel_method, class, connection};
use crate::error::{AmqpError, AmqpResult};
use crate::frame::{Frame, MethodFrame};
use crate::message::{ContentHeader, Delivery};
use crate::session::{EndpointState, Session};

/// Cooperative cancellation handle for the consume loop.
///
/// Cloned handles share one flag; the loop polls it between iterations and
/// exits with [`AmqpError::Cancelled`] once requested.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    /// Create an unsignalled handle
    pub fn new() -> Self {
        Shutdown::default()
    }

    /// Request the loop to exit
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether an exit was requested
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Windowed estimator of peer liveness.
///
/// Each heartbeat interval that elapses without traffic shifts a miss into
/// a bitmap; the peer is declared dead once the low `window` positions hold
/// at least `threshold` misses. Any received heartbeat clears the window,
/// so transient jitter is tolerated.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    last_activity: Instant,
    miss_bitmap: u32,
    window: u32,
    threshold: u32,
}

impl HeartbeatMonitor {
    /// Create a monitor with the default window of 5 and threshold of 4
    pub fn new() -> Self {
        HeartbeatMonitor::with_window(5, 4)
    }

    /// Create a monitor with an explicit window and threshold
    pub fn with_window(window: u32, threshold: u32) -> Self {
        HeartbeatMonitor {
            last_activity: Instant::now(),
            miss_bitmap: 0,
            window,
            threshold,
        }
    }

    /// Forget all history and restart the activity clock
    pub fn reset(&mut self) {
        self.last_activity = Instant::now();
        self.miss_bitmap = 0;
    }

    /// Record peer traffic: restart the clock and clear the window
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.miss_bitmap = 0;
    }

    /// Whether a full interval has elapsed since the last recorded activity
    pub fn overdue(&self, interval: Duration) -> bool {
        self.last_activity.elapsed() > interval
    }

    /// Record one missed interval and restart the clock
    pub fn record_miss(&mut self) {
        self.miss_bitmap = (self.miss_bitmap << 1) | 1;
        self.last_activity = Instant::now();
    }

    /// Misses inside the sliding window
    pub fn misses(&self) -> u32 {
        let mask = if self.window >= 32 {
            u32::MAX
        } else {
            (1 << self.window) - 1
        };
        (self.miss_bitmap & mask).count_ones()
    }

    /// Whether the miss count reached the threshold
    pub fn timed_out(&self) -> bool {
        self.misses() >= self.threshold
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback receiving assembled deliveries.
///
/// Invoked synchronously from the consume loop; a returned error is logged,
/// turned into a `basic.nack`, and does not stop the loop. The handler owns
/// the delivery, so no borrowed buffer can outlive the call. It must not
/// issue session operations of its own.
#[async_trait]
pub trait DeliveryHandler: Send {
    /// Handle one delivery
    async fn handle(&mut self, delivery: Delivery) -> AmqpResult<()>;
}

#[async_trait]
impl<F> DeliveryHandler for F
where
    F: FnMut(Delivery) -> BoxFuture<'static, AmqpResult<()>> + Send,
{
    async fn handle(&mut self, delivery: Delivery) -> AmqpResult<()> {
        (self)(delivery).await
    }
}

/// Buffers one in-flight delivery: the `basic.deliver` method, the content
/// header, and body bytes until the announced size is reached.
#[derive(Default)]
struct DeliveryAssembly {
    pending_method: Option<MethodFrame>,
    pending_header: Option<ContentHeader>,
    body: BytesMut,
}

impl DeliveryAssembly {
    fn begin(&mut self, method: MethodFrame) {
        if self.pending_method.is_some() {
            warn!("new deliver while a delivery was still being assembled");
        }
        self.pending_method = Some(method);
        self.pending_header = None;
        self.body.clear();
    }

    fn header(&mut self, header: ContentHeader) -> Option<(MethodFrame, ContentHeader, Bytes)> {
        if self.pending_method.is_none() {
            warn!("content header without a pending deliver");
            return None;
        }
        self.pending_header = Some(header);
        self.body.clear();
        self.complete_if_full()
    }

    fn push(&mut self, chunk: Bytes) -> Option<(MethodFrame, ContentHeader, Bytes)> {
        if self.pending_header.is_none() {
            warn!("content body without a pending header");
            return None;
        }
        self.body.extend_from_slice(&chunk);
        self.complete_if_full()
    }

    fn complete_if_full(&mut self) -> Option<(MethodFrame, ContentHeader, Bytes)> {
        let expected = self.pending_header.as_ref()?.body_size;
        if (self.body.len() as u64) < expected {
            return None;
        }
        let method = self.pending_method.take()?;
        let header = self.pending_header.take()?;
        Some((method, header, self.body.split().freeze()))
    }
}

impl Session {
    /// Run the consume loop until a terminal condition, then tear the
    /// session down. Peer-initiated closes end the loop cleanly; transport
    /// loss, heartbeat timeout, and cancellation are returned as errors.
    pub async fn consume<H>(&mut self, handler: &mut H) -> AmqpResult<()>
    where
        H: DeliveryHandler + ?Sized,
    {
        let result = self.consume_loop(handler).await;
        match &result {
            Ok(()) => debug!("consume loop ended"),
            Err(e) => debug!("consume loop ended: {}", e),
        }
        self.teardown(None).await;
        result
    }

    pub(crate) async fn consume_loop<H>(&mut self, handler: &mut H) -> AmqpResult<()>
    where
        H: DeliveryHandler + ?Sized,
    {
        let read_timeout = self.read_timeout();
        let heartbeat_interval = self.heartbeat_interval();
        self.monitor.reset();
        let mut assembly = DeliveryAssembly::default();

        loop {
            if self.shutdown.is_requested() {
                return Err(AmqpError::Cancelled);
            }

            let transport = self.transport.as_mut().ok_or(AmqpError::NotInitialized)?;
            let frame = match timeout(read_timeout, transport.receive_frame()).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => {
                    self.set_state(EndpointState::Closed, EndpointState::Closed);
                    return Err(e);
                }
                Err(_) => {
                    if !heartbeat_interval.is_zero() && self.monitor.overdue(heartbeat_interval) {
                        self.monitor.record_miss();
                        debug!(
                            "heartbeat interval missed, {} in window",
                            self.monitor.misses()
                        );
                        self.send_frame(&Frame::heartbeat()).await?;
                    }
                    if self.monitor.timed_out() {
                        return Err(AmqpError::HeartbeatTimeout);
                    }
                    continue;
                }
            };

            match frame {
                Frame::Method(_, method) if method.is(class::CHANNEL, channel_method::CLOSE) => {
                    warn!(
                        "peer closed channel: {} {}",
                        method.arguments.short("reply_code").unwrap_or(0),
                        method.arguments.string("reply_text").unwrap_or_default()
                    );
                    self.set_state(EndpointState::CloseWait, self.connection_state);
                    return Ok(());
                }
                Frame::Method(_, method) if method.is(class::CONNECTION, connection::CLOSE) => {
                    warn!(
                        "peer closed connection: {} {}",
                        method.arguments.short("reply_code").unwrap_or(0),
                        method.arguments.string("reply_text").unwrap_or_default()
                    );
                    self.set_state(EndpointState::Closed, EndpointState::CloseWait);
                    return Ok(());
                }
                Frame::Method(_, method) if method.is(class::BASIC, basic::DELIVER) => {
                    self.ongoing = Some((class::BASIC, basic::DELIVER));
                    assembly.begin(method);
                }
                Frame::Method(_, method) => {
                    warn!("ignoring unexpected {} during consume", method.name());
                }
                Frame::Header(_, header) => {
                    if let Some((method, header, body)) = assembly.header(header) {
                        self.dispatch_delivery(handler, method, header, body).await?;
                    }
                }
                Frame::Body(_, chunk) => {
                    if let Some((method, header, body)) = assembly.push(chunk) {
                        self.dispatch_delivery(handler, method, header, body).await?;
                    }
                }
                Frame::Heartbeat(_) => {
                    self.monitor.record_activity();
                    self.send_frame(&Frame::heartbeat()).await?;
                }
            }
        }
    }

    async fn dispatch_delivery<H>(
        &mut self,
        handler: &mut H,
        method: MethodFrame,
        header: ContentHeader,
        body: Bytes,
    ) -> AmqpResult<()>
    where
        H: DeliveryHandler + ?Sized,
    {
        let delivery = match Delivery::from_parts(&method, header.properties, body) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("discarding malformed delivery: {}", e);
                return Ok(());
            }
        };
        let delivery_tag = delivery.delivery_tag;

        let outcome = handler.handle(delivery).await;
        if let Err(e) = &outcome {
            error!("delivery handler failed for tag {}: {}", delivery_tag, e);
        }

        if !self.config.no_ack {
            match outcome {
                Ok(()) => self.basic_ack(delivery_tag, false).await?,
                Err(_) => self.basic_nack(delivery_tag, false, false).await?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BasicProperties;
    use crate::testing::MockPeer;
    use crate::types::FieldValue;
    use futures::FutureExt;
    use std::sync::Mutex;

    #[test]
    fn test_monitor_starts_alive() {
        let monitor = HeartbeatMonitor::new();
        assert_eq!(monitor.misses(), 0);
        assert!(!monitor.timed_out());
    }

    #[test]
    fn test_monitor_times_out_at_threshold() {
        let mut monitor = HeartbeatMonitor::with_window(5, 4);
        for _ in 0..3 {
            monitor.record_miss();
        }
        assert!(!monitor.timed_out());
        monitor.record_miss();
        assert!(monitor.timed_out());
    }

    #[test]
    fn test_monitor_activity_clears_window() {
        let mut monitor = HeartbeatMonitor::with_window(5, 4);
        for _ in 0..3 {
            monitor.record_miss();
        }
        monitor.record_activity();
        assert_eq!(monitor.misses(), 0);
        monitor.record_miss();
        assert!(!monitor.timed_out());
    }

    #[test]
    fn test_monitor_window_masks_old_misses() {
        let mut monitor = HeartbeatMonitor::with_window(3, 3);
        for _ in 0..3 {
            monitor.record_miss();
        }
        assert!(monitor.timed_out());

        // two hits shifted past a window of three leave two relevant misses
        let mut monitor = HeartbeatMonitor::with_window(3, 3);
        monitor.record_miss();
        monitor.record_miss();
        monitor.miss_bitmap <<= 1; // one quiet interval
        monitor.record_miss();
        assert_eq!(monitor.misses(), 2);
        assert!(!monitor.timed_out());
    }

    #[test]
    fn test_shutdown_handle_is_shared() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        assert!(!clone.is_requested());
        shutdown.request();
        assert!(clone.is_requested());
    }

    fn consuming_session(transport: crate::transport::Transport) -> Session {
        let mut session = Session::builder()
            .queue("q")
            .read_timeout(Duration::from_millis(200))
            .build();
        session.attach_transport(transport);
        session.set_state(EndpointState::Established, EndpointState::Established);
        session
    }

    type Sink = Arc<Mutex<Vec<Delivery>>>;

    fn collector(sink: &Sink) -> impl FnMut(Delivery) -> BoxFuture<'static, AmqpResult<()>> + Send {
        let sink = sink.clone();
        move |delivery: Delivery| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(delivery);
                Ok(())
            }
            .boxed()
        }
    }

    async fn serve_close_handshake(peer: &mut MockPeer) {
        peer.expect_method(class::CHANNEL, channel_method::CLOSE_OK)
            .await;
        peer.expect_method(class::CONNECTION, connection::CLOSE)
            .await;
        peer.send_method(0, class::CONNECTION, connection::CLOSE_OK, vec![])
            .await;
    }

    #[tokio::test]
    async fn test_consume_happy_path() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = consuming_session(transport);

        let server = tokio::spawn(async move {
            peer.send_delivery(
                1,
                1,
                "",
                "q",
                BasicProperties::new().with_content_type("text/plain"),
                b"hello",
            )
            .await;

            let ack = peer.expect_method(class::BASIC, basic::ACK).await;
            assert_eq!(ack.arguments.longlong("delivery_tag").unwrap(), 1);
            assert!(!ack.arguments.bit("multiple").unwrap());

            peer.send_method(
                1,
                class::CHANNEL,
                channel_method::CLOSE,
                vec![
                    ("reply_code", FieldValue::U16(200)),
                    ("reply_text", FieldValue::ShortStr("done".into())),
                    ("class_id", FieldValue::U16(0)),
                    ("method_id", FieldValue::U16(0)),
                ],
            )
            .await;
            serve_close_handshake(&mut peer).await;
        });

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        session.consume(&mut handler).await.unwrap();

        let deliveries = sink.lock().unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].body_as_text(), Some("hello"));
        assert_eq!(deliveries[0].delivery_tag, 1);
        assert_eq!(
            deliveries[0].properties.content_type.as_deref(),
            Some("text/plain")
        );
        drop(deliveries);

        assert_eq!(session.connection_state(), EndpointState::Closed);
        assert_eq!(session.channel_state(), EndpointState::Closed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_body_spanning_multiple_frames_is_accumulated() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = consuming_session(transport);

        let server = tokio::spawn(async move {
            peer.send_deliver_method(1, 1, "", "q").await;
            peer.send_frame(&Frame::Header(
                1,
                ContentHeader::basic(10, BasicProperties::new()),
            ))
            .await;
            peer.send_frame(&Frame::Body(1, Bytes::from_static(b"hello")))
                .await;
            peer.send_frame(&Frame::Body(1, Bytes::from_static(b"world")))
                .await;

            peer.expect_method(class::BASIC, basic::ACK).await;
            peer.send_method(
                1,
                class::CHANNEL,
                channel_method::CLOSE,
                vec![
                    ("reply_code", FieldValue::U16(200)),
                    ("reply_text", FieldValue::ShortStr(String::new())),
                    ("class_id", FieldValue::U16(0)),
                    ("method_id", FieldValue::U16(0)),
                ],
            )
            .await;
            serve_close_handshake(&mut peer).await;
        });

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        session.consume(&mut handler).await.unwrap();

        let deliveries = sink.lock().unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].body_as_text(), Some("helloworld"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_body_dispatches_on_header() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = consuming_session(transport);

        let server = tokio::spawn(async move {
            peer.send_deliver_method(1, 1, "", "q").await;
            peer.send_frame(&Frame::Header(
                1,
                ContentHeader::basic(0, BasicProperties::new()),
            ))
            .await;

            peer.expect_method(class::BASIC, basic::ACK).await;
            peer.send_method(
                1,
                class::CHANNEL,
                channel_method::CLOSE,
                vec![
                    ("reply_code", FieldValue::U16(200)),
                    ("reply_text", FieldValue::ShortStr(String::new())),
                    ("class_id", FieldValue::U16(0)),
                    ("method_id", FieldValue::U16(0)),
                ],
            )
            .await;
            serve_close_handshake(&mut peer).await;
        });

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        session.consume(&mut handler).await.unwrap();

        let deliveries = sink.lock().unwrap();
        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].body.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_failure_nacks_and_loop_continues() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = consuming_session(transport);

        let server = tokio::spawn(async move {
            peer.send_delivery(1, 1, "", "q", BasicProperties::new(), b"bad")
                .await;
            let nack = peer.expect_method(class::BASIC, basic::NACK).await;
            assert_eq!(nack.arguments.longlong("delivery_tag").unwrap(), 1);
            assert!(!nack.arguments.bit("requeue").unwrap());

            peer.send_delivery(1, 2, "", "q", BasicProperties::new(), b"good")
                .await;
            let ack = peer.expect_method(class::BASIC, basic::ACK).await;
            assert_eq!(ack.arguments.longlong("delivery_tag").unwrap(), 2);

            peer.send_method(
                1,
                class::CHANNEL,
                channel_method::CLOSE,
                vec![
                    ("reply_code", FieldValue::U16(200)),
                    ("reply_text", FieldValue::ShortStr(String::new())),
                    ("class_id", FieldValue::U16(0)),
                    ("method_id", FieldValue::U16(0)),
                ],
            )
            .await;
            serve_close_handshake(&mut peer).await;
        });

        let mut handler = |delivery: Delivery| -> BoxFuture<'static, AmqpResult<()>> {
            async move {
                if delivery.body_as_text() == Some("bad") {
                    Err(AmqpError::callback("refusing this one"))
                } else {
                    Ok(())
                }
            }
            .boxed()
        };
        session.consume(&mut handler).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_ack_mode_sends_no_acks() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = Session::builder()
            .queue("q")
            .no_ack(true)
            .read_timeout(Duration::from_millis(200))
            .build();
        session.attach_transport(transport);
        session.set_state(EndpointState::Established, EndpointState::Established);

        let server = tokio::spawn(async move {
            peer.send_delivery(1, 1, "", "q", BasicProperties::new(), b"hello")
                .await;
            peer.send_method(
                1,
                class::CHANNEL,
                channel_method::CLOSE,
                vec![
                    ("reply_code", FieldValue::U16(200)),
                    ("reply_text", FieldValue::ShortStr(String::new())),
                    ("class_id", FieldValue::U16(0)),
                    ("method_id", FieldValue::U16(0)),
                ],
            )
            .await;
            // the very next client frame must be the teardown close-ok,
            // not an ack
            serve_close_handshake(&mut peer).await;
        });

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        session.consume(&mut handler).await.unwrap();
        assert_eq!(sink.lock().unwrap().len(), 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_channel_close_enters_close_wait() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = consuming_session(transport);

        let server = tokio::spawn(async move {
            peer.send_delivery(1, 1, "", "q", BasicProperties::new(), b"hello")
                .await;
            peer.expect_method(class::BASIC, basic::ACK).await;
            peer.send_method(
                1,
                class::CHANNEL,
                channel_method::CLOSE,
                vec![
                    ("reply_code", FieldValue::U16(404)),
                    ("reply_text", FieldValue::ShortStr("not found".into())),
                    ("class_id", FieldValue::U16(0)),
                    ("method_id", FieldValue::U16(0)),
                ],
            )
            .await;
            peer
        });

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        session.consume_loop(&mut handler).await.unwrap();

        // peer close is a state transition, not an error
        assert_eq!(session.channel_state(), EndpointState::CloseWait);
        assert_eq!(session.connection_state(), EndpointState::Established);

        let mut peer = server.await.unwrap();
        let responder = tokio::spawn(async move {
            serve_close_handshake(&mut peer).await;
        });
        session.teardown(None).await;
        assert_eq!(session.channel_state(), EndpointState::Closed);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_connection_close() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = consuming_session(transport);

        let server = tokio::spawn(async move {
            peer.send_method(
                0,
                class::CONNECTION,
                connection::CLOSE,
                vec![
                    ("reply_code", FieldValue::U16(320)),
                    ("reply_text", FieldValue::ShortStr("shutting down".into())),
                    ("class_id", FieldValue::U16(0)),
                    ("method_id", FieldValue::U16(0)),
                ],
            )
            .await;
            peer
        });

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        session.consume_loop(&mut handler).await.unwrap();

        assert_eq!(session.channel_state(), EndpointState::Closed);
        assert_eq!(session.connection_state(), EndpointState::CloseWait);

        let mut peer = server.await.unwrap();
        let responder = tokio::spawn(async move {
            // only a connection.close-ok is owed
            peer.expect_method(class::CONNECTION, connection::CLOSE_OK)
                .await;
            assert!(peer.at_eof().await);
        });
        session.teardown(None).await;
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_exits_with_exiting() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = consuming_session(transport);
        session.shutdown_handle().request();

        let server = tokio::spawn(async move {
            peer.expect_method(class::CHANNEL, channel_method::CLOSE).await;
            peer.send_method(1, class::CHANNEL, channel_method::CLOSE_OK, vec![])
                .await;
            peer.expect_method(class::CONNECTION, connection::CLOSE)
                .await;
            peer.send_method(0, class::CONNECTION, connection::CLOSE_OK, vec![])
                .await;
        });

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        let error = session.consume(&mut handler).await.unwrap_err();
        assert!(matches!(error, AmqpError::Cancelled));
        assert_eq!(error.to_string(), "exiting");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_loss_closes_both_states() {
        let (transport, peer) = MockPeer::endpoint();
        let mut session = consuming_session(transport);
        drop(peer);

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        let error = session.consume(&mut handler).await.unwrap_err();
        assert!(matches!(error, AmqpError::Transport(_)));
        assert_eq!(session.connection_state(), EndpointState::Closed);
        assert_eq!(session.channel_state(), EndpointState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_after_silent_intervals() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = Session::builder()
            .queue("q")
            .heartbeat(30)
            .read_timeout(Duration::from_secs(31))
            .build();
        session.attach_transport(transport);
        session.set_state(EndpointState::Established, EndpointState::Established);

        let server = tokio::spawn(async move {
            // the client sends one heartbeat per missed interval
            let mut heartbeats = 0;
            loop {
                match peer.receive_frame().await {
                    Frame::Heartbeat(_) => heartbeats += 1,
                    Frame::Method(_, method)
                        if method.is(class::CHANNEL, channel_method::CLOSE) =>
                    {
                        break;
                    }
                    other => panic!("unexpected frame {:?}", other),
                }
            }
            peer.send_method(1, class::CHANNEL, channel_method::CLOSE_OK, vec![])
                .await;
            peer.expect_method(class::CONNECTION, connection::CLOSE)
                .await;
            peer.send_method(0, class::CONNECTION, connection::CLOSE_OK, vec![])
                .await;
            heartbeats
        });

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        let error = session.consume(&mut handler).await.unwrap_err();
        assert!(matches!(error, AmqpError::HeartbeatTimeout));

        let heartbeats = server.await.unwrap();
        assert_eq!(heartbeats, 4);
    }

    #[tokio::test]
    async fn test_heartbeat_echo_on_received_heartbeat() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = consuming_session(transport);

        let server = tokio::spawn(async move {
            peer.send_frame(&Frame::heartbeat()).await;
            // the client echoes one heartbeat back
            assert_eq!(peer.receive_frame().await, Frame::Heartbeat(0));

            peer.send_method(
                1,
                class::CHANNEL,
                channel_method::CLOSE,
                vec![
                    ("reply_code", FieldValue::U16(200)),
                    ("reply_text", FieldValue::ShortStr(String::new())),
                    ("class_id", FieldValue::U16(0)),
                    ("method_id", FieldValue::U16(0)),
                ],
            )
            .await;
            serve_close_handshake(&mut peer).await;
        });

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        session.consume(&mut handler).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unexpected_method_is_ignored() {
        let (transport, mut peer) = MockPeer::endpoint();
        let mut session = consuming_session(transport);

        let server = tokio::spawn(async move {
            // a stray consume-ok must not disturb the loop
            peer.send_method(
                1,
                class::BASIC,
                basic::CONSUME_OK,
                vec![("consumer_tag", FieldValue::ShortStr("ctag".into()))],
            )
            .await;
            peer.send_delivery(1, 1, "", "q", BasicProperties::new(), b"hello")
                .await;
            peer.expect_method(class::BASIC, basic::ACK).await;
            peer.send_method(
                1,
                class::CHANNEL,
                channel_method::CLOSE,
                vec![
                    ("reply_code", FieldValue::U16(200)),
                    ("reply_text", FieldValue::ShortStr(String::new())),
                    ("class_id", FieldValue::U16(0)),
                    ("method_id", FieldValue::U16(0)),
                ],
            )
            .await;
            serve_close_handshake(&mut peer).await;
        });

        let sink: Sink = Arc::new(Mutex::new(Vec::new()));
        let mut handler = collector(&sink);
        session.consume(&mut handler).await.unwrap();
        assert_eq!(sink.lock().unwrap().len(), 1);
        server.await.unwrap();
    }
}
