//! Mock broker peer for tests.
//!
//! Drives the far end of an in-memory duplex stream with the same
//! transport and codec the client uses, so tests can script broker
//! behaviour frame by frame.

use bytes::Bytes;
use tokio::io::duplex;

use crate::constants::{
    basic, channel as channel_method, class, connection, PROTOCOL_HEADER,
};
use crate::frame::{Arguments, Frame, MethodFrame};
use crate::message::{BasicProperties, ContentHeader};
use crate::transport::Transport;
use crate::types::{FieldTable, FieldValue};

pub(crate) struct MockPeer {
    transport: Transport,
}

impl MockPeer {
    /// Create a connected (client transport, mock peer) pair.
    pub fn endpoint() -> (Transport, MockPeer) {
        let (client, server) = duplex(64 * 1024);
        (
            Transport::from_stream(client),
            MockPeer {
                transport: Transport::from_stream(server),
            },
        )
    }

    pub async fn receive_raw(&mut self, size: usize) -> Bytes {
        self.transport.receive_raw(size).await.expect("peer read")
    }

    pub async fn receive_frame(&mut self) -> Frame {
        self.transport.receive_frame().await.expect("peer frame read")
    }

    pub async fn send_frame(&mut self, frame: &Frame) {
        self.transport.send_frame(frame).await.expect("peer frame write");
    }

    pub async fn send_method(
        &mut self,
        channel: u16,
        class_id: u16,
        method_id: u16,
        arguments: Vec<(&'static str, FieldValue)>,
    ) {
        let method = MethodFrame::new(class_id, method_id, Arguments::from(arguments));
        self.send_frame(&Frame::Method(channel, method)).await;
    }

    /// Read one frame and require a specific method.
    pub async fn expect_method(&mut self, class_id: u16, method_id: u16) -> MethodFrame {
        self.receive_frame()
            .await
            .into_method()
            .expect("method frame")
            .expect(class_id, method_id)
            .expect("expected method")
    }

    /// Whether the client side has closed the stream.
    pub async fn at_eof(&mut self) -> bool {
        self.transport.receive_raw(1).await.is_err()
    }

    pub async fn send_connection_start(
        &mut self,
        major: u8,
        minor: u8,
        mechanisms: &str,
        locales: &str,
    ) {
        let mut server_properties = FieldTable::new();
        server_properties.insert("product", "MockBroker");
        self.send_method(
            0,
            class::CONNECTION,
            connection::START,
            vec![
                ("version_major", FieldValue::U8(major)),
                ("version_minor", FieldValue::U8(minor)),
                ("server_properties", FieldValue::Table(server_properties)),
                ("mechanisms", FieldValue::LongStr(mechanisms.to_string())),
                ("locales", FieldValue::LongStr(locales.to_string())),
            ],
        )
        .await;
    }

    pub async fn send_connection_tune(&mut self, channel_max: u16, frame_max: u32, heartbeat: u16) {
        self.send_method(
            0,
            class::CONNECTION,
            connection::TUNE,
            vec![
                ("channel_max", FieldValue::U16(channel_max)),
                ("frame_max", FieldValue::U32(frame_max)),
                ("heartbeat", FieldValue::U16(heartbeat)),
            ],
        )
        .await;
    }

    /// Serve the whole server side of a successful handshake.
    pub async fn serve_handshake(&mut self, channel_max: u16, frame_max: u32, channel: u16) {
        let header = self.receive_raw(8).await;
        assert_eq!(&header[..], &PROTOCOL_HEADER);

        self.send_connection_start(0, 9, "PLAIN AMQPLAIN", "en_US")
            .await;
        self.expect_method(class::CONNECTION, connection::START_OK)
            .await;

        self.send_connection_tune(channel_max, frame_max, 60).await;
        self.expect_method(class::CONNECTION, connection::TUNE_OK)
            .await;

        let open = self.expect_method(class::CONNECTION, connection::OPEN).await;
        assert_eq!(open.arguments.string("virtual_host").unwrap(), "/");
        self.send_method(
            0,
            class::CONNECTION,
            connection::OPEN_OK,
            vec![("known_hosts", FieldValue::ShortStr(String::new()))],
        )
        .await;

        self.expect_method(class::CHANNEL, channel_method::OPEN).await;
        self.send_method(
            channel,
            class::CHANNEL,
            channel_method::OPEN_OK,
            vec![("channel_id", FieldValue::LongStr(String::new()))],
        )
        .await;
    }

    /// Send a complete single-body-frame delivery.
    pub async fn send_delivery(
        &mut self,
        channel: u16,
        delivery_tag: u64,
        exchange: &str,
        routing_key: &str,
        properties: BasicProperties,
        body: &[u8],
    ) {
        self.send_deliver_method(channel, delivery_tag, exchange, routing_key)
            .await;
        self.send_frame(&Frame::Header(
            channel,
            ContentHeader::basic(body.len() as u64, properties),
        ))
        .await;
        self.send_frame(&Frame::Body(channel, Bytes::copy_from_slice(body)))
            .await;
    }

    pub async fn send_deliver_method(
        &mut self,
        channel: u16,
        delivery_tag: u64,
        exchange: &str,
        routing_key: &str,
    ) {
        self.send_method(
            channel,
            class::BASIC,
            basic::DELIVER,
            vec![
                ("consumer_tag", FieldValue::ShortStr("ctag".to_string())),
                ("delivery_tag", FieldValue::U64(delivery_tag)),
                ("redelivered", FieldValue::Bool(false)),
                ("exchange", FieldValue::ShortStr(exchange.to_string())),
                ("routing_key", FieldValue::ShortStr(routing_key.to_string())),
            ],
        )
        .await;
    }
}
