//! AMQP 0-9-1 Frames
//!
//! Frames are the transport PDUs: a type byte, a channel id, a size, the
//! payload, and a trailing end marker. This module models the four frame
//! kinds the client speaks as one sum type and drives the schema-based
//! method argument codec from [`crate::codec`].
//!
//! Wire layout: `type(u8) channel(u16 BE) size(u32 BE) payload FRAME_END`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{method_def, method_name, Decoder, Encoder, FieldKind};
use crate::constants::{
    channel as channel_method, class, connection, FRAME_BODY, FRAME_END, FRAME_HEADER,
    FRAME_HEARTBEAT, FRAME_METHOD, FRAME_OVERHEAD,
};
use crate::error::{AmqpError, AmqpResult};
use crate::message::ContentHeader;
use crate::types::{FieldTable, FieldValue};

/// Decoded method arguments, ordered per the method's schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments(Vec<(&'static str, FieldValue)>);

impl Arguments {
    /// Create an empty argument record
    pub fn new() -> Self {
        Arguments(Vec::new())
    }

    /// Look up an argument by schema name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    fn require(&self, name: &str) -> AmqpResult<&FieldValue> {
        self.get(name)
            .ok_or_else(|| AmqpError::decoding(format!("missing argument '{}'", name)))
    }

    /// Fetch an octet argument
    pub fn octet(&self, name: &str) -> AmqpResult<u8> {
        self.require(name)?
            .as_u8()
            .ok_or_else(|| AmqpError::decoding(format!("argument '{}' is not an octet", name)))
    }

    /// Fetch a short argument
    pub fn short(&self, name: &str) -> AmqpResult<u16> {
        self.require(name)?
            .as_u16()
            .ok_or_else(|| AmqpError::decoding(format!("argument '{}' is not a short", name)))
    }

    /// Fetch a long argument
    pub fn long(&self, name: &str) -> AmqpResult<u32> {
        self.require(name)?
            .as_u32()
            .ok_or_else(|| AmqpError::decoding(format!("argument '{}' is not a long", name)))
    }

    /// Fetch a long-long argument
    pub fn longlong(&self, name: &str) -> AmqpResult<u64> {
        self.require(name)?
            .as_u64()
            .ok_or_else(|| AmqpError::decoding(format!("argument '{}' is not a long-long", name)))
    }

    /// Fetch a bit argument
    pub fn bit(&self, name: &str) -> AmqpResult<bool> {
        self.require(name)?
            .as_bool()
            .ok_or_else(|| AmqpError::decoding(format!("argument '{}' is not a bit", name)))
    }

    /// Fetch a string argument (short or long)
    pub fn string(&self, name: &str) -> AmqpResult<&str> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| AmqpError::decoding(format!("argument '{}' is not a string", name)))
    }

    /// Fetch a table argument
    pub fn table(&self, name: &str) -> AmqpResult<&FieldTable> {
        self.require(name)?
            .as_table()
            .ok_or_else(|| AmqpError::decoding(format!("argument '{}' is not a table", name)))
    }
}

impl From<Vec<(&'static str, FieldValue)>> for Arguments {
    fn from(values: Vec<(&'static str, FieldValue)>) -> Self {
        Arguments(values)
    }
}

/// One method invocation or reply
#[derive(Debug, Clone, PartialEq)]
pub struct MethodFrame {
    /// Class id
    pub class_id: u16,
    /// Method id within the class
    pub method_id: u16,
    /// Decoded argument record
    pub arguments: Arguments,
}

impl MethodFrame {
    /// Create a method frame
    pub fn new(class_id: u16, method_id: u16, arguments: Arguments) -> Self {
        MethodFrame {
            class_id,
            method_id,
            arguments,
        }
    }

    /// Whether this frame carries the given class/method pair
    pub fn is(&self, class_id: u16, method_id: u16) -> bool {
        self.class_id == class_id && self.method_id == method_id
    }

    /// Dotted method name for diagnostics
    pub fn name(&self) -> String {
        method_name(self.class_id, self.method_id)
    }

    /// Encode class id, method id, and arguments per the method schema
    pub fn encode(&self, encoder: &mut Encoder) -> AmqpResult<()> {
        let def = method_def(self.class_id, self.method_id)
            .map_err(|_| AmqpError::encoding(format!("unknown method {}.{}", self.class_id, self.method_id)))?;
        encoder.put_short(self.class_id);
        encoder.put_short(self.method_id);

        let mut bits: Vec<bool> = Vec::new();
        for (name, kind) in def.fields {
            if *kind == FieldKind::Bit {
                bits.push(self.arguments.bit(name).map_err(to_encoding)?);
                if bits.len() == 8 {
                    encoder.put_bits(&bits)?;
                    bits.clear();
                }
                continue;
            }
            if !bits.is_empty() {
                encoder.put_bits(&bits)?;
                bits.clear();
            }
            match kind {
                FieldKind::Octet => encoder.put_octet(self.arguments.octet(name).map_err(to_encoding)?),
                FieldKind::Short => encoder.put_short(self.arguments.short(name).map_err(to_encoding)?),
                FieldKind::Long => encoder.put_long(self.arguments.long(name).map_err(to_encoding)?),
                FieldKind::LongLong => {
                    encoder.put_longlong(self.arguments.longlong(name).map_err(to_encoding)?)
                }
                FieldKind::ShortStr => {
                    encoder.put_shortstr(self.arguments.string(name).map_err(to_encoding)?)?
                }
                FieldKind::LongStr => {
                    encoder.put_longstr(self.arguments.string(name).map_err(to_encoding)?)
                }
                FieldKind::Table => encoder.put_table(self.arguments.table(name).map_err(to_encoding)?)?,
                FieldKind::Bit => unreachable!(),
            }
        }
        if !bits.is_empty() {
            encoder.put_bits(&bits)?;
        }
        Ok(())
    }

    /// Decode a method frame payload per the method schema
    pub fn decode(decoder: &mut Decoder) -> AmqpResult<MethodFrame> {
        let class_id = decoder.get_short()?;
        let method_id = decoder.get_short()?;
        let def = method_def(class_id, method_id)?;

        let mut values: Vec<(&'static str, FieldValue)> = Vec::with_capacity(def.fields.len());
        let mut i = 0;
        while i < def.fields.len() {
            let (name, kind) = def.fields[i];
            if kind == FieldKind::Bit {
                let octet = decoder.get_octet()?;
                let mut bit = 0;
                while i < def.fields.len() && def.fields[i].1 == FieldKind::Bit && bit < 8 {
                    values.push((def.fields[i].0, FieldValue::Bool(octet >> bit & 1 == 1)));
                    bit += 1;
                    i += 1;
                }
                continue;
            }
            let value = match kind {
                FieldKind::Octet => FieldValue::U8(decoder.get_octet()?),
                FieldKind::Short => FieldValue::U16(decoder.get_short()?),
                FieldKind::Long => FieldValue::U32(decoder.get_long()?),
                FieldKind::LongLong => FieldValue::U64(decoder.get_longlong()?),
                FieldKind::ShortStr => FieldValue::ShortStr(decoder.get_shortstr()?),
                FieldKind::LongStr => FieldValue::LongStr(decoder.get_longstr()?),
                FieldKind::Table => FieldValue::Table(decoder.get_table()?),
                FieldKind::Bit => unreachable!(),
            };
            values.push((name, value));
            i += 1;
        }

        Ok(MethodFrame::new(class_id, method_id, Arguments(values)))
    }

    /// Require this frame to be the given method, or fail with a diagnostic.
    ///
    /// A peer-sent `connection.close` or `channel.close` arriving instead of
    /// the awaited reply is reported with its reply code and text.
    pub fn expect(self, class_id: u16, method_id: u16) -> AmqpResult<MethodFrame> {
        if self.is(class_id, method_id) {
            return Ok(self);
        }
        let expected = method_name(class_id, method_id);
        if self.is(class::CONNECTION, connection::CLOSE)
            || self.is(class::CHANNEL, channel_method::CLOSE)
        {
            let code = self.arguments.short("reply_code").unwrap_or(0);
            let text = self
                .arguments
                .string("reply_text")
                .unwrap_or_default()
                .to_string();
            return Err(AmqpError::unexpected_frame(format!(
                "{} from peer while awaiting {}: {} {}",
                self.name(),
                expected,
                code,
                text
            )));
        }
        Err(AmqpError::unexpected_frame(format!(
            "expected {}, received {}",
            expected,
            self.name()
        )))
    }
}

fn to_encoding(err: AmqpError) -> AmqpError {
    match err {
        AmqpError::Decoding(msg) => AmqpError::Encoding(msg),
        other => other,
    }
}

/// One transport PDU
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Method frame on a channel
    Method(u16, MethodFrame),
    /// Content header frame on a channel
    Header(u16, ContentHeader),
    /// Content body frame on a channel
    Body(u16, Bytes),
    /// Heartbeat frame (channel 0 on the wire)
    Heartbeat(u16),
}

impl Frame {
    /// Channel id the frame travels on
    pub fn channel(&self) -> u16 {
        match self {
            Frame::Method(ch, _) | Frame::Header(ch, _) | Frame::Body(ch, _) | Frame::Heartbeat(ch) => {
                *ch
            }
        }
    }

    /// A heartbeat frame on channel 0
    pub fn heartbeat() -> Frame {
        Frame::Heartbeat(0)
    }

    /// Encode the full wire frame, end marker included
    pub fn to_bytes(&self) -> AmqpResult<Bytes> {
        let (frame_type, channel, payload) = match self {
            Frame::Method(ch, method) => {
                let mut encoder = Encoder::new();
                method.encode(&mut encoder)?;
                (FRAME_METHOD, *ch, encoder.finish())
            }
            Frame::Header(ch, header) => {
                let mut encoder = Encoder::new();
                header.encode(&mut encoder)?;
                (FRAME_HEADER, *ch, encoder.finish())
            }
            Frame::Body(ch, body) => (FRAME_BODY, *ch, body.clone()),
            Frame::Heartbeat(ch) => (FRAME_HEARTBEAT, *ch, Bytes::new()),
        };

        let mut buffer = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
        buffer.put_u8(frame_type);
        buffer.put_u16(channel);
        buffer.put_u32(payload.len() as u32);
        buffer.put_slice(&payload);
        buffer.put_u8(FRAME_END);
        Ok(buffer.freeze())
    }

    /// Decode a frame from its type code, channel, and payload
    pub fn decode(frame_type: u8, channel: u16, payload: Bytes) -> AmqpResult<Frame> {
        match frame_type {
            FRAME_METHOD => {
                let mut decoder = Decoder::new(payload);
                Ok(Frame::Method(channel, MethodFrame::decode(&mut decoder)?))
            }
            FRAME_HEADER => {
                let mut decoder = Decoder::new(payload);
                Ok(Frame::Header(channel, ContentHeader::decode(&mut decoder)?))
            }
            FRAME_BODY => Ok(Frame::Body(channel, payload)),
            FRAME_HEARTBEAT => Ok(Frame::Heartbeat(channel)),
            other => Err(AmqpError::decoding(format!(
                "unknown frame type {}",
                other
            ))),
        }
    }

    /// Require a method frame, or fail with a diagnostic
    pub fn into_method(self) -> AmqpResult<MethodFrame> {
        match self {
            Frame::Method(_, method) => Ok(method),
            Frame::Header(ch, _) => Err(AmqpError::unexpected_frame(format!(
                "expected a method frame, received a content header on channel {}",
                ch
            ))),
            Frame::Body(ch, _) => Err(AmqpError::unexpected_frame(format!(
                "expected a method frame, received a content body on channel {}",
                ch
            ))),
            Frame::Heartbeat(_) => Err(AmqpError::unexpected_frame(
                "expected a method frame, received a heartbeat".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{basic, queue};

    fn deliver_frame() -> MethodFrame {
        MethodFrame::new(
            class::BASIC,
            basic::DELIVER,
            Arguments::from(vec![
                ("consumer_tag", FieldValue::ShortStr("ctag".into())),
                ("delivery_tag", FieldValue::U64(7)),
                ("redelivered", FieldValue::Bool(true)),
                ("exchange", FieldValue::ShortStr("logs".into())),
                ("routing_key", FieldValue::ShortStr("info".into())),
            ]),
        )
    }

    #[test]
    fn test_method_round_trip() {
        let original = deliver_frame();
        let mut encoder = Encoder::new();
        original.encode(&mut encoder).unwrap();

        let mut decoder = Decoder::new(encoder.finish());
        let decoded = MethodFrame::decode(&mut decoder).unwrap();

        assert_eq!(decoded.class_id, original.class_id);
        assert_eq!(decoded.method_id, original.method_id);
        assert_eq!(decoded.arguments.string("consumer_tag").unwrap(), "ctag");
        assert_eq!(decoded.arguments.longlong("delivery_tag").unwrap(), 7);
        assert!(decoded.arguments.bit("redelivered").unwrap());
        assert_eq!(decoded.arguments.string("routing_key").unwrap(), "info");
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_consecutive_bits_share_octet() {
        let declare = MethodFrame::new(
            class::QUEUE,
            queue::DECLARE,
            Arguments::from(vec![
                ("ticket", FieldValue::U16(0)),
                ("queue", FieldValue::ShortStr("q".into())),
                ("passive", FieldValue::Bool(false)),
                ("durable", FieldValue::Bool(true)),
                ("exclusive", FieldValue::Bool(false)),
                ("auto_delete", FieldValue::Bool(true)),
                ("no_wait", FieldValue::Bool(false)),
                ("arguments", FieldValue::Table(FieldTable::new())),
            ]),
        );

        let mut encoder = Encoder::new();
        declare.encode(&mut encoder).unwrap();
        let bytes = encoder.finish();

        // class(2) + method(2) + ticket(2) + "q"(2) + bits(1) + table(4)
        assert_eq!(bytes.len(), 13);
        // durable is bit 1, auto_delete is bit 3
        assert_eq!(bytes[8], 0b0000_1010);

        let mut decoder = Decoder::new(bytes);
        let decoded = MethodFrame::decode(&mut decoder).unwrap();
        assert!(decoded.arguments.bit("durable").unwrap());
        assert!(decoded.arguments.bit("auto_delete").unwrap());
        assert!(!decoded.arguments.bit("no_wait").unwrap());
    }

    #[test]
    fn test_missing_argument_is_encoding_error() {
        let incomplete = MethodFrame::new(class::BASIC, basic::ACK, Arguments::new());
        let mut encoder = Encoder::new();
        assert!(matches!(
            incomplete.encode(&mut encoder),
            Err(AmqpError::Encoding(_))
        ));
    }

    #[test]
    fn test_heartbeat_wire_layout() {
        let bytes = Frame::heartbeat().to_bytes().unwrap();
        assert_eq!(&bytes[..], &[8, 0, 0, 0, 0, 0, 0, FRAME_END]);
    }

    #[test]
    fn test_frame_end_byte_present() {
        let bytes = Frame::Method(1, deliver_frame()).to_bytes().unwrap();
        assert_eq!(bytes[bytes.len() - 1], FRAME_END);
        // declared size matches the payload length
        let size = u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]) as usize;
        assert_eq!(bytes.len(), size + 8);
    }

    #[test]
    fn test_body_frame_passthrough() {
        let body = Bytes::from_static(b"hello");
        let decoded = Frame::decode(FRAME_BODY, 1, body.clone()).unwrap();
        assert_eq!(decoded, Frame::Body(1, body));
    }

    #[test]
    fn test_unknown_frame_type() {
        assert!(matches!(
            Frame::decode(9, 0, Bytes::new()),
            Err(AmqpError::Decoding(_))
        ));
    }

    #[test]
    fn test_expect_matching_method() {
        let method = deliver_frame();
        assert!(method.expect(class::BASIC, basic::DELIVER).is_ok());
    }

    #[test]
    fn test_expect_mismatch() {
        let err = deliver_frame()
            .expect(class::QUEUE, queue::DECLARE_OK)
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("queue.declare-ok"));
        assert!(text.contains("basic.deliver"));
    }

    #[test]
    fn test_expect_reports_peer_close_reason() {
        let close = MethodFrame::new(
            class::CHANNEL,
            channel_method::CLOSE,
            Arguments::from(vec![
                ("reply_code", FieldValue::U16(404)),
                ("reply_text", FieldValue::ShortStr("not found".into())),
                ("class_id", FieldValue::U16(50)),
                ("method_id", FieldValue::U16(10)),
            ]),
        );
        let err = close.expect(class::QUEUE, queue::DECLARE_OK).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("404"));
        assert!(text.contains("not found"));
    }

    #[test]
    fn test_into_method_rejects_other_frames() {
        assert!(Frame::Heartbeat(0).into_method().is_err());
        assert!(Frame::Body(1, Bytes::new()).into_method().is_err());
    }
}
