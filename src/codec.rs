//! AMQP 0-9-1 Binary Encoding and Decoding
//!
//! This module provides the wire codec for AMQP 0-9-1: a byte-level
//! [`Encoder`]/[`Decoder`] pair for the protocol primitives (network byte
//! order integers, short and long strings, field tables), and a declarative
//! schema table mapping every `(class_id, method_id)` pair the client speaks
//! to its ordered argument layout. Method frames are encoded and decoded by
//! one generic walker over that schema instead of per-method functions.
//!
//! # Overview
//!
//! - **Encoder**: appends primitives to a growable buffer
//! - **Decoder**: consumes primitives from a received payload
//! - **Schema**: `method_def(class_id, method_id)` returns the field layout,
//!   including `Bit` fields that pack LSB-first into shared octets
//!
//! # Examples
//!
//! ```rust
//! use dumq_amqp091::codec::{Decoder, Encoder};
//!
//! let mut encoder = Encoder::new();
//! encoder.put_shortstr("guest")?;
//! encoder.put_long(131_072);
//!
//! let mut decoder = Decoder::new(encoder.finish());
//! assert_eq!(decoder.get_shortstr()?, "guest");
//! assert_eq!(decoder.get_long()?, 131_072);
//! # Ok::<(), dumq_amqp091::AmqpError>(())
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{basic, channel, class, connection, exchange, queue};
use crate::error::{AmqpError, AmqpResult};
use crate::types::{FieldTable, FieldValue};

/// AMQP 0-9-1 Encoder
pub struct Encoder {
    buffer: BytesMut,
}

impl Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Encoder {
            buffer: BytesMut::new(),
        }
    }

    /// Create a new encoder with initial capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Encoder {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Consume the encoder and return the encoded bytes
    pub fn finish(self) -> Bytes {
        self.buffer.freeze()
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Encode an octet
    pub fn put_octet(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    /// Encode a short (u16, network byte order)
    pub fn put_short(&mut self, value: u16) {
        self.buffer.put_u16(value);
    }

    /// Encode a long (u32, network byte order)
    pub fn put_long(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    /// Encode a long-long (u64, network byte order)
    pub fn put_longlong(&mut self, value: u64) {
        self.buffer.put_u64(value);
    }

    /// Encode a short string (length octet + bytes, max 255)
    pub fn put_shortstr(&mut self, value: &str) -> AmqpResult<()> {
        if value.len() > 255 {
            return Err(AmqpError::encoding(format!(
                "short string of {} bytes exceeds 255",
                value.len()
            )));
        }
        self.buffer.put_u8(value.len() as u8);
        self.buffer.put_slice(value.as_bytes());
        Ok(())
    }

    /// Encode a long string (length long + bytes)
    pub fn put_longstr(&mut self, value: &str) {
        self.buffer.put_u32(value.len() as u32);
        self.buffer.put_slice(value.as_bytes());
    }

    /// Encode up to eight bits packed LSB-first into one octet
    pub fn put_bits(&mut self, bits: &[bool]) -> AmqpResult<()> {
        if bits.len() > 8 {
            return Err(AmqpError::encoding("more than 8 bits in one octet"));
        }
        let mut octet = 0u8;
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                octet |= 1 << i;
            }
        }
        self.buffer.put_u8(octet);
        Ok(())
    }

    /// Encode a field table
    pub fn put_table(&mut self, table: &FieldTable) -> AmqpResult<()> {
        let mut inner = Encoder::new();
        for (name, value) in table.iter() {
            inner.put_shortstr(name)?;
            inner.put_field_value(value)?;
        }
        let payload = inner.finish();
        self.buffer.put_u32(payload.len() as u32);
        self.buffer.put_slice(&payload);
        Ok(())
    }

    /// Encode a tagged field-table value
    pub fn put_field_value(&mut self, value: &FieldValue) -> AmqpResult<()> {
        match value {
            FieldValue::Void => self.buffer.put_u8(b'V'),
            FieldValue::Bool(b) => {
                self.buffer.put_u8(b't');
                self.buffer.put_u8(*b as u8);
            }
            FieldValue::I8(n) => {
                self.buffer.put_u8(b'b');
                self.buffer.put_i8(*n);
            }
            FieldValue::I16(n) => {
                self.buffer.put_u8(b's');
                self.buffer.put_i16(*n);
            }
            FieldValue::I32(n) => {
                self.buffer.put_u8(b'I');
                self.buffer.put_i32(*n);
            }
            FieldValue::I64(n) => {
                self.buffer.put_u8(b'l');
                self.buffer.put_i64(*n);
            }
            FieldValue::F32(f) => {
                self.buffer.put_u8(b'f');
                self.buffer.put_f32(*f);
            }
            FieldValue::F64(f) => {
                self.buffer.put_u8(b'd');
                self.buffer.put_f64(*f);
            }
            FieldValue::Timestamp(t) => {
                self.buffer.put_u8(b'T');
                self.buffer.put_u64(*t);
            }
            FieldValue::LongStr(s) => {
                self.buffer.put_u8(b'S');
                self.put_longstr(s);
            }
            FieldValue::Table(t) => {
                self.buffer.put_u8(b'F');
                self.put_table(t)?;
            }
            other => {
                return Err(AmqpError::encoding(format!(
                    "value {:?} is not representable in a field table",
                    other
                )));
            }
        }
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// AMQP 0-9-1 Decoder
pub struct Decoder {
    buffer: Bytes,
}

impl Decoder {
    /// Create a new decoder over received bytes
    pub fn new(buffer: Bytes) -> Self {
        Decoder { buffer }
    }

    /// Number of bytes left to decode
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    fn need(&self, n: usize) -> AmqpResult<()> {
        if self.buffer.remaining() < n {
            return Err(AmqpError::decoding(format!(
                "need {} more bytes, {} available",
                n,
                self.buffer.remaining()
            )));
        }
        Ok(())
    }

    /// Decode an octet
    pub fn get_octet(&mut self) -> AmqpResult<u8> {
        self.need(1)?;
        Ok(self.buffer.get_u8())
    }

    /// Decode a short (u16, network byte order)
    pub fn get_short(&mut self) -> AmqpResult<u16> {
        self.need(2)?;
        Ok(self.buffer.get_u16())
    }

    /// Decode a long (u32, network byte order)
    pub fn get_long(&mut self) -> AmqpResult<u32> {
        self.need(4)?;
        Ok(self.buffer.get_u32())
    }

    /// Decode a long-long (u64, network byte order)
    pub fn get_longlong(&mut self) -> AmqpResult<u64> {
        self.need(8)?;
        Ok(self.buffer.get_u64())
    }

    fn get_str_bytes(&mut self, len: usize) -> AmqpResult<String> {
        self.need(len)?;
        let raw = self.buffer.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|_| AmqpError::decoding("string is not valid UTF-8"))
    }

    /// Decode a short string
    pub fn get_shortstr(&mut self) -> AmqpResult<String> {
        let len = self.get_octet()? as usize;
        self.get_str_bytes(len)
    }

    /// Decode a long string
    pub fn get_longstr(&mut self) -> AmqpResult<String> {
        let len = self.get_long()? as usize;
        self.get_str_bytes(len)
    }

    /// Decode a field table
    pub fn get_table(&mut self) -> AmqpResult<FieldTable> {
        let len = self.get_long()? as usize;
        self.need(len)?;
        let mut inner = Decoder::new(self.buffer.split_to(len));
        let mut table = FieldTable::new();
        while inner.remaining() > 0 {
            let name = inner.get_shortstr()?;
            let value = inner.get_field_value()?;
            table.insert(name, value);
        }
        Ok(table)
    }

    /// Decode a tagged field-table value
    pub fn get_field_value(&mut self) -> AmqpResult<FieldValue> {
        let tag = self.get_octet()?;
        let value = match tag {
            b'V' => FieldValue::Void,
            b't' => FieldValue::Bool(self.get_octet()? != 0),
            b'b' => {
                self.need(1)?;
                FieldValue::I8(self.buffer.get_i8())
            }
            b's' => {
                self.need(2)?;
                FieldValue::I16(self.buffer.get_i16())
            }
            b'I' => {
                self.need(4)?;
                FieldValue::I32(self.buffer.get_i32())
            }
            b'l' => {
                self.need(8)?;
                FieldValue::I64(self.buffer.get_i64())
            }
            b'f' => {
                self.need(4)?;
                FieldValue::F32(self.buffer.get_f32())
            }
            b'd' => {
                self.need(8)?;
                FieldValue::F64(self.buffer.get_f64())
            }
            b'T' => FieldValue::Timestamp(self.get_longlong()?),
            b'S' => FieldValue::LongStr(self.get_longstr()?),
            b'F' => FieldValue::Table(self.get_table()?),
            other => {
                return Err(AmqpError::decoding(format!(
                    "unknown field table tag 0x{:02x}",
                    other
                )));
            }
        };
        Ok(value)
    }
}

/// Wire kind of one method argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Octet,
    Short,
    Long,
    LongLong,
    Bit,
    ShortStr,
    LongStr,
    Table,
}

/// Declarative layout of one AMQP method's arguments
pub struct MethodDef {
    /// Class id the method belongs to
    pub class_id: u16,
    /// Method id within the class
    pub method_id: u16,
    /// Dotted method name for diagnostics
    pub name: &'static str,
    /// Ordered argument layout
    pub fields: &'static [(&'static str, FieldKind)],
}

use FieldKind::{Bit, Long, LongLong, LongStr, Octet, Short, ShortStr, Table};

static METHODS: &[MethodDef] = &[
    MethodDef {
        class_id: class::CONNECTION,
        method_id: connection::START,
        name: "connection.start",
        fields: &[
            ("version_major", Octet),
            ("version_minor", Octet),
            ("server_properties", Table),
            ("mechanisms", LongStr),
            ("locales", LongStr),
        ],
    },
    MethodDef {
        class_id: class::CONNECTION,
        method_id: connection::START_OK,
        name: "connection.start-ok",
        fields: &[
            ("client_properties", Table),
            ("mechanism", ShortStr),
            ("response", LongStr),
            ("locale", ShortStr),
        ],
    },
    MethodDef {
        class_id: class::CONNECTION,
        method_id: connection::SECURE,
        name: "connection.secure",
        fields: &[("challenge", LongStr)],
    },
    MethodDef {
        class_id: class::CONNECTION,
        method_id: connection::SECURE_OK,
        name: "connection.secure-ok",
        fields: &[("response", LongStr)],
    },
    MethodDef {
        class_id: class::CONNECTION,
        method_id: connection::TUNE,
        name: "connection.tune",
        fields: &[
            ("channel_max", Short),
            ("frame_max", Long),
            ("heartbeat", Short),
        ],
    },
    MethodDef {
        class_id: class::CONNECTION,
        method_id: connection::TUNE_OK,
        name: "connection.tune-ok",
        fields: &[
            ("channel_max", Short),
            ("frame_max", Long),
            ("heartbeat", Short),
        ],
    },
    MethodDef {
        class_id: class::CONNECTION,
        method_id: connection::OPEN,
        name: "connection.open",
        fields: &[
            ("virtual_host", ShortStr),
            ("capabilities", ShortStr),
            ("insist", Bit),
        ],
    },
    MethodDef {
        class_id: class::CONNECTION,
        method_id: connection::OPEN_OK,
        name: "connection.open-ok",
        fields: &[("known_hosts", ShortStr)],
    },
    MethodDef {
        class_id: class::CONNECTION,
        method_id: connection::CLOSE,
        name: "connection.close",
        fields: &[
            ("reply_code", Short),
            ("reply_text", ShortStr),
            ("class_id", Short),
            ("method_id", Short),
        ],
    },
    MethodDef {
        class_id: class::CONNECTION,
        method_id: connection::CLOSE_OK,
        name: "connection.close-ok",
        fields: &[],
    },
    MethodDef {
        class_id: class::CHANNEL,
        method_id: channel::OPEN,
        name: "channel.open",
        fields: &[("out_of_band", ShortStr)],
    },
    MethodDef {
        class_id: class::CHANNEL,
        method_id: channel::OPEN_OK,
        name: "channel.open-ok",
        fields: &[("channel_id", LongStr)],
    },
    MethodDef {
        class_id: class::CHANNEL,
        method_id: channel::CLOSE,
        name: "channel.close",
        fields: &[
            ("reply_code", Short),
            ("reply_text", ShortStr),
            ("class_id", Short),
            ("method_id", Short),
        ],
    },
    MethodDef {
        class_id: class::CHANNEL,
        method_id: channel::CLOSE_OK,
        name: "channel.close-ok",
        fields: &[],
    },
    MethodDef {
        class_id: class::EXCHANGE,
        method_id: exchange::DECLARE,
        name: "exchange.declare",
        fields: &[
            ("ticket", Short),
            ("exchange", ShortStr),
            ("type", ShortStr),
            ("passive", Bit),
            ("durable", Bit),
            ("auto_delete", Bit),
            ("internal", Bit),
            ("no_wait", Bit),
            ("arguments", Table),
        ],
    },
    MethodDef {
        class_id: class::EXCHANGE,
        method_id: exchange::DECLARE_OK,
        name: "exchange.declare-ok",
        fields: &[],
    },
    MethodDef {
        class_id: class::EXCHANGE,
        method_id: exchange::DELETE,
        name: "exchange.delete",
        fields: &[
            ("ticket", Short),
            ("exchange", ShortStr),
            ("if_unused", Bit),
            ("no_wait", Bit),
        ],
    },
    MethodDef {
        class_id: class::EXCHANGE,
        method_id: exchange::DELETE_OK,
        name: "exchange.delete-ok",
        fields: &[],
    },
    MethodDef {
        class_id: class::EXCHANGE,
        method_id: exchange::BIND,
        name: "exchange.bind",
        fields: &[
            ("ticket", Short),
            ("destination", ShortStr),
            ("source", ShortStr),
            ("routing_key", ShortStr),
            ("no_wait", Bit),
            ("arguments", Table),
        ],
    },
    MethodDef {
        class_id: class::EXCHANGE,
        method_id: exchange::BIND_OK,
        name: "exchange.bind-ok",
        fields: &[],
    },
    MethodDef {
        class_id: class::EXCHANGE,
        method_id: exchange::UNBIND,
        name: "exchange.unbind",
        fields: &[
            ("ticket", Short),
            ("destination", ShortStr),
            ("source", ShortStr),
            ("routing_key", ShortStr),
            ("no_wait", Bit),
            ("arguments", Table),
        ],
    },
    MethodDef {
        class_id: class::EXCHANGE,
        method_id: exchange::UNBIND_OK,
        name: "exchange.unbind-ok",
        fields: &[],
    },
    MethodDef {
        class_id: class::QUEUE,
        method_id: queue::DECLARE,
        name: "queue.declare",
        fields: &[
            ("ticket", Short),
            ("queue", ShortStr),
            ("passive", Bit),
            ("durable", Bit),
            ("exclusive", Bit),
            ("auto_delete", Bit),
            ("no_wait", Bit),
            ("arguments", Table),
        ],
    },
    MethodDef {
        class_id: class::QUEUE,
        method_id: queue::DECLARE_OK,
        name: "queue.declare-ok",
        fields: &[
            ("queue", ShortStr),
            ("message_count", Long),
            ("consumer_count", Long),
        ],
    },
    MethodDef {
        class_id: class::QUEUE,
        method_id: queue::BIND,
        name: "queue.bind",
        fields: &[
            ("ticket", Short),
            ("queue", ShortStr),
            ("exchange", ShortStr),
            ("routing_key", ShortStr),
            ("no_wait", Bit),
            ("arguments", Table),
        ],
    },
    MethodDef {
        class_id: class::QUEUE,
        method_id: queue::BIND_OK,
        name: "queue.bind-ok",
        fields: &[],
    },
    MethodDef {
        class_id: class::QUEUE,
        method_id: queue::UNBIND,
        name: "queue.unbind",
        fields: &[
            ("ticket", Short),
            ("queue", ShortStr),
            ("exchange", ShortStr),
            ("routing_key", ShortStr),
            ("arguments", Table),
        ],
    },
    MethodDef {
        class_id: class::QUEUE,
        method_id: queue::UNBIND_OK,
        name: "queue.unbind-ok",
        fields: &[],
    },
    MethodDef {
        class_id: class::QUEUE,
        method_id: queue::DELETE,
        name: "queue.delete",
        fields: &[
            ("ticket", Short),
            ("queue", ShortStr),
            ("if_unused", Bit),
            ("if_empty", Bit),
            ("no_wait", Bit),
        ],
    },
    MethodDef {
        class_id: class::QUEUE,
        method_id: queue::DELETE_OK,
        name: "queue.delete-ok",
        fields: &[("message_count", Long)],
    },
    MethodDef {
        class_id: class::BASIC,
        method_id: basic::CONSUME,
        name: "basic.consume",
        fields: &[
            ("ticket", Short),
            ("queue", ShortStr),
            ("consumer_tag", ShortStr),
            ("no_local", Bit),
            ("no_ack", Bit),
            ("exclusive", Bit),
            ("no_wait", Bit),
            ("arguments", Table),
        ],
    },
    MethodDef {
        class_id: class::BASIC,
        method_id: basic::CONSUME_OK,
        name: "basic.consume-ok",
        fields: &[("consumer_tag", ShortStr)],
    },
    MethodDef {
        class_id: class::BASIC,
        method_id: basic::PUBLISH,
        name: "basic.publish",
        fields: &[
            ("ticket", Short),
            ("exchange", ShortStr),
            ("routing_key", ShortStr),
            ("mandatory", Bit),
            ("immediate", Bit),
        ],
    },
    MethodDef {
        class_id: class::BASIC,
        method_id: basic::DELIVER,
        name: "basic.deliver",
        fields: &[
            ("consumer_tag", ShortStr),
            ("delivery_tag", LongLong),
            ("redelivered", Bit),
            ("exchange", ShortStr),
            ("routing_key", ShortStr),
        ],
    },
    MethodDef {
        class_id: class::BASIC,
        method_id: basic::ACK,
        name: "basic.ack",
        fields: &[("delivery_tag", LongLong), ("multiple", Bit)],
    },
    MethodDef {
        class_id: class::BASIC,
        method_id: basic::NACK,
        name: "basic.nack",
        fields: &[
            ("delivery_tag", LongLong),
            ("multiple", Bit),
            ("requeue", Bit),
        ],
    },
];

/// Look up the argument layout for a `(class_id, method_id)` pair
pub fn method_def(class_id: u16, method_id: u16) -> AmqpResult<&'static MethodDef> {
    METHODS
        .iter()
        .find(|def| def.class_id == class_id && def.method_id == method_id)
        .ok_or_else(|| {
            AmqpError::decoding(format!("unknown method {}.{}", class_id, method_id))
        })
}

/// Dotted name of a method for diagnostics, or `class.method` ids if unknown
pub fn method_name(class_id: u16, method_id: u16) -> String {
    match method_def(class_id, method_id) {
        Ok(def) => def.name.to_string(),
        Err(_) => format!("{}.{}", class_id, method_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_round_trip() {
        let mut encoder = Encoder::new();
        encoder.put_octet(0x2A);
        encoder.put_short(0x0102);
        encoder.put_long(0xDEADBEEF);
        encoder.put_longlong(0x0102030405060708);

        let mut decoder = Decoder::new(encoder.finish());
        assert_eq!(decoder.get_octet().unwrap(), 0x2A);
        assert_eq!(decoder.get_short().unwrap(), 0x0102);
        assert_eq!(decoder.get_long().unwrap(), 0xDEADBEEF);
        assert_eq!(decoder.get_longlong().unwrap(), 0x0102030405060708);
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_network_byte_order() {
        let mut encoder = Encoder::new();
        encoder.put_short(0x0100);
        let bytes = encoder.finish();
        assert_eq!(&bytes[..], &[0x01, 0x00]);
    }

    #[test]
    fn test_shortstr_round_trip() {
        let mut encoder = Encoder::new();
        encoder.put_shortstr("hello").unwrap();

        let bytes = encoder.finish();
        assert_eq!(bytes[0], 5);

        let mut decoder = Decoder::new(bytes);
        assert_eq!(decoder.get_shortstr().unwrap(), "hello");
    }

    #[test]
    fn test_shortstr_too_long() {
        let long = "x".repeat(256);
        let mut encoder = Encoder::new();
        assert!(matches!(
            encoder.put_shortstr(&long),
            Err(AmqpError::Encoding(_))
        ));
    }

    #[test]
    fn test_longstr_round_trip() {
        let sasl = "\0guest\0guest";
        let mut encoder = Encoder::new();
        encoder.put_longstr(sasl);

        let mut decoder = Decoder::new(encoder.finish());
        assert_eq!(decoder.get_longstr().unwrap(), sasl);
    }

    #[test]
    fn test_bit_packing() {
        let mut encoder = Encoder::new();
        encoder
            .put_bits(&[true, false, true, true, false])
            .unwrap();

        let bytes = encoder.finish();
        // LSB-first: bits 0, 2, 3 set
        assert_eq!(bytes[0], 0b0000_1101);
    }

    #[test]
    fn test_table_round_trip() {
        let mut capabilities = FieldTable::new();
        capabilities.insert("authentication_failure_close", true);

        let mut table = FieldTable::new();
        table.insert("product", "dumq");
        table.insert("retries", FieldValue::I32(-3));
        table.insert("stamp", FieldValue::Timestamp(1_700_000_000));
        table.insert("capabilities", FieldValue::Table(capabilities));

        let mut encoder = Encoder::new();
        encoder.put_table(&table).unwrap();

        let mut decoder = Decoder::new(encoder.finish());
        let decoded = decoder.get_table().unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_empty_table() {
        let mut encoder = Encoder::new();
        encoder.put_table(&FieldTable::new()).unwrap();

        let bytes = encoder.finish();
        assert_eq!(&bytes[..], &[0, 0, 0, 0]);

        let mut decoder = Decoder::new(bytes);
        assert!(decoder.get_table().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_table_tag() {
        let mut decoder = Decoder::new(Bytes::from_static(&[b'Z', 0, 0]));
        assert!(matches!(
            decoder.get_field_value(),
            Err(AmqpError::Decoding(_))
        ));
    }

    #[test]
    fn test_short_string_in_table_rejected() {
        let mut table = FieldTable::new();
        table.insert("bad", FieldValue::ShortStr("nope".into()));

        let mut encoder = Encoder::new();
        assert!(matches!(
            encoder.put_table(&table),
            Err(AmqpError::Encoding(_))
        ));
    }

    #[test]
    fn test_truncated_input() {
        let mut decoder = Decoder::new(Bytes::from_static(&[0x00]));
        assert!(matches!(decoder.get_long(), Err(AmqpError::Decoding(_))));
    }

    #[test]
    fn test_method_def_lookup() {
        let def = method_def(60, 60).unwrap();
        assert_eq!(def.name, "basic.deliver");
        assert_eq!(def.fields.len(), 5);

        assert!(method_def(99, 1).is_err());
    }

    #[test]
    fn test_method_names() {
        assert_eq!(method_name(10, 10), "connection.start");
        assert_eq!(method_name(50, 11), "queue.declare-ok");
        assert_eq!(method_name(42, 7), "42.7");
    }

    #[test]
    fn test_exchange_unbind_ok_errata_id() {
        let def = method_def(40, 51).unwrap();
        assert_eq!(def.name, "exchange.unbind-ok");
    }
}
