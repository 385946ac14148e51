//! AMQP 0-9-1 Content
//!
//! Content travels as a header frame followed by zero or more body frames.
//! This module provides the content-header codec ([`ContentHeader`] with
//! [`BasicProperties`] behind a 16-bit property-flag word) and the
//! [`Delivery`] value handed to consumer callbacks.
//!
//! # Examples
//!
//! ```rust
//! use dumq_amqp091::message::BasicProperties;
//!
//! let properties = BasicProperties::new()
//!     .with_content_type("application/json")
//!     .with_delivery_mode(2);
//!
//! assert_eq!(properties.content_type.as_deref(), Some("application/json"));
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::{Decoder, Encoder};
use crate::constants::{basic, class};
use crate::error::{AmqpError, AmqpResult};
use crate::frame::MethodFrame;
use crate::types::FieldTable;

// Property-flag bit positions, highest first.
const FLAG_CONTENT_TYPE: u16 = 1 << 15;
const FLAG_CONTENT_ENCODING: u16 = 1 << 14;
const FLAG_HEADERS: u16 = 1 << 13;
const FLAG_DELIVERY_MODE: u16 = 1 << 12;
const FLAG_PRIORITY: u16 = 1 << 11;
const FLAG_CORRELATION_ID: u16 = 1 << 10;
const FLAG_REPLY_TO: u16 = 1 << 9;
const FLAG_EXPIRATION: u16 = 1 << 8;
const FLAG_MESSAGE_ID: u16 = 1 << 7;
const FLAG_TIMESTAMP: u16 = 1 << 6;
const FLAG_TYPE: u16 = 1 << 5;
const FLAG_USER_ID: u16 = 1 << 4;
const FLAG_APP_ID: u16 = 1 << 3;
const FLAG_CLUSTER_ID: u16 = 1 << 2;

/// Properties carried by a basic-class content header
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BasicProperties {
    /// MIME content type
    pub content_type: Option<String>,
    /// MIME content encoding
    pub content_encoding: Option<String>,
    /// Application headers
    pub headers: Option<FieldTable>,
    /// 1 = transient, 2 = persistent
    pub delivery_mode: Option<u8>,
    /// Priority, 0 to 9
    pub priority: Option<u8>,
    /// Application correlation identifier
    pub correlation_id: Option<String>,
    /// Address to reply to
    pub reply_to: Option<String>,
    /// Message expiration
    pub expiration: Option<String>,
    /// Application message identifier
    pub message_id: Option<String>,
    /// Message timestamp (POSIX seconds)
    pub timestamp: Option<u64>,
    /// Message type name
    pub message_type: Option<String>,
    /// Creating user id
    pub user_id: Option<String>,
    /// Creating application id
    pub app_id: Option<String>,
    /// Intra-cluster routing identifier
    pub cluster_id: Option<String>,
}

impl BasicProperties {
    /// Create empty properties
    pub fn new() -> Self {
        BasicProperties::default()
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Set the content encoding
    pub fn with_content_encoding(mut self, content_encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(content_encoding.into());
        self
    }

    /// Set the application headers
    pub fn with_headers(mut self, headers: FieldTable) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Set the delivery mode
    pub fn with_delivery_mode(mut self, delivery_mode: u8) -> Self {
        self.delivery_mode = Some(delivery_mode);
        self
    }

    /// Set the correlation id
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the message id
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Whether no property is set
    pub fn is_empty(&self) -> bool {
        self.flags() == 0
    }

    fn flags(&self) -> u16 {
        let mut flags = 0;
        if self.content_type.is_some() {
            flags |= FLAG_CONTENT_TYPE;
        }
        if self.content_encoding.is_some() {
            flags |= FLAG_CONTENT_ENCODING;
        }
        if self.headers.is_some() {
            flags |= FLAG_HEADERS;
        }
        if self.delivery_mode.is_some() {
            flags |= FLAG_DELIVERY_MODE;
        }
        if self.priority.is_some() {
            flags |= FLAG_PRIORITY;
        }
        if self.correlation_id.is_some() {
            flags |= FLAG_CORRELATION_ID;
        }
        if self.reply_to.is_some() {
            flags |= FLAG_REPLY_TO;
        }
        if self.expiration.is_some() {
            flags |= FLAG_EXPIRATION;
        }
        if self.message_id.is_some() {
            flags |= FLAG_MESSAGE_ID;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_TIMESTAMP;
        }
        if self.message_type.is_some() {
            flags |= FLAG_TYPE;
        }
        if self.user_id.is_some() {
            flags |= FLAG_USER_ID;
        }
        if self.app_id.is_some() {
            flags |= FLAG_APP_ID;
        }
        if self.cluster_id.is_some() {
            flags |= FLAG_CLUSTER_ID;
        }
        flags
    }

    /// Encode the property-flag word and the present properties
    pub fn encode(&self, encoder: &mut Encoder) -> AmqpResult<()> {
        encoder.put_short(self.flags());
        if let Some(value) = &self.content_type {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.content_encoding {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.headers {
            encoder.put_table(value)?;
        }
        if let Some(value) = self.delivery_mode {
            encoder.put_octet(value);
        }
        if let Some(value) = self.priority {
            encoder.put_octet(value);
        }
        if let Some(value) = &self.correlation_id {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.reply_to {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.expiration {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.message_id {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = self.timestamp {
            encoder.put_longlong(value);
        }
        if let Some(value) = &self.message_type {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.user_id {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.app_id {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.cluster_id {
            encoder.put_shortstr(value)?;
        }
        Ok(())
    }

    /// Decode the property-flag word and the flagged properties
    pub fn decode(decoder: &mut Decoder) -> AmqpResult<BasicProperties> {
        let flags = decoder.get_short()?;
        let mut properties = BasicProperties::new();
        if flags & FLAG_CONTENT_TYPE != 0 {
            properties.content_type = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_CONTENT_ENCODING != 0 {
            properties.content_encoding = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_HEADERS != 0 {
            properties.headers = Some(decoder.get_table()?);
        }
        if flags & FLAG_DELIVERY_MODE != 0 {
            properties.delivery_mode = Some(decoder.get_octet()?);
        }
        if flags & FLAG_PRIORITY != 0 {
            properties.priority = Some(decoder.get_octet()?);
        }
        if flags & FLAG_CORRELATION_ID != 0 {
            properties.correlation_id = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_REPLY_TO != 0 {
            properties.reply_to = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_EXPIRATION != 0 {
            properties.expiration = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_MESSAGE_ID != 0 {
            properties.message_id = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_TIMESTAMP != 0 {
            properties.timestamp = Some(decoder.get_longlong()?);
        }
        if flags & FLAG_TYPE != 0 {
            properties.message_type = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_USER_ID != 0 {
            properties.user_id = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_APP_ID != 0 {
            properties.app_id = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_CLUSTER_ID != 0 {
            properties.cluster_id = Some(decoder.get_shortstr()?);
        }
        Ok(properties)
    }
}

/// Content header frame payload
#[derive(Debug, Clone, PartialEq)]
pub struct ContentHeader {
    /// Class the content belongs to (always basic for this client)
    pub class_id: u16,
    /// Reserved, always zero
    pub weight: u16,
    /// Total size of the following body frames
    pub body_size: u64,
    /// Content properties
    pub properties: BasicProperties,
}

impl ContentHeader {
    /// Create a basic-class content header
    pub fn basic(body_size: u64, properties: BasicProperties) -> Self {
        ContentHeader {
            class_id: class::BASIC,
            weight: 0,
            body_size,
            properties,
        }
    }

    /// Encode the header payload
    pub fn encode(&self, encoder: &mut Encoder) -> AmqpResult<()> {
        encoder.put_short(self.class_id);
        encoder.put_short(self.weight);
        encoder.put_longlong(self.body_size);
        self.properties.encode(encoder)
    }

    /// Decode the header payload
    pub fn decode(decoder: &mut Decoder) -> AmqpResult<ContentHeader> {
        let class_id = decoder.get_short()?;
        let weight = decoder.get_short()?;
        let body_size = decoder.get_longlong()?;
        let properties = BasicProperties::decode(decoder)?;
        Ok(ContentHeader {
            class_id,
            weight,
            body_size,
            properties,
        })
    }
}

/// One delivered message, handed to the consumer callback by value
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Tag of the consumer the message was routed to
    pub consumer_tag: String,
    /// Channel-scoped tag identifying the message for ack/nack
    pub delivery_tag: u64,
    /// Whether the message was delivered before
    pub redelivered: bool,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
    /// Content properties from the header frame
    pub properties: BasicProperties,
    /// Assembled message body
    pub body: Bytes,
}

impl Delivery {
    /// Assemble a delivery from its `basic.deliver` method frame, content
    /// properties, and accumulated body.
    pub fn from_parts(
        method: &MethodFrame,
        properties: BasicProperties,
        body: Bytes,
    ) -> AmqpResult<Delivery> {
        if !method.is(class::BASIC, basic::DELIVER) {
            return Err(AmqpError::unexpected_frame(format!(
                "cannot assemble a delivery from {}",
                method.name()
            )));
        }
        Ok(Delivery {
            consumer_tag: method.arguments.string("consumer_tag")?.to_string(),
            delivery_tag: method.arguments.longlong("delivery_tag")?,
            redelivered: method.arguments.bit("redelivered")?,
            exchange: method.arguments.string("exchange")?.to_string(),
            routing_key: method.arguments.string("routing_key")?.to_string(),
            properties,
            body,
        })
    }

    /// View the body as UTF-8 text
    pub fn body_as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Deserialize the body as JSON
    pub fn body_as_json<T: serde::de::DeserializeOwned>(&self) -> AmqpResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
