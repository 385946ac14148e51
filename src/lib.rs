//! AMQP 0-9-1 Client Protocol Implementation in Rust
//!
//! This library implements the client side of the AMQP 0-9-1 messaging
//! protocol: a framed session over TCP (optionally TLS), the connection and
//! channel handshake, queue and exchange operations, publishing, and a
//! consume loop with heartbeat liveness tracking.
//!
//! # Features
//!
//! - **AMQP 0-9-1 Wire Protocol**: schema-driven method frame codec with the
//!   canonical class and method ids
//! - **Async/Await**: built on top of Tokio
//! - **Single-Session Model**: one connection, one channel, one in-flight
//!   operation, with explicit lifecycle states
//! - **Heartbeats**: windowed miss tracking tolerates transient jitter
//! - **Builder Pattern**: fluent session configuration
//! - **Error Handling**: comprehensive error types with detailed messages
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dumq_amqp091::prelude::*;
//! use futures::FutureExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Configure a consumer session
//!     let mut session = Session::builder()
//!         .host("localhost")
//!         .port(5672)
//!         .user("guest")
//!         .password("guest")
//!         .queue("jobs")
//!         .build();
//!
//!     // Handshake, declare, and start consuming
//!     session.setup().await?;
//!     session.prepare_to_consume().await?;
//!
//!     let mut handler = |delivery: Delivery| {
//!         async move {
//!             println!("received: {:?}", delivery.body_as_text());
//!             Ok::<(), AmqpError>(())
//!         }
//!         .boxed()
//!     };
//!     session.consume(&mut handler).await?;
//!     Ok(())
//! }
//! ```
//!
//! Publishing mirrors the same session:
//!
//! ```rust,no_run
//! use dumq_amqp091::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::builder().role(Role::Publisher).build();
//! session.setup().await?;
//!
//! let options = PublishOptions {
//!     exchange: Some("logs".to_string()),
//!     routing_key: Some("info".to_string()),
//!     ..Default::default()
//! };
//! session.basic_publish(b"hello", options).await?;
//! session.teardown(None).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! - **`types`**: field values and tables
//! - **`codec`**: binary encoding/decoding and the method schema table
//! - **`frame`**: frame sum type and wire layout
//! - **`message`**: content headers, properties, and deliveries
//! - **`transport`**: TCP/TLS byte stream and buffered frame reads
//! - **`session`**: session state, configuration, and the wire contract
//! - **`connection`**: handshake and teardown driver
//! - **`channel`**: queue, exchange, publish, and ack operations
//! - **`consumer`**: the consume loop and heartbeat tracking
//! - **`error`**: error handling

pub mod channel;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod frame;
pub mod message;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{
    ConsumeOptions, ExchangeBindOptions, ExchangeDeclareOptions, ExchangeDeleteOptions,
    PublishOptions, QueueBindOptions, QueueDeclareOk, QueueDeclareOptions, QueueDeleteOptions,
    QueueUnbindOptions,
};
pub use connection::CloseReason;
pub use consumer::{DeliveryHandler, HeartbeatMonitor, Shutdown};
pub use error::{AmqpError, AmqpResult};
pub use frame::{Arguments, Frame, MethodFrame};
pub use message::{BasicProperties, ContentHeader, Delivery};
pub use session::{EndpointState, Role, Session, SessionBuilder, SessionConfig};
pub use transport::{Transport, TransportBuilder};
pub use types::{FieldTable, FieldValue};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        AmqpError, AmqpResult, BasicProperties, CloseReason, ConsumeOptions, Delivery,
        DeliveryHandler, EndpointState, ExchangeDeclareOptions, FieldTable, FieldValue, Frame,
        PublishOptions, QueueDeclareOptions, Role, Session, SessionBuilder, SessionConfig,
        Shutdown,
    };
}
