//! AMQP 0-9-1 Channel Operations
//!
//! One-shot methods issued on the session's open channel: queue and
//! exchange management, consumer registration, publishing, and
//! acknowledgements. Each method builds one frame and, unless `no_wait` is
//! set, blocks for the matching `*-ok` reply.
//!
//! Option resolution is uniform: a per-call value wins over the session
//! configuration, which wins over the protocol default.

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    basic, class, exchange as exchange_method, queue as queue_method, FRAME_OVERHEAD,
};
use crate::error::{AmqpError, AmqpResult};
use crate::frame::{Arguments, Frame, MethodFrame};
use crate::message::{BasicProperties, ContentHeader};
use crate::session::{EndpointState, Session};
use crate::types::{FieldTable, FieldValue};

/// Options for `queue.declare`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDeclareOptions {
    /// Only check that the queue exists
    pub passive: bool,
    /// Survive a broker restart
    pub durable: bool,
    /// Restrict to this connection
    pub exclusive: bool,
    /// Delete once the last consumer cancels
    pub auto_delete: bool,
    /// Do not wait for `declare-ok`
    pub no_wait: bool,
    /// Broker-specific declaration arguments
    pub arguments: FieldTable,
}

impl Default for QueueDeclareOptions {
    fn default() -> Self {
        QueueDeclareOptions {
            passive: false,
            durable: false,
            exclusive: false,
            auto_delete: true,
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }
}

/// Options for `queue.bind`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueBindOptions {
    /// Do not wait for `bind-ok`
    pub no_wait: bool,
    /// Broker-specific binding arguments
    pub arguments: FieldTable,
}

/// Options for `queue.unbind`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueUnbindOptions {
    /// Broker-specific binding arguments
    pub arguments: FieldTable,
}

/// Options for `queue.delete`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueDeleteOptions {
    /// Only delete if the queue has no consumers
    pub if_unused: bool,
    /// Only delete if the queue is empty
    pub if_empty: bool,
    /// Do not wait for `delete-ok`
    pub no_wait: bool,
}

/// Options for `exchange.declare`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeDeclareOptions {
    /// Exchange type
    pub exchange_type: String,
    /// Only check that the exchange exists
    pub passive: bool,
    /// Survive a broker restart
    pub durable: bool,
    /// Delete once the last binding is removed
    pub auto_delete: bool,
    /// Not directly publishable
    pub internal: bool,
    /// Do not wait for `declare-ok`
    pub no_wait: bool,
    /// Broker-specific declaration arguments
    pub arguments: FieldTable,
}

impl Default for ExchangeDeclareOptions {
    fn default() -> Self {
        ExchangeDeclareOptions {
            exchange_type: "topic".to_string(),
            passive: false,
            durable: false,
            auto_delete: false,
            internal: false,
            no_wait: false,
            arguments: FieldTable::new(),
        }
    }
}

/// Options for `exchange.bind` and `exchange.unbind`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeBindOptions {
    /// Do not wait for the reply
    pub no_wait: bool,
    /// Broker-specific binding arguments
    pub arguments: FieldTable,
}

/// Options for `exchange.delete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeDeleteOptions {
    /// Only delete if the exchange has no bindings
    pub if_unused: bool,
    /// Do not wait for `delete-ok`
    pub no_wait: bool,
}

impl Default for ExchangeDeleteOptions {
    fn default() -> Self {
        ExchangeDeleteOptions {
            if_unused: true,
            no_wait: false,
        }
    }
}

/// Options for `basic.consume`
///
/// The acknowledgement mode comes from the session configuration so the
/// consume method and the ack path cannot disagree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumeOptions {
    /// Consumer tag; generated or server-assigned when unset
    pub consumer_tag: Option<String>,
    /// Do not deliver messages published on this connection
    pub no_local: bool,
    /// Request exclusive consumer access
    pub exclusive: bool,
    /// Do not wait for `consume-ok`
    pub no_wait: bool,
    /// Broker-specific consume arguments
    pub arguments: FieldTable,
}

/// Options for `basic.publish`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Target exchange; session default when unset
    pub exchange: Option<String>,
    /// Routing key; session default when unset
    pub routing_key: Option<String>,
    /// Return the message if it cannot be routed
    pub mandatory: bool,
    /// Return the message if it cannot be delivered immediately
    pub immediate: bool,
    /// Content properties for the header frame
    pub properties: Option<BasicProperties>,
}

/// Reply of `queue.declare`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDeclareOk {
    /// Declared queue name (server-generated when requested empty)
    pub queue: String,
    /// Messages currently in the queue
    pub message_count: u32,
    /// Consumers currently attached
    pub consumer_count: u32,
}

impl Session {
    fn resolved(&self, per_call: Option<&str>, session_value: &str) -> String {
        per_call.unwrap_or(session_value).to_string()
    }

    /// Declare a queue and return the broker's view of it
    pub async fn queue_declare(
        &mut self,
        queue: Option<&str>,
        options: QueueDeclareOptions,
    ) -> AmqpResult<QueueDeclareOk> {
        let queue = self.resolved(queue, &self.config.queue);
        self.ongoing = Some((class::QUEUE, queue_method::DECLARE));
        let method = MethodFrame::new(
            class::QUEUE,
            queue_method::DECLARE,
            Arguments::from(vec![
                ("ticket", FieldValue::U16(0)),
                ("queue", FieldValue::ShortStr(queue.clone())),
                ("passive", FieldValue::Bool(options.passive)),
                ("durable", FieldValue::Bool(options.durable)),
                ("exclusive", FieldValue::Bool(options.exclusive)),
                ("auto_delete", FieldValue::Bool(options.auto_delete)),
                ("no_wait", FieldValue::Bool(options.no_wait)),
                ("arguments", FieldValue::Table(options.arguments)),
            ]),
        );
        let frame = Frame::Method(self.channel, method);
        if options.no_wait {
            self.send_frame(&frame).await?;
            return Ok(QueueDeclareOk {
                queue,
                message_count: 0,
                consumer_count: 0,
            });
        }
        let reply = self
            .wire_method(frame)
            .await?
            .into_method()?
            .expect(class::QUEUE, queue_method::DECLARE_OK)?;
        Ok(QueueDeclareOk {
            queue: reply.arguments.string("queue")?.to_string(),
            message_count: reply.arguments.long("message_count")?,
            consumer_count: reply.arguments.long("consumer_count")?,
        })
    }

    /// Bind a queue to an exchange
    pub async fn queue_bind(
        &mut self,
        queue: Option<&str>,
        exchange: Option<&str>,
        routing_key: Option<&str>,
        options: QueueBindOptions,
    ) -> AmqpResult<()> {
        let queue = self.resolved(queue, &self.config.queue);
        let exchange = self.resolved(exchange, &self.config.exchange);
        let routing_key = self.resolved(routing_key, &self.config.routing_key);
        self.ongoing = Some((class::QUEUE, queue_method::BIND));
        let method = MethodFrame::new(
            class::QUEUE,
            queue_method::BIND,
            Arguments::from(vec![
                ("ticket", FieldValue::U16(0)),
                ("queue", FieldValue::ShortStr(queue)),
                ("exchange", FieldValue::ShortStr(exchange)),
                ("routing_key", FieldValue::ShortStr(routing_key)),
                ("no_wait", FieldValue::Bool(options.no_wait)),
                ("arguments", FieldValue::Table(options.arguments)),
            ]),
        );
        let frame = Frame::Method(self.channel, method);
        if options.no_wait {
            return self.send_frame(&frame).await;
        }
        self.wire_method(frame)
            .await?
            .into_method()?
            .expect(class::QUEUE, queue_method::BIND_OK)?;
        Ok(())
    }

    /// Unbind a queue from an exchange
    pub async fn queue_unbind(
        &mut self,
        queue: Option<&str>,
        exchange: Option<&str>,
        routing_key: Option<&str>,
        options: QueueUnbindOptions,
    ) -> AmqpResult<()> {
        let queue = self.resolved(queue, &self.config.queue);
        let exchange = self.resolved(exchange, &self.config.exchange);
        let routing_key = self.resolved(routing_key, &self.config.routing_key);
        self.ongoing = Some((class::QUEUE, queue_method::UNBIND));
        let method = MethodFrame::new(
            class::QUEUE,
            queue_method::UNBIND,
            Arguments::from(vec![
                ("ticket", FieldValue::U16(0)),
                ("queue", FieldValue::ShortStr(queue)),
                ("exchange", FieldValue::ShortStr(exchange)),
                ("routing_key", FieldValue::ShortStr(routing_key)),
                ("arguments", FieldValue::Table(options.arguments)),
            ]),
        );
        self.wire_method(Frame::Method(self.channel, method))
            .await?
            .into_method()?
            .expect(class::QUEUE, queue_method::UNBIND_OK)?;
        Ok(())
    }

    /// Delete a queue and return the purged message count
    pub async fn queue_delete(
        &mut self,
        queue: Option<&str>,
        options: QueueDeleteOptions,
    ) -> AmqpResult<u32> {
        let queue = self.resolved(queue, &self.config.queue);
        self.ongoing = Some((class::QUEUE, queue_method::DELETE));
        let method = MethodFrame::new(
            class::QUEUE,
            queue_method::DELETE,
            Arguments::from(vec![
                ("ticket", FieldValue::U16(0)),
                ("queue", FieldValue::ShortStr(queue)),
                ("if_unused", FieldValue::Bool(options.if_unused)),
                ("if_empty", FieldValue::Bool(options.if_empty)),
                ("no_wait", FieldValue::Bool(options.no_wait)),
            ]),
        );
        let frame = Frame::Method(self.channel, method);
        if options.no_wait {
            self.send_frame(&frame).await?;
            return Ok(0);
        }
        let reply = self
            .wire_method(frame)
            .await?
            .into_method()?
            .expect(class::QUEUE, queue_method::DELETE_OK)?;
        reply.arguments.long("message_count")
    }

    /// Declare an exchange
    pub async fn exchange_declare(
        &mut self,
        exchange: Option<&str>,
        options: ExchangeDeclareOptions,
    ) -> AmqpResult<()> {
        let exchange = self.resolved(exchange, &self.config.exchange);
        self.ongoing = Some((class::EXCHANGE, exchange_method::DECLARE));
        let method = MethodFrame::new(
            class::EXCHANGE,
            exchange_method::DECLARE,
            Arguments::from(vec![
                ("ticket", FieldValue::U16(0)),
                ("exchange", FieldValue::ShortStr(exchange)),
                ("type", FieldValue::ShortStr(options.exchange_type)),
                ("passive", FieldValue::Bool(options.passive)),
                ("durable", FieldValue::Bool(options.durable)),
                ("auto_delete", FieldValue::Bool(options.auto_delete)),
                ("internal", FieldValue::Bool(options.internal)),
                ("no_wait", FieldValue::Bool(options.no_wait)),
                ("arguments", FieldValue::Table(options.arguments)),
            ]),
        );
        let frame = Frame::Method(self.channel, method);
        if options.no_wait {
            return self.send_frame(&frame).await;
        }
        self.wire_method(frame)
            .await?
            .into_method()?
            .expect(class::EXCHANGE, exchange_method::DECLARE_OK)?;
        Ok(())
    }

    /// Bind an exchange to an exchange
    pub async fn exchange_bind(
        &mut self,
        destination: Option<&str>,
        source: Option<&str>,
        routing_key: Option<&str>,
        options: ExchangeBindOptions,
    ) -> AmqpResult<()> {
        self.exchange_bind_or_unbind(
            exchange_method::BIND,
            exchange_method::BIND_OK,
            destination,
            source,
            routing_key,
            options,
        )
        .await
    }

    /// Unbind an exchange from an exchange
    pub async fn exchange_unbind(
        &mut self,
        destination: Option<&str>,
        source: Option<&str>,
        routing_key: Option<&str>,
        options: ExchangeBindOptions,
    ) -> AmqpResult<()> {
        self.exchange_bind_or_unbind(
            exchange_method::UNBIND,
            exchange_method::UNBIND_OK,
            destination,
            source,
            routing_key,
            options,
        )
        .await
    }

    async fn exchange_bind_or_unbind(
        &mut self,
        method_id: u16,
        reply_id: u16,
        destination: Option<&str>,
        source: Option<&str>,
        routing_key: Option<&str>,
        options: ExchangeBindOptions,
    ) -> AmqpResult<()> {
        let destination = self.resolved(destination, &self.config.exchange);
        let source = self.resolved(source, &self.config.exchange);
        let routing_key = self.resolved(routing_key, &self.config.routing_key);
        self.ongoing = Some((class::EXCHANGE, method_id));
        let method = MethodFrame::new(
            class::EXCHANGE,
            method_id,
            Arguments::from(vec![
                ("ticket", FieldValue::U16(0)),
                ("destination", FieldValue::ShortStr(destination)),
                ("source", FieldValue::ShortStr(source)),
                ("routing_key", FieldValue::ShortStr(routing_key)),
                ("no_wait", FieldValue::Bool(options.no_wait)),
                ("arguments", FieldValue::Table(options.arguments)),
            ]),
        );
        let frame = Frame::Method(self.channel, method);
        if options.no_wait {
            return self.send_frame(&frame).await;
        }
        self.wire_method(frame)
            .await?
            .into_method()?
            .expect(class::EXCHANGE, reply_id)?;
        Ok(())
    }

    /// Delete an exchange
    pub async fn exchange_delete(
        &mut self,
        exchange: Option<&str>,
        options: ExchangeDeleteOptions,
    ) -> AmqpResult<()> {
        let exchange = self.resolved(exchange, &self.config.exchange);
        self.ongoing = Some((class::EXCHANGE, exchange_method::DELETE));
        let method = MethodFrame::new(
            class::EXCHANGE,
            exchange_method::DELETE,
            Arguments::from(vec![
                ("ticket", FieldValue::U16(0)),
                ("exchange", FieldValue::ShortStr(exchange)),
                ("if_unused", FieldValue::Bool(options.if_unused)),
                ("no_wait", FieldValue::Bool(options.no_wait)),
            ]),
        );
        let frame = Frame::Method(self.channel, method);
        if options.no_wait {
            return self.send_frame(&frame).await;
        }
        self.wire_method(frame)
            .await?
            .into_method()?
            .expect(class::EXCHANGE, exchange_method::DELETE_OK)?;
        Ok(())
    }

    /// Register a consumer and return its tag
    pub async fn basic_consume(&mut self, options: ConsumeOptions) -> AmqpResult<String> {
        let queue = self.resolved(None, &self.config.queue);
        let consumer_tag = match options.consumer_tag {
            Some(tag) => tag,
            // with no_wait there is no reply to learn a server tag from
            None if options.no_wait => format!("ctag-{}", Uuid::new_v4()),
            None => String::new(),
        };
        self.ongoing = Some((class::BASIC, basic::CONSUME));
        let method = MethodFrame::new(
            class::BASIC,
            basic::CONSUME,
            Arguments::from(vec![
                ("ticket", FieldValue::U16(0)),
                ("queue", FieldValue::ShortStr(queue)),
                ("consumer_tag", FieldValue::ShortStr(consumer_tag.clone())),
                ("no_local", FieldValue::Bool(options.no_local)),
                ("no_ack", FieldValue::Bool(self.config.no_ack)),
                ("exclusive", FieldValue::Bool(options.exclusive)),
                ("no_wait", FieldValue::Bool(options.no_wait)),
                ("arguments", FieldValue::Table(options.arguments)),
            ]),
        );
        let frame = Frame::Method(self.channel, method);
        if options.no_wait {
            self.send_frame(&frame).await?;
            return Ok(consumer_tag);
        }
        let reply = self
            .wire_method(frame)
            .await?
            .into_method()?
            .expect(class::BASIC, basic::CONSUME_OK)?;
        Ok(reply.arguments.string("consumer_tag")?.to_string())
    }

    /// Publish a message: one method frame, one content header, and as many
    /// body frames as the negotiated frame size requires. No reply is
    /// awaited.
    pub async fn basic_publish(
        &mut self,
        payload: &[u8],
        options: PublishOptions,
    ) -> AmqpResult<()> {
        let exchange = self.resolved(options.exchange.as_deref(), &self.config.exchange);
        let routing_key = self.resolved(options.routing_key.as_deref(), &self.config.routing_key);
        self.ongoing = Some((class::BASIC, basic::PUBLISH));

        let method = MethodFrame::new(
            class::BASIC,
            basic::PUBLISH,
            Arguments::from(vec![
                ("ticket", FieldValue::U16(0)),
                ("exchange", FieldValue::ShortStr(exchange)),
                ("routing_key", FieldValue::ShortStr(routing_key)),
                ("mandatory", FieldValue::Bool(options.mandatory)),
                ("immediate", FieldValue::Bool(options.immediate)),
            ]),
        );
        self.send_frame(&Frame::Method(self.channel, method)).await?;

        let header = ContentHeader::basic(
            payload.len() as u64,
            options.properties.unwrap_or_default(),
        );
        self.send_frame(&Frame::Header(self.channel, header)).await?;

        // body frames must fit within frame_max including frame overhead
        let max_chunk = (self.frame_max as usize).saturating_sub(FRAME_OVERHEAD).max(1);
        for chunk in payload.chunks(max_chunk) {
            self.send_frame(&Frame::Body(
                self.channel,
                bytes::Bytes::copy_from_slice(chunk),
            ))
            .await?;
        }
        Ok(())
    }

    /// Acknowledge one delivery
    pub async fn basic_ack(&mut self, delivery_tag: u64, multiple: bool) -> AmqpResult<()> {
        let method = MethodFrame::new(
            class::BASIC,
            basic::ACK,
            Arguments::from(vec![
                ("delivery_tag", FieldValue::U64(delivery_tag)),
                ("multiple", FieldValue::Bool(multiple)),
            ]),
        );
        self.send_frame(&Frame::Method(self.channel, method)).await
    }

    /// Negatively acknowledge one delivery
    pub async fn basic_nack(
        &mut self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> AmqpResult<()> {
        let method = MethodFrame::new(
            class::BASIC,
            basic::NACK,
            Arguments::from(vec![
                ("delivery_tag", FieldValue::U64(delivery_tag)),
                ("multiple", FieldValue::Bool(multiple)),
                ("requeue", FieldValue::Bool(requeue)),
            ]),
        );
        self.send_frame(&Frame::Method(self.channel, method)).await
    }

    /// Declare the configured queue, bind it unless the default exchange is
    /// in use, and register a consumer. Returns the consumer tag.
    pub async fn prepare_to_consume(&mut self) -> AmqpResult<String> {
        if self.channel_state != EndpointState::Established {
            return Err(AmqpError::NotInitialized);
        }
        let declared = self
            .queue_declare(None, QueueDeclareOptions::default())
            .await?;
        debug!(
            "queue {} ready: {} messages, {} consumers",
            declared.queue, declared.message_count, declared.consumer_count
        );
        // the empty string is the default exchange; queues are born bound to it
        if !self.config.exchange.is_empty() {
            self.queue_bind(None, None, None, QueueBindOptions::default())
                .await?;
        }
        self.basic_consume(ConsumeOptions::default()).await
    }
}
