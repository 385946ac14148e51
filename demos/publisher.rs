//! Publish a handful of messages to the default exchange.
//!
//! Run against a local broker:
//!
//! ```text
//! RUST_LOG=debug cargo run --example publisher
//! ```

use dumq_amqp091::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut session = Session::builder()
        .host("localhost")
        .port(5672)
        .user("guest")
        .password("guest")
        .role(Role::Publisher)
        .routing_key("demo")
        .build();

    session.setup().await?;

    // the default exchange routes by queue name
    session
        .queue_declare(Some("demo"), QueueDeclareOptions::default())
        .await?;

    for i in 0..5 {
        let body = format!("message {}", i);
        let options = PublishOptions {
            properties: Some(BasicProperties::new().with_content_type("text/plain")),
            ..Default::default()
        };
        session.basic_publish(body.as_bytes(), options).await?;
        println!("published: {}", body);
    }

    session.teardown(None).await;
    Ok(())
}
