//! Consume messages from a queue and print them.
//!
//! Run against a local broker:
//!
//! ```text
//! RUST_LOG=debug cargo run --example consumer
//! ```

use dumq_amqp091::prelude::*;
use futures::FutureExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut session = Session::builder()
        .host("localhost")
        .port(5672)
        .user("guest")
        .password("guest")
        .queue("demo")
        .build();

    session.setup().await?;
    let consumer_tag = session.prepare_to_consume().await?;
    println!("consuming as {} (ctrl-c to stop)", consumer_tag);

    let shutdown = session.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.request();
    });

    let mut handler = |delivery: Delivery| {
        async move {
            match delivery.body_as_text() {
                Some(text) => println!("[{}] {}", delivery.routing_key, text),
                None => println!("[{}] {} bytes", delivery.routing_key, delivery.body.len()),
            }
            Ok::<(), AmqpError>(())
        }
        .boxed()
    };

    match session.consume(&mut handler).await {
        Ok(()) => println!("peer closed the session"),
        Err(AmqpError::Cancelled) => println!("stopped"),
        Err(e) => eprintln!("consume failed: {}", e),
    }
    Ok(())
}
