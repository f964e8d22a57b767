//! Logs from a background task and a tracing layer, then closes with a flush

use ecapplog::prelude::*;
use tokio::time::{sleep, Duration};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig {
        flush_on_close: true,
        protocol: ProtocolVersion::V2,
        ..ClientConfig::new("ECAPPLOG-BURST")
    };
    let client = LogClient::builder(config)
        .with_drop_hook(|record| eprintln!("dropped: {}", record))
        .with_error_hook(|e| eprintln!("client error: {}", e))
        .build()?;
    client.open()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EcapplogLayer::new(client.clone(), LayerConfig::default()))
        .init();

    const AMOUNT: usize = 100;

    let producer = {
        let client = client.clone();
        tokio::spawn(async move {
            for i in 0..AMOUNT {
                client.log(
                    chrono::Local::now(),
                    Priority::Debug,
                    "app",
                    format!("First log: {}", i),
                    LogOptions::new().with_color("#00FF00"),
                );
                tracing::warn!(category = "traced", iteration = i, "Second log");
                sleep(Duration::from_millis(50)).await;
            }
        })
    };

    println!("Sending logs...");
    producer.await?;

    println!("Closing...");
    client.close().await;
    Ok(())
}
