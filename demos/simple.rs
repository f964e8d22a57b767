//! Sends a few records and keeps the connection open briefly

use chrono::Utc;
use ecapplog::client::LogClient;
use ecapplog::config::ClientConfig;
use ecapplog::types::{LogOptions, Priority};
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("ecapplog=debug").init();

    let client = LogClient::new(ClientConfig::new("ECAPPLOG-SAMPLE"))?;
    client.open()?;

    for i in 0..30 {
        client.log(
            Utc::now(),
            Priority::Debug,
            "app",
            format!("First log: {}", i),
            LogOptions::new().with_original_category("app.internal"),
        );
        client.info("app", format!("Second log: {}", i));
        client.log(
            Utc::now(),
            Priority::Error,
            "app",
            format!("Third log: {}", i),
            LogOptions::new().with_extra_categories(["app_third"]),
        );
    }

    println!("Waiting 15 seconds so the connection isn't closed...");
    sleep(Duration::from_secs(15)).await;

    client.close().await;
    Ok(())
}
