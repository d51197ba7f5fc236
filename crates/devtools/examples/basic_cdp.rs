//! Basic CDP example - connect, issue a few commands, watch an event

use devtools::cdp::{Command, Empty, Event, RemoteError};
use devtools::{connect, SessionConfig};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct CreateTarget {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTargetResult {
    target_id: String,
}

impl Command for CreateTarget {
    type Response = CreateTargetResult;
    type Failure = RemoteError;

    fn method(&self) -> &str {
        "Target.createTarget"
    }
}

#[derive(Serialize)]
struct SetDiscoverTargets {
    discover: bool,
}

impl Command for SetDiscoverTargets {
    type Response = Empty;
    type Failure = RemoteError;

    fn method(&self) -> &str {
        "Target.setDiscoverTargets"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetCreated {
    target_info: serde_json::Value,
}

impl Event for TargetCreated {
    const NAME: &'static str = "Target.targetCreated";
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = SessionConfig {
        command_timeout_ms: Some(5_000),
        ..SessionConfig::new("ws://localhost:9222/devtools/browser")
    };
    println!("Connecting to Chrome at: {}", config.ws_url);
    let client = connect(&config).await?;

    let version = client
        .send_raw("Browser.getVersion", serde_json::json!({}))
        .await??;
    println!("Browser version: {}", version["product"]);

    client.on(|event: TargetCreated| {
        println!("Target created: {}", event.target_info["url"]);
    });
    client.execute(SetDiscoverTargets { discover: true }).await??;

    match client
        .execute(CreateTarget {
            url: "about:blank".to_string(),
        })
        .await?
    {
        Ok(created) => println!("Created target {}", created.target_id),
        Err(failure) => println!("Browser refused: {}", failure),
    }

    // Keep alive for a bit to see events
    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;

    client.close().await;
    println!("Disconnected");

    Ok(())
}
