//! Session setup
//!
//! Config plus the one-call path from a URL to a running client.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cdp::{CDPClient, WebSocketTransport};
use crate::error::Result;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Tag carried on every log line of this session
    pub id: String,
    pub ws_url: String,
    /// Default timeout for `CDPClient::execute`. `None` waits forever.
    pub command_timeout_ms: Option<u64>,
}

impl SessionConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Self::default()
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            ws_url: "ws://localhost:9222/devtools/browser".to_string(),
            command_timeout_ms: None,
        }
    }
}

/// Connect to `config.ws_url` and start a session on it.
pub async fn connect(config: &SessionConfig) -> Result<Arc<CDPClient>> {
    tracing::debug!(session = %config.id, "Connecting to {}", config.ws_url);
    let transport = WebSocketTransport::connect(&config.ws_url).await?;
    Ok(CDPClient::start_with_config(transport, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CDPError, TransportError};

    #[test]
    fn default_config_gets_unique_id() {
        let a = SessionConfig::default();
        let b = SessionConfig::default();
        assert_ne!(a.id, b.id);
        assert_eq!(a.command_timeout(), None);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"ws_url":"ws://127.0.0.1:9333/devtools/page/A","command_timeout_ms":1500}"#,
        )
        .unwrap();
        assert_eq!(config.ws_url, "ws://127.0.0.1:9333/devtools/page/A");
        assert_eq!(config.command_timeout(), Some(Duration::from_millis(1500)));
        assert!(!config.id.is_empty());
    }

    #[tokio::test]
    async fn connect_rejects_bad_endpoint() {
        let config = SessionConfig::new("http://localhost:9222");
        match connect(&config).await {
            Err(CDPError::Transport(TransportError::InvalidEndpoint(_))) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    #[ignore] // Needs running Chrome
    async fn test_session_lifecycle() {
        let client = connect(&SessionConfig::default()).await.unwrap();
        let version = client
            .send_raw("Browser.getVersion", serde_json::json!({}))
            .await
            .unwrap()
            .unwrap();
        println!("Browser version: {}", version);
        client.close().await;
    }
}
