//! HTTP publisher for narrative events.

use std::sync::RwLock;
use std::time::Duration;

use tracing::info;
use warband_core::{BroadcastError, Broadcaster, LogBroadcaster};
use warband_types::NarrativeEvent;

use crate::error::EngineError;

/// Posts each event as JSON to the social endpoint.
pub struct HttpBroadcaster {
    client: RwLock<reqwest::Client>,
    url: String,
    timeout: Duration,
}

impl HttpBroadcaster {
    /// Create a publisher for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Http`] if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: RwLock::new(
                build_client(timeout).map_err(|message| EngineError::Http { message })?,
            ),
            url: url.to_owned(),
            timeout,
        })
    }

    fn client(&self) -> Result<reqwest::Client, BroadcastError> {
        self.client
            .read()
            .map(|c| c.clone())
            .map_err(|e| BroadcastError::Transport {
                message: e.to_string(),
            })
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format!("failed to build social client: {e}"))
}

impl Broadcaster for HttpBroadcaster {
    async fn publish(&self, event: &NarrativeEvent) -> Result<(), BroadcastError> {
        let response = self
            .client()?
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| BroadcastError::Transport {
                message: e.to_string(),
            })?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BroadcastError::Rejected {
                status: status.as_u16(),
            })
        }
    }

    /// Swap in a fresh client so pooled connections are dropped.
    async fn reconnect(&self) -> Result<(), BroadcastError> {
        let fresh =
            build_client(self.timeout).map_err(|message| BroadcastError::Transport { message })?;
        let mut client = self.client.write().map_err(|e| BroadcastError::Transport {
            message: e.to_string(),
        })?;
        *client = fresh;
        info!(url = %self.url, "Social client rebuilt");
        Ok(())
    }
}

/// The publishers the binary can run with.
pub enum EngineBroadcaster {
    /// Post to the social endpoint.
    Http(HttpBroadcaster),
    /// Only log events.
    Log(LogBroadcaster),
}

impl Broadcaster for EngineBroadcaster {
    async fn publish(&self, event: &NarrativeEvent) -> Result<(), BroadcastError> {
        match self {
            Self::Http(b) => b.publish(event).await,
            Self::Log(b) => b.publish(event).await,
        }
    }

    async fn reconnect(&self) -> Result<(), BroadcastError> {
        match self {
            Self::Http(b) => b.reconnect().await,
            Self::Log(b) => b.reconnect().await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use warband_types::{AgentId, NarrativePayload};

    use super::*;
    use crate::test_support::serve_once;

    fn event() -> NarrativeEvent {
        NarrativeEvent::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            NarrativePayload::AllianceBroken {
                agent: AgentId(1),
                partner: AgentId(2),
            },
        )
    }

    #[tokio::test]
    async fn publishes_event_json() {
        let (base, request) = serve_once("200 OK", String::new()).await;
        let broadcaster =
            HttpBroadcaster::new(&format!("{base}/events"), Duration::from_secs(5)).unwrap();
        broadcaster.publish(&event()).await.unwrap();
        let request = request.await.unwrap();
        assert!(request.starts_with("POST /events "));
        assert!(request.contains("\"type\":\"alliance_broken\""));
    }

    #[tokio::test]
    async fn error_status_is_rejected() {
        let (base, _request) = serve_once("429 Too Many Requests", String::new()).await;
        let broadcaster = EngineBroadcaster::Http(
            HttpBroadcaster::new(&base, Duration::from_secs(5)).unwrap(),
        );
        let err = broadcaster.publish(&event()).await.unwrap_err();
        assert!(matches!(err, BroadcastError::Rejected { status: 429 }));
        broadcaster.reconnect().await.unwrap();
    }
}
