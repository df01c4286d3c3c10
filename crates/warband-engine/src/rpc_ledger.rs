//! Settlement gateway client over HTTP.
//!
//! The settlement program sits behind a small JSON gateway:
//!
//! ```text
//! GET  {base}/games/{game}                -> GameAccount
//! GET  {base}/games/{game}/agents/{agent} -> AgentAccount
//! POST {base}/games/{game}/instructions   -> SettlementReceipt
//! ```
//!
//! Instructions are posted with their camelCase name as the `instruction`
//! tag. Status codes map onto [`LedgerError`]: 404 is a missing account,
//! any other 4xx is a refusal, and 5xx or transport failures are transient.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;
use warband_ledger::{
    AgentAccount, GameAccount, Instruction, LedgerClient, LedgerError, SettlementReceipt,
};
use warband_types::{AgentId, GameId};

use crate::error::EngineError;

/// A [`LedgerClient`] that forwards calls to the settlement gateway.
pub struct RpcLedger {
    client: reqwest::Client,
    base_url: String,
    game: GameId,
    closed: AtomicBool,
}

impl RpcLedger {
    /// Create a client bound to `game`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, game: GameId, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Http {
                message: format!("failed to build ledger client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            game,
            closed: AtomicBool::new(false),
        })
    }

    fn game_url(&self) -> String {
        format!("{}/games/{}", self.base_url, self.game)
    }

    fn ensure_open(&self) -> Result<(), LedgerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LedgerError::Closed);
        }
        Ok(())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        call: &'static str,
        not_found: LedgerError,
    ) -> Result<T, LedgerError> {
        self.ensure_open()?;
        let response = self.client.get(url).send().await.map_err(transport)?;
        decode(response, call, not_found).await
    }
}

impl LedgerClient for RpcLedger {
    async fn fetch_game(&self) -> Result<GameAccount, LedgerError> {
        self.get(&self.game_url(), "fetchGame", LedgerError::GameNotFound)
            .await
    }

    async fn fetch_agent(&self, agent: AgentId) -> Result<AgentAccount, LedgerError> {
        let url = format!("{}/agents/{agent}", self.game_url());
        self.get(&url, "fetchAgent", LedgerError::AccountNotFound(agent))
            .await
    }

    async fn submit(&self, instruction: Instruction) -> Result<SettlementReceipt, LedgerError> {
        self.ensure_open()?;
        let name = instruction.name();
        let url = format!("{}/instructions", self.game_url());
        debug!(instruction = name, game_id = %self.game, "Submitting instruction");
        let response = self
            .client
            .post(&url)
            .json(&instruction)
            .send()
            .await
            .map_err(transport)?;
        decode(response, name, LedgerError::GameNotFound).await
    }

    async fn close(&self) -> Result<(), LedgerError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

fn transport(e: reqwest::Error) -> LedgerError {
    LedgerError::Transient(format!("gateway request failed: {e}"))
}

async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    call: &'static str,
    not_found: LedgerError,
) -> Result<T, LedgerError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| LedgerError::Malformed(format!("{call}: {e}")));
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read error body".to_owned());
    Err(status_error(status, body, call, not_found))
}

/// Classify a non-success gateway status.
fn status_error(
    status: StatusCode,
    body: String,
    call: &'static str,
    not_found: LedgerError,
) -> LedgerError {
    if status == StatusCode::NOT_FOUND {
        not_found
    } else if status.is_client_error() {
        LedgerError::Rejected {
            instruction: call,
            reason: body,
        }
    } else {
        LedgerError::Transient(format!("gateway returned {status}: {body}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use warband_types::Position;

    use super::*;
    use crate::test_support::serve_once;

    fn ledger(base: &str) -> RpcLedger {
        RpcLedger::new(base, GameId(7), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetch_agent_decodes_the_account() {
        let account = AgentAccount::new(AgentId(3), Position::new(4, -2), 750);
        let (base, request) = serve_once("200 OK", serde_json::to_string(&account).unwrap()).await;
        let fetched = ledger(&base).fetch_agent(AgentId(3)).await.unwrap();
        assert_eq!(fetched, account);
        assert!(request.await.unwrap().starts_with("GET /games/7/agents/3 "));
    }

    #[tokio::test]
    async fn missing_agent_maps_to_account_not_found() {
        let (base, _request) = serve_once("404 Not Found", String::from("{}")).await;
        let err = ledger(&base).fetch_agent(AgentId(9)).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(AgentId(9))));
    }

    #[tokio::test]
    async fn submit_posts_the_tagged_instruction() {
        let receipt = SettlementReceipt {
            reference: String::from("sig-1"),
            tokens_transferred: 0,
        };
        let (base, request) = serve_once("200 OK", serde_json::to_string(&receipt).unwrap()).await;
        let got = ledger(&base)
            .submit(Instruction::MoveAgent {
                agent: AgentId(1),
                to: Position::new(2, 0),
            })
            .await
            .unwrap();
        assert_eq!(got, receipt);
        let request = request.await.unwrap();
        assert!(request.starts_with("POST /games/7/instructions "));
        assert!(request.contains("\"instruction\":\"moveAgent\""));
    }

    #[tokio::test]
    async fn refused_instruction_is_permanent() {
        let (base, _request) =
            serve_once("409 Conflict", String::from("agent already in battle")).await;
        let err = ledger(&base)
            .submit(Instruction::BreakAlliance {
                initiator: AgentId(1),
                target: AgentId(2),
            })
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        let LedgerError::Rejected {
            instruction,
            reason,
        } = err
        else {
            panic!("expected a rejection, got {err:?}");
        };
        assert_eq!(instruction, "breakAlliance");
        assert_eq!(reason, "agent already in battle");
    }

    #[tokio::test]
    async fn gateway_outage_is_transient() {
        let (base, _request) = serve_once("503 Service Unavailable", String::new()).await;
        let err = ledger(&base).fetch_game().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn closed_client_refuses_calls() {
        let client = ledger("http://127.0.0.1:9");
        client.close().await.unwrap();
        assert!(matches!(
            client.fetch_game().await.unwrap_err(),
            LedgerError::Closed
        ));
    }

    #[test]
    fn status_classification() {
        let missing = status_error(
            StatusCode::NOT_FOUND,
            String::new(),
            "fetchGame",
            LedgerError::GameNotFound,
        );
        assert!(matches!(missing, LedgerError::GameNotFound));
        let refused = status_error(
            StatusCode::BAD_REQUEST,
            String::from("bad"),
            "killAgent",
            LedgerError::GameNotFound,
        );
        assert!(matches!(refused, LedgerError::Rejected { .. }));
        let outage = status_error(
            StatusCode::BAD_GATEWAY,
            String::new(),
            "killAgent",
            LedgerError::GameNotFound,
        );
        assert!(outage.is_transient());
    }
}
