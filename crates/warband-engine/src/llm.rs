//! Language-model decision source.
//!
//! Renders each agent's view through the prompt templates, sends it to an
//! OpenAI-compatible chat completions endpoint, and parses the reply into
//! a [`GameAction`]. Works with `OpenAI`, `DeepSeek`, and Ollama endpoints.
//!
//! [`EngineDecisions`] is the enum the binary hands to the orchestrator:
//! async trait methods are not dyn-compatible, so the backend is chosen by
//! variant instead of by trait object.

use std::time::Duration;

use tracing::debug;
use warband_core::config::LlmConfig;
use warband_core::{AgentView, DecisionError, DecisionSource, StubDecisionSource};
use warband_types::{AgentId, GameAction, ValidationFeedback};

use crate::error::EngineError;
use crate::parse::parse_decision;
use crate::prompt::{PromptEngine, RenderedPrompt};

/// Asks a chat completions API for each agent's next action.
pub struct LlmDecisionSource {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    deadline: Duration,
    prompts: PromptEngine,
}

impl LlmDecisionSource {
    /// Build a source from configuration, loading the prompt templates.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Template`] if the templates cannot be loaded.
    pub fn new(config: &LlmConfig) -> Result<Self, EngineError> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            deadline: Duration::from_millis(config.request_timeout_ms),
            prompts: PromptEngine::new(&config.templates_dir)?,
        })
    }

    /// Send a prompt and return the response text.
    async fn complete(&self, prompt: &RenderedPrompt) -> Result<String, String> {
        let url = format!("{}/chat/completions", self.api_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("completion request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(format!("completion endpoint returned {status}: {error_body}"));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("completion response parse failed: {e}"))?;

        extract_content(&json)
    }

    fn deadline_ms(&self) -> u64 {
        u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX)
    }
}

impl DecisionSource for LlmDecisionSource {
    async fn next_action(&self, view: &AgentView) -> Result<Option<GameAction>, DecisionError> {
        let agent_id = view.agent_id();
        let prompt = self.prompts.render(view).map_err(|e| DecisionError::Internal {
            message: e.to_string(),
        })?;

        let raw = tokio::time::timeout(self.deadline, self.complete(&prompt))
            .await
            .map_err(|_elapsed| DecisionError::Timeout {
                agent_id,
                deadline_ms: self.deadline_ms(),
            })?
            .map_err(|message| DecisionError::Internal { message })?;

        let decision = parse_decision(&raw).map_err(|e| DecisionError::Unparseable {
            agent_id,
            message: e.to_string(),
        })?;
        debug!(
            agent_id = %agent_id,
            action = decision.action.as_ref().map_or("idle", GameAction::label),
            reasoning = decision.reasoning.as_deref().unwrap_or(""),
            "Model decision parsed"
        );
        Ok(decision.action)
    }
}

/// Extract the text content from a chat completions response.
fn extract_content(json: &serde_json::Value) -> Result<String, String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| "completion response missing choices[0].message.content".to_owned())
}

/// The decision sources the binary can run with.
pub enum EngineDecisions {
    /// A chat completions backend.
    Llm(Box<LlmDecisionSource>),
    /// Every agent idles.
    Stub(StubDecisionSource),
}

impl EngineDecisions {
    /// Human-readable name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Llm(_) => "llm",
            Self::Stub(_) => "stub",
        }
    }
}

impl DecisionSource for EngineDecisions {
    async fn next_action(&self, view: &AgentView) -> Result<Option<GameAction>, DecisionError> {
        match self {
            Self::Llm(source) => source.next_action(view).await,
            Self::Stub(source) => source.next_action(view).await,
        }
    }

    fn report(&self, agent: AgentId, feedback: &ValidationFeedback) {
        match self {
            Self::Llm(source) => source.report(agent, feedback),
            Self::Stub(source) => source.report(agent, feedback),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use warband_agents::{RulesConfig, WorldState};
    use warband_core::build_view;
    use warband_types::{Agent, GameId, GameSession, Position};
    use warband_world::TerrainMap;

    use super::*;
    use crate::test_support::{serve_once, serve_silence};

    fn templates() -> String {
        let unique = format!(
            "warband_test_llm_{}_{:?}",
            std::process::id(),
            std::thread::current().id(),
        );
        let dir = std::env::temp_dir().join(unique);
        std::fs::create_dir_all(&dir).ok();
        std::fs::write(dir.join("system.j2"), "Answer in JSON.").ok();
        std::fs::write(dir.join("agent.j2"), "You are {{ agent.name }}.").ok();
        dir.to_str().unwrap_or("").to_owned()
    }

    fn source(api_url: String, timeout_ms: u64) -> LlmDecisionSource {
        LlmDecisionSource::new(&LlmConfig {
            enabled: true,
            api_url,
            request_timeout_ms: timeout_ms,
            templates_dir: templates(),
            ..LlmConfig::default()
        })
        .unwrap()
    }

    fn view() -> AgentView {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut world = WorldState::new(GameSession::open(GameId(1), t0));
        world
            .add_agent(Agent::new(AgentId(1), String::from("Aldric"), Position::new(0, 0), 1_000))
            .unwrap();
        build_view(&world, &TerrainMap::plains(), &RulesConfig::default(), AgentId(1), t0).unwrap()
    }

    #[tokio::test]
    async fn model_reply_becomes_an_action() {
        let reply = serde_json::json!({
            "choices": [{"message": {"content": "{\"action\": \"move\", \"x\": 2, \"y\": 0}"}}]
        });
        let (base, request) = serve_once("200 OK", reply.to_string()).await;
        let action = source(base, 5_000).next_action(&view()).await.unwrap();
        assert_eq!(action, Some(GameAction::Move { x: 2, y: 0 }));

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /chat/completions "));
        assert!(request.contains("You are Aldric."));
    }

    #[tokio::test]
    async fn unparseable_reply_is_reported() {
        let reply = serde_json::json!({"choices": [{"message": {"content": "I will wait."}}]});
        let (base, _request) = serve_once("200 OK", reply.to_string()).await;
        let err = source(base, 5_000).next_action(&view()).await.unwrap_err();
        assert!(matches!(err, DecisionError::Unparseable { agent_id: AgentId(1), .. }));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let (base, _server) = serve_silence().await;
        let err = source(base, 50).next_action(&view()).await.unwrap_err();
        assert!(matches!(
            err,
            DecisionError::Timeout {
                agent_id: AgentId(1),
                deadline_ms: 50
            }
        ));
    }

    #[tokio::test]
    async fn error_status_is_internal() {
        let (base, _request) = serve_once("500 Internal Server Error", String::from("boom")).await;
        let err = source(base, 5_000).next_action(&view()).await.unwrap_err();
        assert!(matches!(err, DecisionError::Internal { .. }));
    }

    #[test]
    fn extracts_message_content() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"action\": \"idle\"}"}}]
        });
        assert_eq!(extract_content(&json).unwrap(), "{\"action\": \"idle\"}");
    }

    #[test]
    fn missing_content_is_an_error() {
        let json = serde_json::json!({"choices": []});
        assert!(extract_content(&json).is_err());
    }

    #[test]
    fn missing_templates_fail_construction() {
        let config = LlmConfig {
            enabled: true,
            templates_dir: String::from("/nonexistent/warband/templates"),
            ..LlmConfig::default()
        };
        assert!(matches!(
            LlmDecisionSource::new(&config),
            Err(EngineError::Template { .. })
        ));
    }

    #[test]
    fn stub_variant_is_named() {
        assert_eq!(EngineDecisions::Stub(StubDecisionSource::new()).name(), "stub");
    }
}
