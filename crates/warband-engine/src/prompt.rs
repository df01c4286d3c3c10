//! Prompt template loading and rendering via `minijinja`.
//!
//! Templates are loaded from the filesystem (default: `templates/`) so
//! operators can tune agent behavior without recompiling. Both templates
//! render against the serialized [`AgentView`].

use minijinja::Environment;
use warband_core::AgentView;

use crate::error::EngineError;

/// Manages prompt template loading and rendering.
pub struct PromptEngine {
    env: Environment<'static>,
}

/// The complete rendered prompt ready to send to a model backend.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    /// System message establishing the rules of the game.
    pub system: String,
    /// User message with the agent's situation and the action menu.
    pub user: String,
}

impl PromptEngine {
    /// Create a prompt engine loading templates from the given directory.
    ///
    /// The directory must contain `system.j2` and `agent.j2`.
    pub fn new(templates_dir: &str) -> Result<Self, EngineError> {
        let mut env = Environment::new();
        for name in ["system", "agent"] {
            let source = load_template(templates_dir, &format!("{name}.j2"))?;
            env.add_template_owned(name, source)
                .map_err(|e| template(format!("failed to add {name} template: {e}")))?;
        }
        Ok(Self { env })
    }

    /// Render the prompt for one agent's decision.
    pub fn render(&self, view: &AgentView) -> Result<RenderedPrompt, EngineError> {
        let context = serde_json::to_value(view)
            .map_err(|e| template(format!("failed to serialize view: {e}")))?;
        Ok(RenderedPrompt {
            system: self.render_one("system", &context)?,
            user: self.render_one("agent", &context)?,
        })
    }

    fn render_one(&self, name: &str, context: &serde_json::Value) -> Result<String, EngineError> {
        self.env
            .get_template(name)
            .map_err(|e| template(format!("missing {name} template: {e}")))?
            .render(context)
            .map_err(|e| template(format!("{name} render failed: {e}")))
    }
}

const fn template(message: String) -> EngineError {
    EngineError::Template { message }
}

/// Read a template file from disk.
fn load_template(dir: &str, filename: &str) -> Result<String, EngineError> {
    let path = format!("{dir}/{filename}");
    std::fs::read_to_string(&path).map_err(|e| template(format!("failed to read {path}: {e}")))
}
