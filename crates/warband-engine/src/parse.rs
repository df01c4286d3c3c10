//! Model response parsing into game actions.
//!
//! The model returns raw text (ideally JSON). This module extracts an
//! action name and its arguments and turns them into a [`GameAction`].
//! Arguments may sit at the top level or under `parameters`:
//!
//! ```text
//! {"action": "battle", "target": 4, "reasoning": "..."}
//! {"action_type": "move", "parameters": {"x": 3, "y": -1}}
//! ```
//!
//! Nothing here checks game rules; the engine validates every action.

use serde_json::{Map, Value};
use warband_types::{AgentId, GameAction};

use crate::error::EngineError;

/// The parsed decision from a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDecision {
    /// The chosen action, or `None` to idle this round.
    pub action: Option<GameAction>,
    /// The model's reasoning (logged, never used by the engine).
    pub reasoning: Option<String>,
}

/// Intermediate shape of the model's JSON before the action is typed.
#[derive(Debug, serde::Deserialize)]
struct RawResponse {
    #[serde(alias = "action_type")]
    action: String,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Parse a model response string into a [`ParsedDecision`].
///
/// Attempts multiple recovery strategies if the raw text is not clean JSON:
/// 1. Direct `serde_json` deserialization
/// 2. Extract JSON from markdown code blocks
/// 3. Strip trailing commas and retry
/// 4. Both of the above
///
/// # Errors
///
/// Returns [`EngineError::Parse`] when no strategy yields a known action.
pub fn parse_decision(raw: &str) -> Result<ParsedDecision, EngineError> {
    let trimmed = raw.trim();

    if let Ok(parsed) = serde_json::from_str::<RawResponse>(trimmed) {
        return convert(parsed);
    }

    if let Some(json_str) = extract_json_from_codeblock(trimmed)
        && let Ok(parsed) = serde_json::from_str::<RawResponse>(json_str)
    {
        return convert(parsed);
    }

    let cleaned = strip_trailing_commas(trimmed);
    if let Ok(parsed) = serde_json::from_str::<RawResponse>(&cleaned) {
        return convert(parsed);
    }

    if let Some(json_str) = extract_json_from_codeblock(trimmed) {
        let cleaned_inner = strip_trailing_commas(json_str);
        if let Ok(parsed) = serde_json::from_str::<RawResponse>(&cleaned_inner) {
            return convert(parsed);
        }
    }

    Err(parse_error(format!("all parse strategies failed for: {trimmed}")))
}

fn convert(raw: RawResponse) -> Result<ParsedDecision, EngineError> {
    // Nested parameters win over top-level keys of the same name.
    let mut args = raw.rest;
    args.extend(raw.parameters);
    let action = build_action(&raw.action, &args)?;
    Ok(ParsedDecision {
        action,
        reasoning: raw.reasoning,
    })
}

fn build_action(name: &str, args: &Map<String, Value>) -> Result<Option<GameAction>, EngineError> {
    let normalized: String = name
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .collect::<String>()
        .to_lowercase();
    let action = match normalized.as_str() {
        "idle" | "none" | "noaction" | "wait" | "rest" => return Ok(None),
        "move" | "moveagent" => GameAction::Move {
            x: coordinate(args, "x")?,
            y: coordinate(args, "y")?,
        },
        "battle" | "attack" | "fight" => GameAction::Battle {
            target: target(args)?,
        },
        "alliance" | "ally" | "formalliance" => GameAction::Alliance {
            target: target(args)?,
        },
        "breakalliance" | "leavealliance" => GameAction::BreakAlliance,
        "ignore" | "ignoreagent" => GameAction::Ignore {
            target: target(args)?,
            duration_secs: args.get("duration_secs").and_then(Value::as_u64),
        },
        other => return Err(parse_error(format!("unknown action: {other}"))),
    };
    Ok(Some(action))
}

fn coordinate(args: &Map<String, Value>, key: &str) -> Result<i32, EngineError> {
    args.get(key)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| parse_error(format!("move needs an integer `{key}`")))
}

fn target(args: &Map<String, Value>) -> Result<AgentId, EngineError> {
    ["target", "target_id", "agent", "agent_id"]
        .iter()
        .find_map(|key| args.get(*key))
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
        .and_then(|v| u32::try_from(v).ok())
        .map(AgentId)
        .ok_or_else(|| parse_error(String::from("action needs a numeric `target`")))
}

const fn parse_error(message: String) -> EngineError {
    EngineError::Parse { message }
}

/// Extract JSON from a markdown code block.
fn extract_json_from_codeblock(text: &str) -> Option<&str> {
    let body_start = |tag_len: usize, i: usize| {
        let after_tag = i.checked_add(tag_len).unwrap_or(i);
        text.get(after_tag..)
            .and_then(|s| s.find('\n'))
            .and_then(|nl| after_tag.checked_add(nl))
            .and_then(|pos| pos.checked_add(1))
            .unwrap_or(after_tag)
    };
    let start = text
        .find("```json")
        .map(|i| body_start(7, i))
        .or_else(|| text.find("```").map(|i| body_start(3, i)))?;

    let remaining = text.get(start..)?;
    let end = remaining.find("```")?;
    remaining.get(..end).map(str::trim)
}

/// Strip trailing commas before closing braces and brackets.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut result = String::with_capacity(text.len());
    for (i, c) in chars.iter().enumerate() {
        if *c == ',' {
            let next = chars
                .iter()
                .skip(i.saturating_add(1))
                .find(|n| !n.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        result.push(*c);
    }
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn action(raw: &str) -> Option<GameAction> {
        parse_decision(raw).unwrap().action
    }

    #[test]
    fn parse_move() {
        assert_eq!(
            action(r#"{"action": "move", "x": 3, "y": -2}"#),
            Some(GameAction::Move { x: 3, y: -2 })
        );
    }

    #[test]
    fn parse_nested_parameters() {
        assert_eq!(
            action(r#"{"action_type": "battle", "parameters": {"target": 4}}"#),
            Some(GameAction::Battle {
                target: AgentId(4)
            })
        );
    }

    #[test]
    fn parse_string_target_and_case() {
        assert_eq!(
            action(r#"{"action": "Form_Alliance", "target": "12"}"#),
            Some(GameAction::Alliance {
                target: AgentId(12)
            })
        );
    }

    #[test]
    fn parse_ignore_with_duration() {
        assert_eq!(
            action(r#"{"action": "ignore", "target": 2, "duration_secs": 600}"#),
            Some(GameAction::Ignore {
                target: AgentId(2),
                duration_secs: Some(600)
            })
        );
    }

    #[test]
    fn parse_idle_and_break() {
        assert_eq!(action(r#"{"action": "idle"}"#), None);
        assert_eq!(
            action(r#"{"action": "break_alliance"}"#),
            Some(GameAction::BreakAlliance)
        );
    }

    #[test]
    fn parse_reasoning_is_kept() {
        let decision =
            parse_decision(r#"{"action": "idle", "reasoning": "too weak to fight"}"#).unwrap();
        assert_eq!(decision.reasoning.as_deref(), Some("too weak to fight"));
    }

    #[test]
    fn parse_from_codeblock_with_trailing_comma() {
        let raw = "Here is my move:\n```json\n{\"action\": \"move\", \"x\": 1, \"y\": 1,}\n```";
        assert_eq!(action(raw), Some(GameAction::Move { x: 1, y: 1 }));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(matches!(
            parse_decision("I think I will wait."),
            Err(EngineError::Parse { .. })
        ));
        assert!(parse_decision("").is_err());
    }

    #[test]
    fn unknown_action_is_an_error() {
        assert!(parse_decision(r#"{"action": "trade", "target": 2}"#).is_err());
    }

    #[test]
    fn battle_without_target_is_an_error() {
        assert!(parse_decision(r#"{"action": "battle"}"#).is_err());
    }

    #[test]
    fn out_of_range_coordinate_is_an_error() {
        assert!(parse_decision(r#"{"action": "move", "x": 9999999999, "y": 0}"#).is_err());
    }

    #[test]
    fn extract_json_from_plain_codeblock() {
        let text = "```\n{\"action\": \"idle\"}\n```";
        assert_eq!(extract_json_from_codeblock(text), Some("{\"action\": \"idle\"}"));
    }

    #[test]
    fn strip_trailing_commas_in_arrays_and_objects() {
        assert_eq!(strip_trailing_commas("[1, 2, ]"), "[1, 2 ]");
        assert_eq!(strip_trailing_commas("{\"a\": 1,\n}"), "{\"a\": 1\n}");
    }
}
