//! Training-record format for offline model retraining.
//!
//! Both the session-log export and the cold archive produce this shape:
//! a three-message instruction-tuning record compatible with common LLM
//! fine-tuning pipelines.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::types::{ActionContext, OutcomeRecord};

/// System prompt used when the caller does not override it
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an autonomous Minecraft agent. Given the current world state, \
     choose the best next action and explain your reasoning.";

/// One chat message in a training record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMessage {
    pub role: String,
    pub content: String,
}

/// A three-message instruction-tuning record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub messages: Vec<TrainingMessage>,
    pub success: bool,
    pub reward: f64,
}

impl TrainingRecord {
    /// Convert an outcome record into the training shape
    pub fn from_outcome(record: &OutcomeRecord, system_prompt: &str) -> Self {
        let assistant = json!({
            "action": {
                "kind": record.action.kind,
                "target": record.action.target,
            },
            "reasoning": record
                .reason
                .clone()
                .unwrap_or_else(|| record.outcome.message.clone()),
        });

        Self {
            messages: vec![
                TrainingMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                TrainingMessage {
                    role: "user".to_string(),
                    content: render_context(&record.context),
                },
                TrainingMessage {
                    role: "assistant".to_string(),
                    content: assistant.to_string(),
                },
            ],
            success: record.outcome.success,
            reward: if record.outcome.success { 1.0 } else { 0.0 },
        }
    }
}

/// Render a compact context as the fixed-order multi-line user message
pub fn render_context(ctx: &ActionContext) -> String {
    let list_or_none = |items: &[String]| {
        if items.is_empty() {
            "none".to_string()
        } else {
            items.join(", ")
        }
    };

    format!(
        "Position: ({:.1}, {:.1}, {:.1})\n\
         Health: {:.0}/20\n\
         Food: {:.0}/20\n\
         Inventory: {}\n\
         Nearby blocks: {}\n\
         Nearby entities: {}\n\
         Time: {}\n\
         Underground: {}",
        ctx.position.x,
        ctx.position.y,
        ctx.position.z,
        ctx.health,
        ctx.food,
        list_or_none(&ctx.inventory),
        list_or_none(&ctx.nearby_blocks),
        list_or_none(&ctx.nearby_entities),
        ctx.time_of_day.label(),
        if ctx.underground { "yes" } else { "no" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionOutcome, AgentAction, Position, TimeOfDay};
    use chrono::Utc;

    fn sample_record(success: bool) -> OutcomeRecord {
        OutcomeRecord {
            timestamp: Utc::now(),
            context: ActionContext {
                position: Position { x: 1.0, y: 64.0, z: -2.5 },
                health: 17.0,
                food: 12.0,
                inventory: vec!["stone_pickaxe".to_string()],
                nearby_blocks: vec!["stone".to_string(), "iron_ore".to_string()],
                nearby_entities: Vec::new(),
                time_of_day: TimeOfDay::Night,
                underground: true,
            },
            action: AgentAction::new("mine", "iron_ore"),
            outcome: ActionOutcome {
                success,
                message: "done".to_string(),
                duration_ms: 900,
            },
            reason: Some("need iron for tools".to_string()),
        }
    }

    #[test]
    fn test_three_message_shape() {
        let record = TrainingRecord::from_outcome(&sample_record(true), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(record.messages.len(), 3);
        assert_eq!(record.messages[0].role, "system");
        assert_eq!(record.messages[1].role, "user");
        assert_eq!(record.messages[2].role, "assistant");
        assert!(record.success);
        assert_eq!(record.reward, 1.0);
    }

    #[test]
    fn test_failure_has_zero_reward() {
        let record = TrainingRecord::from_outcome(&sample_record(false), DEFAULT_SYSTEM_PROMPT);
        assert!(!record.success);
        assert_eq!(record.reward, 0.0);
    }

    #[test]
    fn test_assistant_content_is_json_action() {
        let record = TrainingRecord::from_outcome(&sample_record(true), DEFAULT_SYSTEM_PROMPT);
        let parsed: serde_json::Value =
            serde_json::from_str(&record.messages[2].content).unwrap();
        assert_eq!(parsed["action"]["kind"], "mine");
        assert_eq!(parsed["action"]["target"], "iron_ore");
        assert_eq!(parsed["reasoning"], "need iron for tools");
    }

    #[test]
    fn test_render_context_fixed_order() {
        let record = sample_record(true);
        let rendered = render_context(&record.context);
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines.len(), 8);
        assert!(lines[0].starts_with("Position:"));
        assert!(lines[1].starts_with("Health: 17/20"));
        assert!(lines[2].starts_with("Food: 12/20"));
        assert!(lines[3].starts_with("Inventory: stone_pickaxe"));
        assert!(lines[4].starts_with("Nearby blocks: stone, iron_ore"));
        assert_eq!(lines[5], "Nearby entities: none");
        assert_eq!(lines[6], "Time: night");
        assert_eq!(lines[7], "Underground: yes");
    }
}
