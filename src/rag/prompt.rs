use crate::llm::{ChatTurn, GenerationRequest};
use crate::shared::models::Agent;
use crate::shared::utils::estimate_token_count;

use super::RetrievalResult;

/// Assembles the final prompt: system instructions, the ranked evidence, and
/// as much recent history as fits the token budget.
pub struct PromptBuilder {
    history_token_budget: usize,
}

impl PromptBuilder {
    pub fn new(history_token_budget: usize) -> Self {
        Self {
            history_token_budget,
        }
    }

    pub fn build(
        &self,
        agent: &Agent,
        history: &[ChatTurn],
        query: &str,
        evidence: &[RetrievalResult],
    ) -> GenerationRequest {
        let mut system = agent.system_instructions.trim().to_string();
        if !evidence.is_empty() {
            system.push_str("\n\nAnswer using the retrieved context below. If the context does not cover the question, say so instead of guessing.\n");
            for (i, result) in evidence.iter().enumerate() {
                system.push_str(&format!("\n[{}] {}", i + 1, result.content.trim()));
                if let Some(hydrated) = &result.hydrated_payload {
                    if let Some(data) = hydrated.get("hydrated_data") {
                        system.push_str(&format!("\n    data: {data}"));
                    }
                }
            }
        }

        let mut messages = self.capped_history(history);
        messages.push(ChatTurn {
            role: crate::shared::models::MessageRole::User,
            content: query.to_string(),
        });

        GenerationRequest {
            model: agent.model.clone(),
            system,
            messages,
            temperature: agent.temperature,
            max_tokens: agent.max_tokens,
        }
    }

    /// Keeps the most recent turns whose combined estimate fits the budget.
    fn capped_history(&self, history: &[ChatTurn]) -> Vec<ChatTurn> {
        let mut kept = Vec::new();
        let mut used = 0usize;
        for turn in history.iter().rev() {
            let cost = estimate_token_count(&turn.content);
            if used + cost > self.history_token_budget {
                break;
            }
            used += cost;
            kept.push(turn.clone());
        }
        kept.reverse();
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::MessageRole;
    use chrono::Utc;
    use uuid::Uuid;

    fn agent() -> Agent {
        Agent {
            id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            name: "desk".to_string(),
            system_instructions: "You are a support assistant.".to_string(),
            model: "gpt-4o-mini".to_string(),
            fallback_model: None,
            temperature: 0.2,
            max_tokens: 512,
            retrieval_mode: "text_only".to_string(),
            general_collection: "kb".to_string(),
            learned_collection: "learned".to_string(),
            min_score: 0.5,
            learned_min_score: 0.75,
            require_validation: false,
            answer_below_threshold: false,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn turn(role: MessageRole, content: &str) -> ChatTurn {
        ChatTurn {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn evidence_is_numbered_into_system_prompt() {
        let builder = PromptBuilder::new(2048);
        let evidence = vec![
            RetrievalResult {
                id: Uuid::new_v4(),
                score: 0.9,
                content: "Reset passwords from the account page.".to_string(),
                payload: serde_json::json!({}),
                hydrated_payload: None,
                learned: true,
            },
            RetrievalResult {
                id: Uuid::new_v4(),
                score: 0.6,
                content: "Contact support for locked accounts.".to_string(),
                payload: serde_json::json!({}),
                hydrated_payload: None,
                learned: false,
            },
        ];

        let request = builder.build(&agent(), &[], "how do I reset?", &evidence);
        assert!(request.system.contains("[1] Reset passwords"));
        assert!(request.system.contains("[2] Contact support"));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].content, "how do I reset?");
    }

    #[test]
    fn history_is_capped_from_the_most_recent_turn() {
        let builder = PromptBuilder::new(20);
        let long = "x".repeat(200);
        let history = vec![
            turn(MessageRole::User, &long),
            turn(MessageRole::Assistant, "short answer"),
            turn(MessageRole::User, "latest question"),
        ];

        let request = builder.build(&agent(), &history, "now", &[]);
        let contents: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert!(!contents.contains(&long.as_str()));
        assert!(contents.contains(&"latest question"));
        assert_eq!(*contents.last().unwrap(), "now");
    }
}
