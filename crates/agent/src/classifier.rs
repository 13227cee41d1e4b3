use std::sync::Arc;

use tracing::{info, warn};

use payplan_core::domain::message::Intent;

use crate::llm::{GatewayFailure, LlmClient};
use crate::prompts::INTENT_PROMPT;

/// Classification result plus the raw answer, kept for "could not understand" replies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub intent: Intent,
    pub raw_response: String,
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, user_input: &str) -> Result<Classification, GatewayFailure> {
        let raw_response = match self.llm.complete(INTENT_PROMPT, user_input).await.into_result() {
            Ok(text) => text,
            Err(failure) => {
                warn!(event_name = "agent.classifier.gateway_failed", error = %failure, "intent classification failed");
                return Err(failure);
            }
        };

        let intent = parse_intent(&raw_response);
        info!(event_name = "agent.classifier.classified", intent = intent.as_str(), "intent classified");
        Ok(Classification { intent, raw_response })
    }
}

/// First line whose first token is a known keyword wins.
pub fn parse_intent(response: &str) -> Intent {
    response
        .to_uppercase()
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .find_map(|token| Intent::KEYWORDS.into_iter().find(|intent| intent.as_str() == token))
        .unwrap_or(Intent::Unknown)
}
