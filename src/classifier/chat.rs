//! OpenAI-compatible chat-completions backend
//!
//! Posts the message context to `{base_url}/chat/completions` and reads the
//! first JSON object out of the reply text.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{LanguageModel, ModelError, ModelVerdict};
use crate::error::{EngineError, Result};

const SYSTEM_PROMPT: &str = "You are an assistant that classifies email. \
Return ONLY valid JSON with this schema: \
{\"category\": \"SCHEDULE|TASK|SPAM\", \"confidence\": number between 0 and 1, \
\"rationale\": short string}. \
SCHEDULE: the mail announces or requests a meeting, event or appointment. \
TASK: the mail asks the reader to do, reply, review or submit something. \
SPAM: advertising, newsletters and anything irrelevant.";

pub struct ChatCompletionsModel {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    rationale: Option<String>,
}

impl ChatCompletionsModel {
    pub fn new(base_url: &str, model: &str, api_key: String, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(EngineError::Config("chat backend needs an API key".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        })
    }
}

impl LanguageModel for ChatCompletionsModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn classify(&self, prompt: &str) -> std::result::Result<ModelVerdict, ModelError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.0,
            "top_p": 1,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ModelError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(ModelError::Rejected(format!("HTTP {}", status)));
        }

        let body: ChatResponse = response
            .json()
            .map_err(|e| ModelError::Transient(format!("unreadable response: {}", e)))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(parse_reply(&content))
    }
}

/// Extract the verdict from free-form reply text.
///
/// A reply without a usable JSON object yields an empty label, which the
/// adapter maps to UNCERTAIN.
fn parse_reply(content: &str) -> ModelVerdict {
    let block = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => "",
    };

    match serde_json::from_str::<Reply>(block) {
        Ok(reply) => ModelVerdict {
            label: reply.category.unwrap_or_default(),
            confidence: reply.confidence.unwrap_or(0.0),
            rationale: reply.rationale.filter(|r| !r.trim().is_empty()),
        },
        Err(_) => ModelVerdict {
            label: String::new(),
            confidence: 0.0,
            rationale: Some("unparseable model reply".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_with_surrounding_text() {
        let verdict = parse_reply(
            "Sure! ```json\n{\"category\": \"TASK\", \"confidence\": 0.82, \"rationale\": \"asks for a report\"}\n```",
        );
        assert_eq!(verdict.label, "TASK");
        assert_eq!(verdict.confidence, 0.82);
        assert_eq!(verdict.rationale.as_deref(), Some("asks for a report"));
    }

    #[test]
    fn test_parse_reply_without_json() {
        let verdict = parse_reply("I cannot classify this.");
        assert_eq!(verdict.label, "");
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_parse_reply_missing_confidence() {
        let verdict = parse_reply("{\"category\": \"SPAM\"}");
        assert_eq!(verdict.label, "SPAM");
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.rationale.is_none());
    }

    #[test]
    fn test_missing_api_key_is_a_config_error() {
        let err = ChatCompletionsModel::new(
            "https://api.upstage.ai/v1/solar",
            "solar-pro",
            "  ".to_string(),
            Duration::from_secs(5),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
