//! Client for the third-party chat-completion API.
//!
//! The gateway always sends the same conversation shape: the persona system
//! prompt, one example exchange that sets the tone, then the caller's prompt.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on generated tokens per reply.
pub const MAX_COMPLETION_TOKENS: u32 = 500;

const PERSONA_PROMPT: &str = "You are a warm, supportive wellness companion inside a mental-health \
self-tracking app. Listen carefully, reflect feelings back without judgement, and offer gentle, \
practical coping ideas. Keep answers short and kind. You are not a therapist: never diagnose, and \
if the user mentions self-harm or being in danger, encourage them to contact local emergency \
services or a crisis line and to reach out to someone from their support circle.";

const EXAMPLE_USER_TURN: &str = "I've been feeling really overwhelmed with work this week.";

const EXAMPLE_ASSISTANT_TURN: &str = "That sounds exhausting, and it makes sense that you feel \
overwhelmed. Would it help to pick one small task to finish today and let the rest wait? A short \
walk or a few slow breaths between tasks can also take some of the pressure off.";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub reply: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned http {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream response had no choices")]
    EmptyChoices,

    #[error("upstream choice had no message content")]
    MissingContent,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Builds the fixed message sequence sent upstream for one user prompt.
pub fn conversation(prompt: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::new("system", PERSONA_PROMPT),
        ChatMessage::new("user", EXAMPLE_USER_TURN),
        ChatMessage::new("assistant", EXAMPLE_ASSISTANT_TURN),
        ChatMessage::new("user", prompt),
    ]
}

#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl CompletionClient {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: &str, api_key: &str, model: &str) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| anyhow::anyhow!("invalid API_KEY: {e}"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }

    pub async fn complete(&self, prompt: &str) -> Result<Completion, UpstreamError> {
        let messages = conversation(prompt);
        let body = CompletionRequest {
            model: &self.model,
            messages: &messages,
            max_tokens: MAX_COMPLETION_TOKENS,
        };

        let res = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: CompletionResponse = res.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(UpstreamError::EmptyChoices)?;
        let reply = choice.message.content.ok_or(UpstreamError::MissingContent)?;

        Ok(Completion {
            reply,
            usage: parsed.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_ends_with_user_prompt() {
        let msgs = conversation("I can't sleep");
        let roles: Vec<&str> = msgs.iter().map(|m| m.role).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(msgs[3].content, "I can't sleep");
        assert_eq!(msgs[0].content, PERSONA_PROMPT);
    }

    #[test]
    fn request_body_carries_token_cap() {
        let msgs = conversation("hi");
        let body = serde_json::to_value(CompletionRequest {
            model: "gpt-3.5-turbo",
            messages: &msgs,
            max_tokens: MAX_COMPLETION_TOKENS,
        })
        .unwrap();
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["messages"].as_array().unwrap().len(), 4);
        assert_eq!(body["messages"][3]["role"], "user");
    }

    #[test]
    fn missing_usage_decodes_as_zero() {
        let parsed: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"ok"}}]}"#).unwrap();
        assert_eq!(parsed.usage, TokenUsage::default());
        assert_eq!(parsed.choices.len(), 1);
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let client = CompletionClient::new("http://127.0.0.1:9/v1/", "k", "m").unwrap();
        assert_eq!(client.endpoint, "http://127.0.0.1:9/v1/chat/completions");
    }
}
