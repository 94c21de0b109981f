use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use super::retry::send_with_retry;
use super::{
    DEFAULT_MAX_TOKENS, DEFAULT_TIMEOUT, Message, MessagePart, MessageRole, Provider,
    ProviderError, ProviderFuture, ProviderResponse, ProviderUsage, push_user_part,
};
use crate::data::DataAttachment;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct Claude {
    key: String,
    model: String,
    base_url: String,
    vision: bool,
    max_tokens: u32,
    timeout: Duration,
    messages: Vec<Message>,
}

impl Claude {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: String::new(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            vision: true,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: DEFAULT_TIMEOUT,
            messages: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_vision(mut self, vision: bool) -> Self {
        self.vision = vision;
        self
    }

    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/messages") {
            self.base_url.clone()
        } else {
            format!("{}/messages", self.base_url)
        }
    }
}

impl Provider for Claude {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        push_user_part(&mut self.messages, MessagePart::Text(input));
        self
    }

    fn append_user_data(mut self, data: DataAttachment) -> Self {
        push_user_part(&mut self.messages, MessagePart::Data(data));
        self
    }

    fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete(self) -> ProviderFuture {
        Box::pin(async move {
            let client = reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|err| ProviderError::transport(err, self.timeout))?;
            let url = self.endpoint();
            let body = request_body(&self);

            let text = send_with_retry(
                "Claude",
                self.timeout,
                || {
                    client
                        .post(&url)
                        .header("x-api-key", &self.key)
                        .header("anthropic-version", ANTHROPIC_VERSION)
                        .json(&body)
                },
                extract_claude_error,
            )
            .await?;
            extract_completion(&text, &self.model)
        })
    }
}

fn request_body(provider: &Claude) -> Value {
    let system = provider
        .messages
        .iter()
        .filter(|message| matches!(message.role, MessageRole::System))
        .flat_map(|message| message.parts.iter())
        .filter_map(|part| match part {
            MessagePart::Text(text) => Some(text.as_str()),
            MessagePart::Data(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let messages = provider
        .messages
        .iter()
        .filter(|message| matches!(message.role, MessageRole::User))
        .map(|message| {
            let content = message
                .parts
                .iter()
                .map(|part| match part {
                    MessagePart::Text(text) => json!({"type": "text", "text": text}),
                    MessagePart::Data(data) => json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": data.mime,
                            "data": BASE64.encode(&data.bytes)
                        }
                    }),
                })
                .collect::<Vec<_>>();
            json!({"role": "user", "content": content})
        })
        .collect::<Vec<_>>();

    let mut body = json!({
        "model": provider.model,
        "max_tokens": provider.max_tokens,
        "messages": messages,
    });
    if !system.trim().is_empty() {
        body["system"] = json!(system);
    }
    body
}

fn extract_completion(text: &str, fallback_model: &str) -> Result<ProviderResponse, ProviderError> {
    let payload: ClaudeResponse = serde_json::from_str(text).map_err(|err| {
        ProviderError::unusable(format!("failed to parse Claude response JSON: {}", err))
    })?;
    let content = payload
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    if content.trim().is_empty() {
        return Err(ProviderError::unusable("Claude response contained no text"));
    }
    let usage = payload.usage.map(|usage| {
        let total = usage
            .input_tokens
            .zip(usage.output_tokens)
            .map(|(input, output)| input + output);
        ProviderUsage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: total,
        }
    });
    Ok(ProviderResponse {
        text: content,
        model: payload
            .model
            .filter(|value| !value.trim().is_empty())
            .or_else(|| Some(fallback_model.to_string())),
        usage,
    })
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    match (error.message, error.kind) {
        (Some(message), Some(kind)) => Some(format!("{} | type: {}", message, kind)),
        (Some(message), None) => Some(message),
        (None, Some(kind)) => Some(kind),
        (None, None) => None,
    }
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    model: Option<String>,
    #[serde(default)]
    content: Vec<ClaudeContent>,
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_moves_to_top_level() {
        let provider = Claude::new("k")
            .with_model("claude-test")
            .append_system_input("be terse".to_string())
            .append_user_input("hello".to_string())
            .with_max_tokens(5);
        let body = request_body(&provider);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["max_tokens"], 5);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["content"][0]["text"], "hello");
    }

    #[test]
    fn joins_text_blocks_and_sums_usage() {
        let payload = r#"{
            "model": "claude-test",
            "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            "usage": {"input_tokens": 3, "output_tokens": 4}
        }"#;
        let response = extract_completion(payload, "fallback").unwrap();
        assert_eq!(response.text, "ab");
        assert_eq!(response.usage.unwrap().total_tokens, Some(7));
    }
}
