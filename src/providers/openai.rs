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

/// Chat-completions client; Doubao (Ark), DeepSeek and OpenAI share this wire format.
#[derive(Debug, Clone)]
pub struct OpenAI {
    label: String,
    key: String,
    model: String,
    base_url: String,
    vision: bool,
    max_tokens: u32,
    timeout: Duration,
    messages: Vec<Message>,
}

impl OpenAI {
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            model: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
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
        if self.base_url.ends_with("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }
}

impl Provider for OpenAI {
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
            let body = json!({
                "model": self.model,
                "messages": self.messages.iter().map(message_json).collect::<Vec<_>>(),
                "max_tokens": self.max_tokens,
            });

            let text = send_with_retry(
                &self.label,
                self.timeout,
                || client.post(&url).bearer_auth(&self.key).json(&body),
                extract_openai_error,
            )
            .await?;
            extract_completion(&text, &self.model)
        })
    }
}

fn message_json(message: &Message) -> Value {
    let role = match message.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
    };
    let has_data = message
        .parts
        .iter()
        .any(|part| matches!(part, MessagePart::Data(_)));
    if !has_data {
        let content = message
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text(text) => Some(text.as_str()),
                MessagePart::Data(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        return json!({"role": role, "content": content});
    }

    let content = message
        .parts
        .iter()
        .map(|part| match part {
            MessagePart::Text(text) => json!({"type": "text", "text": text}),
            MessagePart::Data(data) => {
                let url = format!("data:{};base64,{}", data.mime, BASE64.encode(&data.bytes));
                json!({"type": "image_url", "image_url": {"url": url}})
            }
        })
        .collect::<Vec<_>>();
    json!({"role": role, "content": content})
}

fn extract_completion(text: &str, fallback_model: &str) -> Result<ProviderResponse, ProviderError> {
    let payload: ChatResponse = serde_json::from_str(text).map_err(|err| {
        ProviderError::unusable(format!("failed to parse completion JSON: {}", err))
    })?;
    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ProviderError::unusable("completion contained no text"))?;

    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse {
        text: content,
        model,
        usage,
    })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
        code: Option<Value>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let mut parts = Vec::new();
    if let Some(message) = error.message.filter(|message| !message.trim().is_empty()) {
        parts.push(message);
    }
    if let Some(code) = error.code.filter(|code| !code.is_null()) {
        let code = code.as_str().map(str::to_string).unwrap_or(code.to_string());
        parts.push(format!("code: {}", code));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_json_snapshot;

    #[test]
    fn completion_snapshot() {
        let payload = r#"{
            "model": "doubao-seed-1-6",
            "choices": [{"message": {"role": "assistant", "content": "interface design\n[SEP]\nlatency"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 9, "total_tokens": 129}
        }"#;
        let response = extract_completion(payload, "ep-fallback").unwrap();
        assert_json_snapshot!(response, @r#"
        {
          "text": "interface design\n[SEP]\nlatency",
          "model": "doubao-seed-1-6",
          "usage": {
            "prompt_tokens": 120,
            "completion_tokens": 9,
            "total_tokens": 129
          }
        }
        "#);
    }

    #[test]
    fn empty_completion_is_unusable() {
        let payload = r#"{"choices": [{"message": {"content": "  "}}]}"#;
        let err = extract_completion(payload, "m").unwrap_err();
        assert_eq!(err.status, None);
        assert!(err.message.contains("no text"));
    }

    #[test]
    fn image_parts_become_data_uris() {
        let provider = OpenAI::new("doubao", "k")
            .append_user_input("read this".to_string())
            .append_user_data(DataAttachment::png(vec![1, 2, 3]));
        let value = message_json(&provider.messages[0]);
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(
            value["content"][1]["image_url"]["url"],
            "data:image/png;base64,AQID"
        );
    }

    #[test]
    fn extracts_error_message_and_code() {
        let body = r#"{"error": {"message": "The API key is invalid", "code": "AuthenticationError"}}"#;
        assert_eq!(
            extract_openai_error(body).unwrap(),
            "The API key is invalid | code: AuthenticationError"
        );
    }
}
