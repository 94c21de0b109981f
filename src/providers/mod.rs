use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use crate::data::DataAttachment;
use crate::error::{TranslateError, TranslateResult};
use crate::settings::{ProviderSettings, env_value};

mod claude;
mod openai;
pub(crate) mod retry;

pub use claude::Claude;
pub use openai::OpenAI;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Doubao,
    DeepSeek,
    OpenAI,
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Doubao => "doubao",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Claude => "claude",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "doubao" | "ark" | "volcengine" => Some(ProviderKind::Doubao),
            "deepseek" => Some(ProviderKind::DeepSeek),
            "openai" => Some(ProviderKind::OpenAI),
            "claude" | "anthropic" => Some(ProviderKind::Claude),
            _ => None,
        }
    }

    fn key_env(&self) -> &'static str {
        match self {
            ProviderKind::Doubao => "DOUBAO_API_KEY",
            ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
            ProviderKind::OpenAI => "OPENAI_API_KEY",
            ProviderKind::Claude => "ANTHROPIC_API_KEY",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Doubao => "https://ark.cn-beijing.volces.com/api/v3",
            ProviderKind::DeepSeek => "https://api.deepseek.com/v1",
            ProviderKind::OpenAI => "https://api.openai.com/v1",
            ProviderKind::Claude => "https://api.anthropic.com/v1",
        }
    }

    fn default_model(&self) -> Option<&'static str> {
        match self {
            // Ark routes by endpoint id, there is no sensible default.
            ProviderKind::Doubao => None,
            ProviderKind::DeepSeek => Some("deepseek-chat"),
            ProviderKind::OpenAI => Some("gpt-4o-mini"),
            ProviderKind::Claude => Some("claude-3-5-sonnet-latest"),
        }
    }

    fn default_vision(&self) -> bool {
        !matches!(self, ProviderKind::DeepSeek)
    }
}

/// Upstream failure of a completion call.
#[derive(Error, Debug, Clone)]
#[error("provider request failed{}: {message}", format_status(.status))]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return Self::new(
                None,
                format!("request timed out after {}s", timeout.as_secs()),
            );
        }
        Self::new(err.status().map(|status| status.as_u16()), err.to_string())
    }

    pub(crate) fn unusable(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

fn format_status(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" ({})", code))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, Clone, Copy)]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone)]
pub enum MessagePart {
    Text(String),
    Data(DataAttachment),
}

impl Message {
    pub fn system(content: String) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user_data(data: DataAttachment) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Data(data)],
        }
    }
}

/// Appends to the last user message when it exists so text and image travel together.
pub(crate) fn push_user_part(messages: &mut Vec<Message>, part: MessagePart) {
    if let Some(last) = messages.last_mut()
        && matches!(last.role, MessageRole::User)
    {
        last.parts.push(part);
        return;
    }
    messages.push(Message {
        role: MessageRole::User,
        parts: vec![part],
    });
}

pub type ProviderFuture =
    Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send>>;

pub trait Provider: Clone + Send + Sync {
    fn append_system_input(self, input: String) -> Self;
    fn append_user_input(self, input: String) -> Self;
    fn append_user_data(self, data: DataAttachment) -> Self;
    fn with_max_tokens(self, max_tokens: u32) -> Self;
    fn with_timeout(self, timeout: Duration) -> Self;
    fn supports_vision(&self) -> bool;
    fn model(&self) -> &str;
    fn complete(self) -> ProviderFuture;
}

#[derive(Debug, Clone)]
pub enum ProviderImpl {
    OpenAI(OpenAI),
    Claude(Claude),
}

impl Provider for ProviderImpl {
    fn append_system_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_system_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_system_input(input))
            }
        }
    }

    fn append_user_input(self, input: String) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.append_user_input(input))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.append_user_input(input))
            }
        }
    }

    fn append_user_data(self, data: DataAttachment) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => ProviderImpl::OpenAI(provider.append_user_data(data)),
            ProviderImpl::Claude(provider) => ProviderImpl::Claude(provider.append_user_data(data)),
        }
    }

    fn with_max_tokens(self, max_tokens: u32) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => {
                ProviderImpl::OpenAI(provider.with_max_tokens(max_tokens))
            }
            ProviderImpl::Claude(provider) => {
                ProviderImpl::Claude(provider.with_max_tokens(max_tokens))
            }
        }
    }

    fn with_timeout(self, timeout: Duration) -> Self {
        match self {
            ProviderImpl::OpenAI(provider) => ProviderImpl::OpenAI(provider.with_timeout(timeout)),
            ProviderImpl::Claude(provider) => ProviderImpl::Claude(provider.with_timeout(timeout)),
        }
    }

    fn supports_vision(&self) -> bool {
        match self {
            ProviderImpl::OpenAI(provider) => provider.supports_vision(),
            ProviderImpl::Claude(provider) => provider.supports_vision(),
        }
    }

    fn model(&self) -> &str {
        match self {
            ProviderImpl::OpenAI(provider) => provider.model(),
            ProviderImpl::Claude(provider) => provider.model(),
        }
    }

    fn complete(self) -> ProviderFuture {
        match self {
            ProviderImpl::OpenAI(provider) => provider.complete(),
            ProviderImpl::Claude(provider) => provider.complete(),
        }
    }
}

/// Builds the configured provider, applying environment overrides for keys and endpoint ids.
pub fn build_provider(settings: &ProviderSettings) -> TranslateResult<ProviderImpl> {
    let kind = ProviderKind::from_name(&settings.name).ok_or_else(|| {
        TranslateError::validation(format!("unknown provider '{}'", settings.name))
    })?;
    let key = resolve_key(kind, settings.api_key.as_deref())?;
    let model = resolve_model(kind, settings.model.as_deref())?;
    let base_url = settings
        .base_url
        .clone()
        .unwrap_or_else(|| kind.default_base_url().to_string());
    let vision = settings.vision.unwrap_or_else(|| kind.default_vision());

    let provider = match kind {
        ProviderKind::Claude => ProviderImpl::Claude(
            Claude::new(key)
                .with_model(model)
                .with_base_url(base_url)
                .with_vision(vision),
        ),
        _ => ProviderImpl::OpenAI(
            OpenAI::new(kind.as_str(), key)
                .with_model(model)
                .with_base_url(base_url)
                .with_vision(vision),
        ),
    };
    Ok(provider)
}

pub fn resolve_key(kind: ProviderKind, configured: Option<&str>) -> TranslateResult<String> {
    env_value(kind.key_env())
        .or_else(|| configured.map(|key| key.to_string()))
        .ok_or_else(|| {
            TranslateError::validation(format!(
                "API key not configured for {} (set {})",
                kind.as_str(),
                kind.key_env()
            ))
        })
}

fn resolve_model(kind: ProviderKind, configured: Option<&str>) -> TranslateResult<String> {
    let from_env = match kind {
        ProviderKind::Doubao => env_value("DOUBAO_ENDPOINT_ID"),
        _ => None,
    };
    from_env
        .or_else(|| configured.map(|model| model.to_string()))
        .or_else(|| kind.default_model().map(|model| model.to_string()))
        .ok_or_else(|| {
            TranslateError::validation(format!(
                "model not configured for {} (set [provider].model or DOUBAO_ENDPOINT_ID)",
                kind.as_str()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_are_lenient() {
        assert_eq!(ProviderKind::from_name(" Doubao "), Some(ProviderKind::Doubao));
        assert_eq!(ProviderKind::from_name("anthropic"), Some(ProviderKind::Claude));
        assert_eq!(ProviderKind::from_name("gemini"), None);
    }

    #[test]
    fn error_display_includes_status() {
        let err = ProviderError::new(Some(401), "invalid key");
        assert_eq!(err.to_string(), "provider request failed (401): invalid key");
        let err = ProviderError::new(None, "request timed out after 15s");
        assert_eq!(
            err.to_string(),
            "provider request failed: request timed out after 15s"
        );
    }

    #[test]
    fn user_parts_are_merged_into_one_message() {
        let mut messages = vec![Message::system("sys".to_string())];
        push_user_part(&mut messages, MessagePart::Text("a".to_string()));
        push_user_part(&mut messages, MessagePart::Text("b".to_string()));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].parts.len(), 2);
    }
}
