use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::batch::{self, BatchOptions};
use crate::data::DataAttachment;
use crate::error::TranslateResult;
use crate::glossary::Glossary;
use crate::providers::{Provider, ProviderError, ProviderUsage};
use crate::settings::{Settings, Timeouts, TranslationSettings};
use crate::translations::{self, PageLine, ParsedTranslation};

const CONNECTIVITY_MAX_TOKENS: u32 = 5;

/// Timeout class of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClass {
    Connectivity,
    Region,
    Page,
    Document,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectivityReport {
    pub model: Option<String>,
    pub reply: String,
    pub usage: Option<ProviderUsage>,
}

/// Provider plus the glossary and limits every call needs.
pub struct Translator<P: Provider> {
    provider: P,
    glossary: Arc<Glossary>,
    settings: TranslationSettings,
    timeouts: Timeouts,
}

impl<P: Provider> Translator<P> {
    pub fn new(provider: P, glossary: Arc<Glossary>, settings: &Settings) -> Self {
        Self {
            provider,
            glossary,
            settings: settings.translation.clone(),
            timeouts: settings.timeouts,
        }
    }

    pub fn glossary(&self) -> &Glossary {
        &self.glossary
    }

    pub fn supports_vision(&self) -> bool {
        self.provider.supports_vision()
    }

    pub fn default_target_lang(&self) -> &str {
        &self.settings.target_lang
    }

    pub fn timeout(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Connectivity => self.timeouts.connectivity,
            CallClass::Region => self.timeouts.region,
            CallClass::Page => self.timeouts.page,
            CallClass::Document => self.timeouts.document,
        }
    }

    fn request(&self, class: CallClass) -> P {
        self.provider
            .clone()
            .with_timeout(self.timeout(class))
            .with_max_tokens(self.settings.max_tokens)
    }

    pub async fn translate_batch(
        &self,
        texts: &[String],
        target_lang: &str,
        class: CallClass,
    ) -> TranslateResult<Vec<String>> {
        let glossary = self.glossary.to_prompt_table()?;
        let options = BatchOptions {
            separator: self.settings.separator.clone(),
            max_tokens: self.settings.max_tokens,
            timeout: self.timeout(class),
        };
        batch::translate_batch(
            self.provider.clone(),
            texts,
            target_lang,
            glossary.as_deref(),
            &options,
        )
        .await
    }

    /// Recognises and translates a cropped region in one vision call.
    pub async fn translate_region_image(
        &self,
        image: DataAttachment,
        target_lang: &str,
        class: CallClass,
    ) -> TranslateResult<ParsedTranslation> {
        let glossary = self.glossary.to_prompt_table()?;
        let prompt = translations::render_region_prompt(target_lang, glossary.as_deref())?;
        let response = self
            .request(class)
            .append_user_data(image)
            .append_user_input(prompt)
            .complete()
            .await?;
        Ok(translations::parse_tagged(&response.text))
    }

    pub async fn transcribe_image(
        &self,
        image: DataAttachment,
        class: CallClass,
    ) -> TranslateResult<String> {
        let prompt = translations::render_ocr_prompt()?;
        let response = self
            .request(class)
            .append_user_data(image)
            .append_user_input(prompt)
            .complete()
            .await?;
        Ok(response.text.trim().to_string())
    }

    pub async fn translate_page_image(
        &self,
        image: DataAttachment,
        target_lang: &str,
        class: CallClass,
    ) -> TranslateResult<Vec<PageLine>> {
        let glossary = self.glossary.to_prompt_table()?;
        let prompt = translations::render_page_prompt(target_lang, glossary.as_deref())?;
        let response = self
            .request(class)
            .append_user_data(image)
            .append_user_input(prompt)
            .complete()
            .await?;
        let lines = translations::parse_page_lines(&response.text);
        debug!("vision page translation produced {} blocks", lines.len());
        Ok(lines)
    }

    pub async fn check_connectivity(&self) -> TranslateResult<ConnectivityReport> {
        let response = self
            .provider
            .clone()
            .with_timeout(self.timeout(CallClass::Connectivity))
            .with_max_tokens(CONNECTIVITY_MAX_TOKENS)
            .append_user_input(translations::CONNECTIVITY_PROMPT.to_string())
            .complete()
            .await?;
        if response.text.trim().is_empty() {
            return Err(ProviderError::unusable("connectivity check returned no text").into());
        }
        Ok(ConnectivityReport {
            model: response.model,
            reply: response.text,
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glossary::NewGlossaryEntry;
    use crate::test_util::StubProvider;

    fn translator(provider: StubProvider) -> Translator<StubProvider> {
        Translator::new(
            provider,
            Arc::new(Glossary::in_memory()),
            &Settings::default(),
        )
    }

    #[tokio::test]
    async fn glossary_updates_apply_on_next_call() {
        let provider = StubProvider::replying(|_| Ok("x".to_string()));
        let translator = translator(provider.clone());
        let texts = vec!["The API".to_string()];

        translator
            .translate_batch(&texts, "zh", CallClass::Page)
            .await
            .unwrap();
        translator
            .glossary()
            .add(NewGlossaryEntry {
                source: "API".to_string(),
                target: "接口".to_string(),
                ..NewGlossaryEntry::default()
            })
            .unwrap();
        translator
            .translate_batch(&texts, "zh", CallClass::Document)
            .await
            .unwrap();

        let calls = provider.calls();
        assert!(!calls[0].system[0].contains("| API | 接口 |"));
        assert!(calls[1].system[0].contains("| API | 接口 |"));
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(120)));
        assert_eq!(calls[1].timeout, Some(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn connectivity_check_uses_short_budget() {
        let provider = StubProvider::replying(|_| Ok("Hello".to_string()));
        let report = translator(provider.clone())
            .check_connectivity()
            .await
            .unwrap();
        assert_eq!(report.model.as_deref(), Some("stub-model"));
        let call = &provider.calls()[0];
        assert_eq!(call.user, vec!["Hi".to_string()]);
        assert_eq!(call.max_tokens, Some(5));
        assert_eq!(call.timeout, Some(Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn region_image_answers_are_parsed() {
        let provider =
            StubProvider::replying(|_| Ok("【原文】Throughput\n【译文】吞吐量".to_string()));
        let parsed = translator(provider.clone())
            .translate_region_image(DataAttachment::png(vec![0]), "zh", CallClass::Region)
            .await
            .unwrap();
        assert_eq!(parsed.translated(), "吞吐量");
        assert_eq!(provider.calls()[0].images.len(), 1);
    }
}
