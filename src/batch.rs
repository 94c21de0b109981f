use std::time::Duration;
use tracing::{debug, warn};

use crate::error::TranslateResult;
use crate::providers::Provider;
use crate::translations;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub separator: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Translates `texts` in one provider call. The result always has `texts.len()` entries:
/// missing or blank segments fall back to the source text, surplus segments are dropped.
pub async fn translate_batch<P: Provider>(
    provider: P,
    texts: &[String],
    target_lang: &str,
    glossary: Option<&str>,
    options: &BatchOptions,
) -> TranslateResult<Vec<String>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let system = translations::render_batch_prompt(
        target_lang,
        &options.separator,
        texts.len(),
        glossary,
    )?;
    let joined = join_segments(texts, &options.separator);
    debug!(
        "batch translating {} segments ({} chars) into {}",
        texts.len(),
        joined.len(),
        target_lang
    );

    let response = provider
        .with_timeout(options.timeout)
        .with_max_tokens(options.max_tokens)
        .append_system_input(system)
        .append_user_input(joined)
        .complete()
        .await?;

    let segments = split_segments(&response.text, &options.separator, texts.len());
    if segments.len() != texts.len() {
        warn!(
            "provider returned {} segments for {} inputs; reconciling",
            segments.len(),
            texts.len()
        );
    }
    Ok(reconcile(texts, segments))
}

pub fn join_segments(texts: &[String], separator: &str) -> String {
    texts.join(&format!("\n{}\n", separator))
}

/// Splits on lines holding only the marker; falls back to inline markers when that yields fewer
/// segments than expected.
pub fn split_segments(response: &str, separator: &str, expected: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    for line in response.lines() {
        if line.trim() == separator {
            segments.push(current.join("\n").trim().to_string());
            current.clear();
        } else {
            current.push(line);
        }
    }
    segments.push(current.join("\n").trim().to_string());

    if segments.len() < expected && response.contains(separator) {
        let inline = response
            .split(separator)
            .map(|segment| segment.trim().to_string())
            .collect::<Vec<_>>();
        if inline.len() > segments.len() {
            return inline;
        }
    }
    segments
}

pub fn reconcile(texts: &[String], segments: Vec<String>) -> Vec<String> {
    let mut segments = segments.into_iter();
    texts
        .iter()
        .map(|original| match segments.next() {
            Some(segment) if !segment.is_empty() => segment,
            _ => original.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::test_util::StubProvider;

    fn texts(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn options() -> BatchOptions {
        BatchOptions {
            separator: "[SEP]".to_string(),
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }

    #[test]
    fn splits_on_marker_lines() {
        let segments = split_segments("一\n[SEP]\n二\n第二行\n [SEP] \n三", "[SEP]", 3);
        assert_eq!(segments, texts(&["一", "二\n第二行", "三"]));
    }

    #[test]
    fn falls_back_to_inline_markers() {
        let segments = split_segments("一 [SEP] 二 [SEP] 三", "[SEP]", 3);
        assert_eq!(segments, texts(&["一", "二", "三"]));
    }

    #[test]
    fn reconcile_pads_with_originals_and_truncates() {
        let input = texts(&["a", "b", "c"]);
        assert_eq!(reconcile(&input, texts(&["A"])), texts(&["A", "b", "c"]));
        assert_eq!(
            reconcile(&input, texts(&["A", "", "C", "D"])),
            texts(&["A", "b", "C"])
        );
    }

    #[tokio::test]
    async fn short_provider_response_keeps_length() {
        let provider = StubProvider::replying(|_| Ok("first\n[SEP]\nsecond".to_string()));
        let input = texts(&["one", "two", "three", "four"]);
        let output = translate_batch(provider.clone(), &input, "zh", None, &options())
            .await
            .unwrap();
        assert_eq!(output, texts(&["first", "second", "three", "four"]));

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].user[0], "one\n[SEP]\ntwo\n[SEP]\nthree\n[SEP]\nfour");
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn garbled_response_degrades_per_fragment() {
        let provider = StubProvider::replying(|_| Ok("[SEP]\n[SEP]\n[SEP]\n[SEP]\nX".to_string()));
        let input = texts(&["one", "two"]);
        let output = translate_batch(provider, &input, "zh", None, &options())
            .await
            .unwrap();
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn empty_input_skips_the_provider() {
        let provider = StubProvider::replying(|_| Ok("unused".to_string()));
        let output = translate_batch(provider.clone(), &[], "zh", None, &options())
            .await
            .unwrap();
        assert!(output.is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let provider =
            StubProvider::replying(|_| Err(ProviderError::new(Some(500), "upstream down")));
        let err = translate_batch(provider, &texts(&["one"]), "zh", None, &options())
            .await
            .unwrap_err();
        match err {
            crate::error::TranslateError::Provider(err) => assert_eq!(err.status, Some(500)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
