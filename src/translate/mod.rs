//! Translation backends.
//!
//! Every backend implements [`Translator`] the same way: chunk the text on
//! paragraph boundaries, transform each chunk, and rejoin the results in
//! their original order. Backends differ in transport and in what happens
//! when a chunk cannot be translated:
//!
//! | Backend | Module | Chunk failure |
//! |---------|--------|---------------|
//! | `simple` | [`free`] | keep the original chunk, log a warning |
//! | `mymemory` | [`free`] | retry once, then keep the original chunk |
//! | `google` | [`free`] | retry once, then keep the original chunk |
//! | `deepl` | [`deepl`] | fail the document |
//! | `openai` | [`llm`] | retry, then fail the document |
//! | `deepseek` | [`llm`] | retry, then fail the document |
//!
//! The free services degrade silently so a batch still completes; the keyed
//! services surface failures because they cost money.

pub mod deepl;
pub mod free;
pub mod llm;

use crate::chunk::{chunk, rejoin};
use crate::config::Config;
use crate::error::{ConfigError, TranslateError};
use crate::http::Transport;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

#[async_trait]
pub trait Translator: Send + Sync {
    /// Backend name as used in configuration.
    fn name(&self) -> &str;

    /// Translate (or rewrite) `text`, preserving paragraph breaks.
    async fn translate(&self, text: &str) -> Result<String, TranslateError>;
}

/// Builds a backend from the run configuration without touching the network.
pub type BackendFactory = fn(&Config, Arc<dyn Transport>) -> Result<Arc<dyn Translator>, ConfigError>;

/// Every selectable backend, by configuration name.
pub const BACKENDS: &[(&str, BackendFactory)] = &[
    ("simple", free::simple),
    ("mymemory", free::mymemory),
    ("google", free::google),
    ("deepl", deepl::build),
    ("openai", llm::openai),
    ("deepseek", llm::deepseek),
];

/// Comma-separated list of valid backend names.
pub fn backend_names() -> String {
    BACKENDS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Construct the backend named in `config.backend`.
///
/// Unknown names and missing credentials fail here, before any request is sent.
pub fn create_translator(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn Translator>, ConfigError> {
    let wanted = config.backend.trim().to_lowercase();
    let (_, factory) = BACKENDS
        .iter()
        .find(|(name, _)| *name == wanted)
        .ok_or_else(|| ConfigError::UnknownBackend {
            name: config.backend.clone(),
            valid: backend_names(),
        })?;
    let translator = factory(config, transport)?;
    info!(
        backend = translator.name(),
        source = %config.source_lang,
        target = %config.target_lang,
        rewrite = config.rewrite_mode,
        "Translator ready"
    );
    Ok(translator)
}

/// Chunk `text`, run `per_chunk` over every chunk with at most `concurrency`
/// in flight, and rejoin the outputs in chunk order.
///
/// The first chunk error aborts the whole call. Backends that prefer to
/// degrade must absorb their errors inside `per_chunk`.
pub async fn translate_chunked<F, Fut>(
    text: &str,
    max_size: usize,
    concurrency: usize,
    per_chunk: F,
) -> Result<String, TranslateError>
where
    F: Fn(usize, String) -> Fut,
    Fut: Future<Output = Result<String, TranslateError>>,
{
    let chunks = chunk(text, max_size);
    if chunks.is_empty() {
        return Ok(String::new());
    }
    let count = chunks.len();
    debug!(chunks = count, chars = text.chars().count(), "Translating in chunks");

    let outputs: Vec<String> = stream::iter(chunks.into_iter().enumerate())
        .map(|(i, c)| per_chunk(i, c))
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;
    debug_assert_eq!(outputs.len(), count);
    Ok(rejoin(&outputs))
}

/// Truncated body text for error messages.
pub(crate) fn body_excerpt(body: &str) -> String {
    crate::utils::truncate_for_log(body.trim(), 300)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockTransport;
    use std::time::Duration;

    fn config(backend: &str) -> Config {
        Config {
            backend: backend.to_string(),
            deepl_api_key: Some("k".into()),
            openai_api_key: Some("k".into()),
            deepseek_api_key: Some("k".into()),
            ..Config::default()
        }
    }

    #[test]
    fn test_every_registered_backend_builds() {
        for (name, _) in BACKENDS {
            let transport = Arc::new(MockTransport::new());
            let t = create_translator(&config(name), transport.clone()).unwrap();
            assert_eq!(t.name(), *name);
            assert_eq!(transport.calls(), 0);
        }
    }

    #[test]
    fn test_unknown_backend_enumerates_choices() {
        let transport = Arc::new(MockTransport::new());
        let err = create_translator(&config("googletrans"), transport.clone())
            .err()
            .unwrap();
        let msg = err.to_string();
        assert!(msg.contains("googletrans"));
        for (name, _) in BACKENDS {
            assert!(msg.contains(name), "{msg}");
        }
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn test_backend_name_is_case_insensitive() {
        let transport = Arc::new(MockTransport::new());
        assert!(create_translator(&config("  DeepL "), transport).is_ok());
    }

    #[tokio::test]
    async fn test_identity_transform_round_trips() {
        let text = "One.\n\nTwo is longer.\n\nThree.";
        let out = translate_chunked(text, 8, 3, |_, c| async move { Ok(c) })
            .await
            .unwrap();
        assert_eq!(out, text);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_keeps_order_despite_completion_order() {
        let text = "aaa\n\nbbb\n\nccc";
        let out = translate_chunked(text, 3, 3, |i, c| async move {
            // later chunks finish first
            tokio::time::sleep(Duration::from_millis(100 * (3 - i as u64))).await;
            Ok(c.to_uppercase())
        })
        .await
        .unwrap();
        assert_eq!(out, "AAA\n\nBBB\n\nCCC");
    }

    #[tokio::test]
    async fn test_chunk_error_aborts() {
        let err = translate_chunked("a\n\nb", 1, 1, |i, c| async move {
            if i == 1 {
                Err(TranslateError::Provider {
                    backend: "test".into(),
                    payload: "nope".into(),
                })
            } else {
                Ok(c)
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, TranslateError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_empty_text_makes_no_calls() {
        let seen = std::sync::atomic::AtomicUsize::new(0);
        let out = translate_chunked("", 10, 1, |_, c| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok(c) }
        })
        .await
        .unwrap();
        assert_eq!(out, "");
        assert_eq!(seen.into_inner(), 0);
    }
}
