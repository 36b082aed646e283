//! Chat-completion translation (OpenAI and DeepSeek).
//!
//! Both providers speak the same OpenAI-compatible API, so one
//! [`ChatTranslator`] serves them with a different endpoint, model and key.
//! Each chunk is sent with a system prompt and a user prompt naming the
//! source and target languages. Rewrite mode swaps in an editorial prompt and
//! raises the temperature.
//!
//! Chunk requests retry through a [`RetryPolicy`]:
//!
//! | Failure | Wait before next attempt |
//! |---------|--------------------------|
//! | timeout, connection error, malformed reply | `2 * 2^attempt` s |
//! | HTTP 429 | `5 * 2^attempt` s |
//! | HTTP 5xx | `2 * 2^attempt` s |
//! | other HTTP 4xx | none, abort |
//!
//! A chunk that exhausts its attempts fails the whole document.

use super::{Translator, body_excerpt, translate_chunked};
use crate::config::{Config, language_name};
use crate::error::{ConfigError, TranslateError};
use crate::http::{HttpRequest, Transport, TransportError};
use crate::retry::{Retry, RetryPolicy};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MODEL: &str = "gpt-4o-mini";
const DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com/v1/chat/completions";
const DEEPSEEK_MODEL: &str = "deepseek-chat";

const MAX_ATTEMPTS: usize = 3;
const BASE_DELAY: Duration = Duration::from_secs(2);
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(5);
const CHUNK_CONCURRENCY: usize = 2;

const TRANSLATE_TEMPERATURE: f64 = 0.3;
const REWRITE_TEMPERATURE: f64 = 0.7;

/// Per-chunk request timeout and completion token budget, both scaled by
/// chunk length.
///
/// ```text
/// timeout    = min(60 + chars / 20, 300) seconds
/// max_tokens = min(max(1024, chars * 2), 8192)
/// ```
pub fn chunk_budget(chars: usize) -> (Duration, u32) {
    let secs = (60 + chars / 20).min(300);
    let tokens = (chars.saturating_mul(2)).clamp(1024, 8192);
    (Duration::from_secs(secs as u64), tokens as u32)
}

/// One failed chunk request, before it is folded into a [`TranslateError`].
#[derive(Debug)]
enum ChatFailure {
    Timeout(String),
    Network(String),
    Status { status: u16, body: String },
    Malformed(String),
}

impl fmt::Display for ChatFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatFailure::Timeout(msg) => write!(f, "timed out: {msg}"),
            ChatFailure::Network(msg) => write!(f, "network error: {msg}"),
            ChatFailure::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            ChatFailure::Malformed(msg) => write!(f, "unusable reply: {msg}"),
        }
    }
}

impl From<TransportError> for ChatFailure {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(msg) => ChatFailure::Timeout(msg),
            other => ChatFailure::Network(other.to_string()),
        }
    }
}

fn classify(failure: &ChatFailure, attempt: usize) -> Retry {
    let scaled = |base: Duration| base.saturating_mul(1u32 << attempt.min(16));
    match failure {
        ChatFailure::Status { status: 429, .. } => Retry::After(scaled(RATE_LIMIT_DELAY)),
        ChatFailure::Status { status, .. } if *status >= 500 => Retry::After(scaled(BASE_DELAY)),
        ChatFailure::Status { .. } => Retry::Abort,
        ChatFailure::Timeout(_) | ChatFailure::Network(_) | ChatFailure::Malformed(_) => {
            Retry::Backoff
        }
    }
}

pub struct ChatTranslator {
    backend: &'static str,
    transport: Arc<dyn Transport>,
    endpoint: String,
    model: String,
    api_key: String,
    source_lang: String,
    target_lang: String,
    rewrite: bool,
    chunk_size: usize,
    policy: RetryPolicy,
}

pub fn openai(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn Translator>, ConfigError> {
    let key = require_key("openai", "OPENAI_API_KEY", config.openai_api_key.as_deref())?;
    Ok(Arc::new(ChatTranslator::new(
        "openai",
        OPENAI_ENDPOINT,
        OPENAI_MODEL,
        key,
        config,
        transport,
    )))
}

pub fn deepseek(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn Translator>, ConfigError> {
    let key = require_key("deepseek", "DEEPSEEK_API_KEY", config.deepseek_api_key.as_deref())?;
    Ok(Arc::new(ChatTranslator::new(
        "deepseek",
        DEEPSEEK_ENDPOINT,
        DEEPSEEK_MODEL,
        key,
        config,
        transport,
    )))
}

fn require_key(
    backend: &str,
    credential: &'static str,
    key: Option<&str>,
) -> Result<String, ConfigError> {
    key.map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingCredential {
            backend: backend.to_string(),
            credential,
        })
}

impl ChatTranslator {
    pub fn new(
        backend: &'static str,
        endpoint: &str,
        model: &str,
        api_key: String,
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            backend,
            transport,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
            source_lang: config.source_lang.clone(),
            target_lang: config.target_lang.clone(),
            rewrite: config.rewrite_mode,
            chunk_size: config.chunk_size,
            policy: RetryPolicy::new(MAX_ATTEMPTS, BASE_DELAY),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn system_prompt(&self) -> &'static str {
        if self.rewrite {
            "You are a professional travel editor and translator. Output ONLY the rewritten text, nothing else."
        } else {
            "You are a professional translator. Output ONLY the translated text, nothing else."
        }
    }

    fn user_prompt(&self, chunk: &str) -> String {
        let target = language_name(&self.target_lang);
        let instruction = if self.rewrite {
            format!(
                "Rewrite the following text in {target} for travellers: translate it if needed, \
                 improve clarity and flow, keep every fact, and keep the blank lines between paragraphs."
            )
        } else if self.source_lang == "auto" {
            format!("Translate the following text into {target}. Preserve formatting and meaning.")
        } else {
            format!(
                "Translate the following {} text into {target}. Preserve formatting and meaning.",
                language_name(&self.source_lang)
            )
        };
        format!("{instruction}\n\n{chunk}")
    }

    fn temperature(&self) -> f64 {
        if self.rewrite {
            REWRITE_TEMPERATURE
        } else {
            TRANSLATE_TEMPERATURE
        }
    }

    async fn attempt(&self, chunk: &str) -> Result<String, ChatFailure> {
        let (timeout, max_tokens) = chunk_budget(chunk.chars().count());
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt()},
                {"role": "user", "content": self.user_prompt(chunk)},
            ],
            "temperature": self.temperature(),
            "max_tokens": max_tokens,
        });
        let request = HttpRequest::post_json(self.endpoint.as_str(), payload, timeout)
            .header("Authorization", format!("Bearer {}", self.api_key));

        let resp = self.transport.send(request).await?;
        if !resp.is_success() {
            return Err(ChatFailure::Status {
                status: resp.status,
                body: body_excerpt(&resp.body),
            });
        }

        let js: Value = serde_json::from_str(&resp.body)
            .map_err(|e| ChatFailure::Malformed(format!("invalid JSON: {e}")))?;
        match js["choices"][0]["message"]["content"].as_str().map(str::trim) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(ChatFailure::Malformed(
                js["error"]["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| body_excerpt(&resp.body)),
            )),
        }
    }

    async fn translate_chunk(&self, index: usize, chunk: String) -> Result<String, TranslateError> {
        let label = format!("{} chunk {index}", self.backend);
        let result = self
            .policy
            .run(&label, |_| self.attempt(&chunk), classify)
            .await;

        match result {
            Ok(text) => {
                debug!(backend = self.backend, chunk = index, chars = text.chars().count(), "Chunk translated");
                Ok(text)
            }
            Err(ex) if ex.aborted => Err(match ex.error {
                ChatFailure::Status { status, body } => TranslateError::Status {
                    backend: self.backend.to_string(),
                    status,
                    body,
                },
                other => TranslateError::Provider {
                    backend: self.backend.to_string(),
                    payload: other.to_string(),
                },
            }),
            Err(ex) => Err(TranslateError::ChunkExhausted {
                backend: self.backend.to_string(),
                chunk: index,
                attempts: ex.attempts,
                reason: ex.error.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Translator for ChatTranslator {
    fn name(&self) -> &str {
        self.backend
    }

    #[instrument(level = "info", skip_all, fields(backend = self.backend, model = %self.model, rewrite = self.rewrite))]
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        translate_chunked(text, self.chunk_size, CHUNK_CONCURRENCY, |i, c| {
            self.translate_chunk(i, c)
        })
        .await
    }
}
