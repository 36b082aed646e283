//! Keyless public translation services.
//!
//! Each chunk waits a fixed delay, then tries the configured services in
//! order. The first usable answer wins. Backends with a retry pause run the
//! chain a second time after it. When every attempt fails the chunk is kept
//! untranslated, so these backends never fail a document.
//!
//! Services with a query limit get the chunk in pieces no longer than the
//! limit, cut at paragraph, line or sentence boundaries, and the translated
//! pieces are stitched back with the original whitespace between them.

use super::{Translator, body_excerpt, translate_chunked};
use crate::config::Config;
use crate::error::{ConfigError, TranslateError};
use crate::http::{HttpRequest, Transport};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use url::Url;

const LINGVA_URL: &str = "https://lingva.ml/api/v1";
const MYMEMORY_URL: &str = "https://api.mymemory.translated.net/get";
const SIMPLYTRANSLATE_URL: &str = "https://simplytranslate.org/api/translate";
const GOOGLE_URL: &str = "https://translate.googleapis.com/translate_a/single";

/// MyMemory rejects longer anonymous queries.
const MYMEMORY_MAX_CHARS: usize = 500;
const GOOGLE_MAX_CHARS: usize = 5000;
const CHUNK_CONCURRENCY: usize = 2;

const SIMPLE_DELAY: Duration = Duration::from_secs(1);
const SINGLE_SERVICE_DELAY: Duration = Duration::from_millis(500);
const SINGLE_SERVICE_RETRY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeService {
    Lingva,
    MyMemory,
    SimplyTranslate,
    Google,
}

impl FreeService {
    pub fn label(self) -> &'static str {
        match self {
            FreeService::Lingva => "lingva",
            FreeService::MyMemory => "mymemory",
            FreeService::SimplyTranslate => "simplytranslate",
            FreeService::Google => "google",
        }
    }

    /// Longest query the service accepts, in characters.
    fn max_chars(self) -> Option<usize> {
        match self {
            FreeService::MyMemory => Some(MYMEMORY_MAX_CHARS),
            FreeService::Google => Some(GOOGLE_MAX_CHARS),
            FreeService::Lingva | FreeService::SimplyTranslate => None,
        }
    }
}

pub struct FreeTranslator {
    name: &'static str,
    transport: Arc<dyn Transport>,
    services: Vec<FreeService>,
    source: String,
    target: String,
    chunk_size: usize,
    timeout: Duration,
    delay: Duration,
    retry_after: Option<Duration>,
}

/// `simple`: Lingva, then MyMemory, then SimplyTranslate.
pub fn simple(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn Translator>, ConfigError> {
    Ok(Arc::new(FreeTranslator::new(
        "simple",
        config,
        transport,
        vec![
            FreeService::Lingva,
            FreeService::MyMemory,
            FreeService::SimplyTranslate,
        ],
    )))
}

/// `mymemory`: MyMemory alone, retried once per chunk.
pub fn mymemory(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn Translator>, ConfigError> {
    Ok(Arc::new(
        FreeTranslator::new("mymemory", config, transport, vec![FreeService::MyMemory])
            .paced(SINGLE_SERVICE_DELAY, Some(SINGLE_SERVICE_RETRY)),
    ))
}

/// `google`: the keyless Google endpoint, retried once per chunk.
pub fn google(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn Translator>, ConfigError> {
    Ok(Arc::new(
        FreeTranslator::new("google", config, transport, vec![FreeService::Google])
            .paced(SINGLE_SERVICE_DELAY, Some(SINGLE_SERVICE_RETRY)),
    ))
}

/// The public services only know the bare Chinese code.
fn service_code(code: &str) -> &str {
    match code {
        "zh-CN" | "zh-TW" => "zh",
        other => other,
    }
}

/// Google wants the script variant spelled out.
fn google_code(code: &str) -> &str {
    match code {
        "zh" => "zh-CN",
        other => other,
    }
}

/// Cut `text` into consecutive slices of at most `max` characters.
///
/// Cuts prefer a paragraph break, then a line break, then a sentence end,
/// then any whitespace; a run with none of those is cut at `max`. The
/// slices concatenate back to `text` exactly.
fn split_for_limit(text: &str, max: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.chars().count() > max {
        let (head, tail) = rest.split_at(cut_point(rest, max));
        pieces.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}

/// Byte offset of the best cut within the first `max` characters.
fn cut_point(text: &str, max: usize) -> usize {
    let limit = text.char_indices().nth(max).map_or(text.len(), |(i, _)| i);
    let window = &text[..limit];
    let after = |found: Option<(usize, char)>| found.map(|(i, c)| i + c.len_utf8());

    window
        .rfind("\n\n")
        .map(|i| i + 2)
        .or_else(|| after(window.char_indices().rev().find(|&(_, c)| c == '\n')))
        .or_else(|| {
            after(
                window
                    .char_indices()
                    .rev()
                    .find(|&(_, c)| matches!(c, '.' | '!' | '?' | '。' | '！' | '？')),
            )
        })
        .or_else(|| after(window.char_indices().rev().find(|&(_, c)| c.is_whitespace())))
        .filter(|&i| i > 0)
        .unwrap_or(limit)
}

impl FreeTranslator {
    pub fn new(
        name: &'static str,
        config: &Config,
        transport: Arc<dyn Transport>,
        services: Vec<FreeService>,
    ) -> Self {
        Self {
            name,
            transport,
            services,
            source: service_code(&config.source_lang).to_string(),
            target: service_code(&config.target_lang).to_string(),
            chunk_size: config.chunk_size,
            timeout: Duration::from_secs(config.timeout),
            delay: SIMPLE_DELAY,
            retry_after: None,
        }
    }

    /// Per-chunk delay, and the pause before the one retry of a failed chunk.
    pub fn paced(mut self, delay: Duration, retry_after: Option<Duration>) -> Self {
        self.delay = delay;
        self.retry_after = retry_after;
        self
    }

    fn error(&self, reason: impl Into<String>) -> TranslateError {
        TranslateError::Provider {
            backend: self.name.to_string(),
            payload: reason.into(),
        }
    }

    fn request_url(&self, service: FreeService, query: &str) -> Result<String, TranslateError> {
        let url = match service {
            FreeService::Lingva => format!(
                "{LINGVA_URL}/{}/{}/{}",
                self.source,
                self.target,
                urlencoding::encode(query)
            ),
            FreeService::MyMemory => {
                let source = if self.source == "auto" { "autodetect" } else { self.source.as_str() };
                let langpair = format!("{source}|{}", self.target);
                Url::parse_with_params(MYMEMORY_URL, &[("q", query), ("langpair", langpair.as_str())])
                    .map_err(|e| self.error(e.to_string()))?
                    .to_string()
            }
            FreeService::SimplyTranslate => Url::parse_with_params(
                SIMPLYTRANSLATE_URL,
                &[
                    ("from", self.source.as_str()),
                    ("to", self.target.as_str()),
                    ("text", query),
                    ("engine", "google"),
                ],
            )
            .map_err(|e| self.error(e.to_string()))?
            .to_string(),
            FreeService::Google => Url::parse_with_params(
                GOOGLE_URL,
                &[
                    ("client", "gtx"),
                    ("sl", google_code(&self.source)),
                    ("tl", google_code(&self.target)),
                    ("dt", "t"),
                    ("q", query),
                ],
            )
            .map_err(|e| self.error(e.to_string()))?
            .to_string(),
        };
        Ok(url)
    }

    fn parse_reply(&self, service: FreeService, js: &Value) -> Result<String, TranslateError> {
        let text = match service {
            FreeService::Lingva => js["translation"].as_str().map(str::to_string),
            FreeService::MyMemory => {
                // MyMemory reports quota and language errors with HTTP 200
                let status = js["responseStatus"]
                    .as_u64()
                    .or_else(|| js["responseStatus"].as_str().and_then(|s| s.parse().ok()));
                if let Some(status) = status.filter(|s| *s != 200) {
                    return Err(self.error(format!(
                        "mymemory status {status}: {}",
                        js["responseDetails"].as_str().unwrap_or_default()
                    )));
                }
                js["responseData"]["translatedText"].as_str().map(str::to_string)
            }
            FreeService::SimplyTranslate => js["translated_text"].as_str().map(str::to_string),
            // [[["translated", "source", ...], ...], ...]
            FreeService::Google => js[0].as_array().map(|segments| {
                segments
                    .iter()
                    .filter_map(|seg| seg[0].as_str())
                    .collect::<String>()
            }),
        };
        text.filter(|t| !t.trim().is_empty())
            .ok_or_else(|| self.error(format!("{} reply without text", service.label())))
    }

    async fn request(&self, service: FreeService, query: &str) -> Result<String, TranslateError> {
        let url = self.request_url(service, query)?;
        let resp = self
            .transport
            .send(HttpRequest::get(url, self.timeout))
            .await
            .map_err(|e| TranslateError::Transport {
                backend: self.name.to_string(),
                reason: format!("{}: {e}", service.label()),
            })?;
        if !resp.is_success() {
            return Err(TranslateError::Status {
                backend: self.name.to_string(),
                status: resp.status,
                body: body_excerpt(&resp.body),
            });
        }
        let js: Value = serde_json::from_str(&resp.body)
            .map_err(|e| self.error(format!("{} returned invalid JSON: {e}", service.label())))?;
        self.parse_reply(service, &js)
    }

    /// Translate a whole chunk with one service, in pieces when it has a limit.
    ///
    /// Any failed piece fails the chunk for this service.
    async fn call(&self, service: FreeService, chunk: &str) -> Result<String, TranslateError> {
        let Some(max) = service.max_chars().filter(|&max| chunk.chars().count() > max) else {
            return self.request(service, chunk).await;
        };

        let pieces = split_for_limit(chunk, max);
        debug!(service = service.label(), pieces = pieces.len(), limit = max, "Splitting chunk for query limit");
        let mut out = String::with_capacity(chunk.len());
        for (i, piece) in pieces.into_iter().enumerate() {
            let core = piece.trim();
            if core.is_empty() {
                out.push_str(piece);
                continue;
            }
            if i > 0 {
                sleep(self.delay).await;
            }
            let lead = piece.len() - piece.trim_start().len();
            out.push_str(&piece[..lead]);
            out.push_str(&self.request(service, core).await?);
            out.push_str(&piece[lead + core.len()..]);
        }
        Ok(out)
    }

    async fn try_services(&self, index: usize, chunk: &str) -> Option<String> {
        for service in &self.services {
            match self.call(*service, chunk).await {
                Ok(translated) => {
                    debug!(chunk = index, service = service.label(), "Chunk translated");
                    return Some(translated);
                }
                Err(e) => debug!(chunk = index, service = service.label(), error = %e, "Service failed"),
            }
        }
        None
    }

    async fn translate_chunk(&self, index: usize, chunk: String) -> String {
        if chunk.trim().is_empty() {
            return chunk;
        }
        sleep(self.delay).await;

        if let Some(translated) = self.try_services(index, &chunk).await {
            return translated;
        }
        if let Some(wait) = self.retry_after {
            warn!(backend = self.name, chunk = index, ?wait, "Translation chunk failed, retrying");
            sleep(wait).await;
            if let Some(translated) = self.try_services(index, &chunk).await {
                return translated;
            }
        }
        warn!(
            backend = self.name,
            chunk = index,
            "All translation services failed, keeping original text"
        );
        chunk
    }
}

#[async_trait]
impl Translator for FreeTranslator {
    fn name(&self) -> &str {
        self.name
    }

    #[instrument(level = "info", skip_all, fields(backend = self.name, chars = text.chars().count()))]
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        translate_chunked(text, self.chunk_size, CHUNK_CONCURRENCY, |i, c| async move {
            Ok(self.translate_chunk(i, c).await)
        })
        .await
    }
}
