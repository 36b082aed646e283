//! DeepL machine translation.
//!
//! One form POST per chunk. Keys ending in `:fx` belong to the free plan and
//! use the free endpoint. Any non-2xx status or error payload fails the whole
//! document; there is no per-chunk fallback for a paid service.

use super::{Translator, body_excerpt, translate_chunked};
use crate::config::Config;
use crate::error::{ConfigError, TranslateError};
use crate::http::{HttpRequest, Transport};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const FREE_ENDPOINT: &str = "https://api-free.deepl.com/v2/translate";
const PRO_ENDPOINT: &str = "https://api.deepl.com/v2/translate";

#[derive(Debug, Deserialize)]
struct DeeplReply {
    #[serde(default)]
    translations: Vec<DeeplTranslation>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeeplTranslation {
    text: String,
}

pub struct DeeplTranslator {
    transport: Arc<dyn Transport>,
    api_key: String,
    endpoint: &'static str,
    source: Option<String>,
    target: String,
    chunk_size: usize,
    timeout: Duration,
}

/// DeepL language codes are upper-case; `zh-CN` style regions are dropped.
fn deepl_code(code: &str) -> String {
    match code {
        "zh-CN" | "zh-TW" => "ZH".to_string(),
        other => other.to_uppercase(),
    }
}

pub fn build(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> Result<Arc<dyn Translator>, ConfigError> {
    let api_key = config
        .deepl_api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingCredential {
            backend: "deepl".to_string(),
            credential: "DEEPL_API_KEY",
        })?;
    let endpoint = if api_key.ends_with(":fx") {
        FREE_ENDPOINT
    } else {
        PRO_ENDPOINT
    };
    Ok(Arc::new(DeeplTranslator {
        transport,
        api_key,
        endpoint,
        source: (config.source_lang != "auto").then(|| deepl_code(&config.source_lang)),
        target: deepl_code(&config.target_lang),
        chunk_size: config.chunk_size,
        timeout: Duration::from_secs(config.timeout),
    }))
}

impl DeeplTranslator {
    fn provider_error(&self, payload: impl Into<String>) -> TranslateError {
        TranslateError::Provider {
            backend: "deepl".to_string(),
            payload: payload.into(),
        }
    }

    async fn translate_chunk(&self, index: usize, chunk: String) -> Result<String, TranslateError> {
        let mut form = vec![
            ("text".to_string(), chunk),
            ("target_lang".to_string(), self.target.clone()),
        ];
        if let Some(source) = &self.source {
            form.push(("source_lang".to_string(), source.clone()));
        }
        let request = HttpRequest::post_form(self.endpoint, form, self.timeout)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key));

        let resp = self
            .transport
            .send(request)
            .await
            .map_err(|e| TranslateError::Transport {
                backend: "deepl".to_string(),
                reason: e.to_string(),
            })?;
        if !resp.is_success() {
            return Err(TranslateError::Status {
                backend: "deepl".to_string(),
                status: resp.status,
                body: body_excerpt(&resp.body),
            });
        }

        let reply: DeeplReply = serde_json::from_str(&resp.body)
            .map_err(|_| self.provider_error(body_excerpt(&resp.body)))?;
        match reply.translations.into_iter().next() {
            Some(t) => {
                debug!(chunk = index, chars = t.text.chars().count(), "DeepL chunk done");
                Ok(t.text)
            }
            None => Err(self.provider_error(
                reply.message.unwrap_or_else(|| body_excerpt(&resp.body)),
            )),
        }
    }
}

#[async_trait]
impl Translator for DeeplTranslator {
    fn name(&self) -> &str {
        "deepl"
    }

    #[instrument(level = "info", skip_all, fields(backend = "deepl", chars = text.chars().count()))]
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        translate_chunked(text, self.chunk_size, 1, |i, c| self.translate_chunk(i, c)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Body;
    use crate::http::mock::{MockTransport, ok};

    fn config(key: &str) -> Config {
        Config {
            backend: "deepl".into(),
            deepl_api_key: Some(key.into()),
            ..Config::default()
        }
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let transport = Arc::new(MockTransport::new());
        let mut cfg = config("");
        assert!(matches!(
            build(&cfg, transport.clone()),
            Err(ConfigError::MissingCredential { credential: "DEEPL_API_KEY", .. })
        ));
        cfg.deepl_api_key = None;
        assert!(build(&cfg, transport).is_err());
    }

    #[tokio::test]
    async fn test_translates_with_auth_header_and_form() {
        let transport = Arc::new(MockTransport::new().always(
            FREE_ENDPOINT,
            ok(200, r#"{"translations":[{"detected_source_language":"EN","text":"你好"}]}"#),
        ));
        let t = build(&config("abc:fx"), transport.clone()).unwrap();
        assert_eq!(t.translate("Hello").await.unwrap(), "你好");

        let requests = transport.requests.lock().unwrap();
        let req = &requests[0];
        assert!(req
            .headers
            .contains(&("Authorization".to_string(), "DeepL-Auth-Key abc:fx".to_string())));
        let Some(Body::Form(form)) = &req.body else {
            panic!("expected form body");
        };
        assert!(form.contains(&("target_lang".to_string(), "ZH".to_string())));
        assert!(!form.iter().any(|(k, _)| k == "source_lang"));
    }

    #[tokio::test]
    async fn test_pro_key_uses_pro_endpoint() {
        let transport = Arc::new(MockTransport::new().always(
            PRO_ENDPOINT,
            ok(200, r#"{"translations":[{"text":"x"}]}"#),
        ));
        let t = build(&config("pro-key"), transport.clone()).unwrap();
        t.translate("Hello").await.unwrap();
        assert_eq!(transport.calls_to(PRO_ENDPOINT), 1);
    }

    #[tokio::test]
    async fn test_error_payload_fails_document() {
        let transport = Arc::new(MockTransport::new().always(
            FREE_ENDPOINT,
            ok(200, r#"{"message":"Quota exceeded"}"#),
        ));
        let t = build(&config("abc:fx"), transport).unwrap();
        let err = t.translate("Hello").await.unwrap_err();
        assert!(err.to_string().contains("Quota exceeded"), "{err}");
    }

    #[tokio::test]
    async fn test_non_success_status_fails_without_retry() {
        let transport = Arc::new(
            MockTransport::new().always(FREE_ENDPOINT, ok(403, r#"{"message":"Wrong key"}"#)),
        );
        let t = build(&config("abc:fx"), transport.clone()).unwrap();
        let err = t.translate("Hello").await.unwrap_err();
        assert!(matches!(err, TranslateError::Status { status: 403, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_language_codes() {
        assert_eq!(deepl_code("zh"), "ZH");
        assert_eq!(deepl_code("zh-TW"), "ZH");
        assert_eq!(deepl_code("en-us"), "EN-US");
    }
}
