//! Run configuration.
//!
//! A [`Config`] is built once at startup, either from a YAML file or from CLI
//! flags, validated, and then shared read-only behind an `Arc` by every
//! concurrent pipeline. Anti-blocking keywords and per-site selectors live
//! here as data so they can be tuned without touching the fetcher or the
//! extractor.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, instrument};

/// Immutable per-run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub urls_file: String,
    pub output_dir: String,
    pub source_lang: String,
    pub target_lang: String,
    pub backend: String,
    pub deepl_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub proxy: Option<String>,
    pub rewrite_mode: bool,
    pub max_concurrency: usize,
    /// Per-request timeout in seconds for page fetches and keyed MT calls.
    pub timeout: u64,
    pub chunk_size: usize,
    pub use_cache: bool,
    /// Total attempts per page fetch.
    pub max_retries: usize,
    /// Pinned user agent; tried first, before the built-in rotation pool.
    pub user_agent: Option<String>,
    /// Articles with less text than this are rejected.
    pub min_content_chars: usize,
    /// An extraction strategy must beat this to win.
    pub min_strategy_chars: usize,
    /// Persist raw markup of thin extractions under `<output_dir>/.debug`.
    pub debug_dump: bool,
    pub show_lead_image: bool,
    pub blocking: BlockingRules,
    /// Host suffix -> ordered CSS selectors tried by the structural extractor.
    pub domain_selectors: BTreeMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            urls_file: "urls.txt".to_string(),
            output_dir: "output".to_string(),
            source_lang: "auto".to_string(),
            target_lang: "zh".to_string(),
            backend: "simple".to_string(),
            deepl_api_key: None,
            openai_api_key: None,
            deepseek_api_key: None,
            proxy: None,
            rewrite_mode: false,
            max_concurrency: 6,
            timeout: 30,
            chunk_size: 2000,
            use_cache: true,
            max_retries: 3,
            user_agent: None,
            min_content_chars: 100,
            min_strategy_chars: 200,
            debug_dump: false,
            show_lead_image: false,
            blocking: BlockingRules::default(),
            domain_selectors: default_domain_selectors(),
        }
    }
}

/// Heuristics for spotting anti-bot pages served with HTTP 200.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingRules {
    /// Verification phrases; only checked in bodies shorter than `short_body_bytes`.
    pub keywords: Vec<String>,
    pub short_body_bytes: usize,
    /// Bodies below this size are treated as blocked outright.
    pub min_body_bytes: usize,
    /// Site-specific challenge markers. A hit is not worth retrying.
    pub domain_markers: Vec<DomainMarker>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainMarker {
    pub domain: String,
    pub marker: String,
}

impl Default for BlockingRules {
    fn default() -> Self {
        let keywords = [
            "captcha",
            "verify you are human",
            "are you a robot",
            "unusual traffic",
            "access denied",
            "just a moment",
            "cf-browser-verification",
            "安全验证",
            "人机验证",
            "请输入验证码",
            "访问验证",
            "滑动验证",
        ];
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            short_body_bytes: 5000,
            min_body_bytes: 200,
            domain_markers: vec![DomainMarker {
                domain: "gov.cn".to_string(),
                marker: "$_ts".to_string(),
            }],
        }
    }
}

fn default_domain_selectors() -> BTreeMap<String, Vec<String>> {
    let rules: [(&str, &[&str]); 4] = [
        ("chinadaily.com.cn", &["#Content", ".main_art", "#content"]),
        ("globaltimes.cn", &[".article_right", ".article_content"]),
        ("xinhuanet.com", &["#detail", "#p-detail", ".main-aticle"]),
        ("travelchinaguide.com", &[".main_content", "#content"]),
    ];
    rules
        .iter()
        .map(|(host, sels)| {
            (
                host.to_string(),
                sels.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect()
}

impl Config {
    /// Load a YAML config file. Missing keys fall back to defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&raw).map_err(|e| match e {
            ConfigError::Invalid { reason, .. } => ConfigError::Invalid {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw).map_err(|e| ConfigError::Invalid {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        debug!(backend = %config.backend, target = %config.target_lang, "Parsed YAML config");
        Ok(config)
    }

    /// Fill credentials the file left empty from the usual environment variables.
    pub fn fill_credentials_from_env(&mut self) {
        fn env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        if self.deepl_api_key.is_none() {
            self.deepl_api_key = env("DEEPL_API_KEY");
        }
        if self.openai_api_key.is_none() {
            self.openai_api_key = env("OPENAI_API_KEY");
        }
        if self.deepseek_api_key.is_none() {
            self.deepseek_api_key = env("DEEPSEEK_API_KEY");
        }
        if self.proxy.is_none() {
            self.proxy = env("HTTPS_PROXY").or_else(|| env("HTTP_PROXY"));
        }
    }

    /// Reject settings that would make the run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Value {
                field: "max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Value {
                field: "max_retries",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Value {
                field: "chunk_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(proxy) = &self.proxy {
            url::Url::parse(proxy).map_err(|e| ConfigError::Value {
                field: "proxy",
                reason: format!("{proxy}: {e}"),
            })?;
        }
        Ok(())
    }

    /// Selectors registered for `host`. The most specific matching domain wins.
    pub fn selectors_for(&self, host: &str) -> Option<&[String]> {
        self.domain_selectors
            .iter()
            .filter(|(domain, _)| host_matches(host, domain))
            .max_by_key(|(domain, _)| domain.len())
            .map(|(_, sels)| sels.as_slice())
    }

    /// Directory holding one JSON record per processed URL.
    pub fn cache_dir(&self) -> std::path::PathBuf {
        Path::new(&self.output_dir).join(".cache")
    }

    pub fn debug_dir(&self) -> std::path::PathBuf {
        Path::new(&self.output_dir).join(".debug")
    }
}

/// `true` when `host` is `domain` or a subdomain of it.
pub fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_start_matches("www.");
    let domain = domain.trim_start_matches("www.");
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// English language name, used inside LLM prompts.
pub fn language_name(code: &str) -> &str {
    match code {
        "zh" => "Chinese",
        "zh-CN" => "Simplified Chinese",
        "zh-TW" => "Traditional Chinese",
        "en" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        other => other,
    }
}

/// Human-facing language label shown on rendered pages.
pub fn language_display(code: &str) -> &str {
    match code {
        "zh" => "Chinese (中文)",
        "zh-CN" => "Simplified Chinese (简体中文)",
        "zh-TW" => "Traditional Chinese (繁體中文)",
        "en" => "English",
        "ja" => "Japanese (日本語)",
        "ko" => "Korean (한국어)",
        "es" => "Spanish (Español)",
        "fr" => "French (Français)",
        "de" => "German (Deutsch)",
        "auto" => "Auto-detected",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.source_lang, "auto");
        assert_eq!(config.target_lang, "zh");
        assert_eq!(config.backend, "simple");
        assert_eq!(config.max_concurrency, 6);
        assert_eq!(config.chunk_size, 2000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.min_content_chars, 100);
        assert!(config.use_cache);
    }

    #[test]
    fn test_yaml_partial_overrides_keep_defaults() {
        let yaml = r#"
urls_file: list.txt
backend: deepl
deepl_api_key: KEY
rewrite_mode: true
blocking:
  keywords: ["robot check"]
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.urls_file, "list.txt");
        assert_eq!(config.backend, "deepl");
        assert_eq!(config.deepl_api_key.as_deref(), Some("KEY"));
        assert!(config.rewrite_mode);
        assert_eq!(config.output_dir, "output");
        assert_eq!(config.blocking.keywords, vec!["robot check".to_string()]);
        assert_eq!(config.blocking.min_body_bytes, 200);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = Config::from_yaml_str("max_concurrency: [oops").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency_and_bad_proxy() {
        let mut config = Config::default();
        config.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.proxy = Some("not a url".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.proxy = Some("socks5://127.0.0.1:1080".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_selectors_for_matches_subdomains() {
        let config = Config::default();
        assert!(config.selectors_for("www.chinadaily.com.cn").is_some());
        assert!(config.selectors_for("europe.chinadaily.com.cn").is_some());
        assert!(config.selectors_for("notchinadaily.com.cn").is_none());
        assert!(config.selectors_for("example.com").is_none());
    }

    #[test]
    fn test_language_labels() {
        assert_eq!(language_name("ja"), "Japanese");
        assert_eq!(language_name("pt"), "pt");
        assert_eq!(language_display("auto"), "Auto-detected");
    }
}
