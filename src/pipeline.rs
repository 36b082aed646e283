//! Batch orchestration.
//!
//! Every URL runs through its own pipeline:
//!
//! ```text
//! Pending ─┬─> Cached
//!          └─> Fetching -> Extracting -> TranslatingTitle -> TranslatingBody -> Rendering -> Saved
//! ```
//!
//! Any stage can end in a failure, which is recorded as a [`UrlOutcome::Failed`]
//! naming the stage. Pipelines run concurrently up to `max_concurrency`; one
//! URL failing never affects another. The page is written before the cache
//! entry, so a crash in between only costs a reprocess on the next run.

use crate::cache::Cache;
use crate::config::Config;
use crate::error::{ExtractError, Result};
use crate::extract::Extractor;
use crate::fetch::Fetcher;
use crate::http::Transport;
use crate::models::{CacheEntry, Strategy};
use crate::render::render;
use crate::translate::Translator;
use crate::utils::{fingerprint, safe_filename, truncate_for_log, write_atomic};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Where a URL's pipeline is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Cached,
    Fetching,
    Extracting,
    TranslatingTitle,
    TranslatingBody,
    Rendering,
    Saved,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::Cached => "cached",
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::TranslatingTitle => "translating-title",
            Stage::TranslatingBody => "translating-body",
            Stage::Rendering => "rendering",
            Stage::Saved => "saved",
        };
        f.write_str(name)
    }
}

/// Terminal result of one URL's pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum UrlOutcome {
    Saved {
        url: String,
        title: String,
        path: PathBuf,
        strategy: Strategy,
    },
    /// Processed by an earlier run; nothing was fetched.
    Cached { url: String, title: String },
    Failed {
        url: String,
        stage: Stage,
        reason: String,
    },
}

impl UrlOutcome {
    pub fn url(&self) -> &str {
        match self {
            UrlOutcome::Saved { url, .. }
            | UrlOutcome::Cached { url, .. }
            | UrlOutcome::Failed { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, UrlOutcome::Failed { .. })
    }

    pub fn stage(&self) -> Stage {
        match self {
            UrlOutcome::Saved { .. } => Stage::Saved,
            UrlOutcome::Cached { .. } => Stage::Cached,
            UrlOutcome::Failed { stage, .. } => *stage,
        }
    }
}

/// Counts for a finished batch. Cached URLs count as successes.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cached: usize,
    /// One outcome per input URL, in input order.
    pub outcomes: Vec<UrlOutcome>,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: Vec<UrlOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let cached = outcomes
            .iter()
            .filter(|o| matches!(o, UrlOutcome::Cached { .. }))
            .count();
        Self {
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            cached,
            outcomes,
        }
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    fetcher: Fetcher,
    extractor: Extractor,
    translator: Arc<dyn Translator>,
    cache: Option<Cache>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    /// Assemble a pipeline. Opens the cache directory when caching is on.
    pub async fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        translator: Arc<dyn Translator>,
    ) -> Result<Self> {
        let cache = if config.use_cache {
            Some(Cache::open(config.cache_dir()).await?)
        } else {
            None
        };
        Ok(Self {
            fetcher: Fetcher::new(transport, Arc::clone(&config)),
            extractor: Extractor::new(Arc::clone(&config)),
            translator,
            cache,
            cancel: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Flag that stops URLs which have not started yet. Set it from a signal handler.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Process every URL and summarize. Never fails as a whole.
    #[instrument(level = "info", skip_all, fields(total = urls.len(), backend = self.translator.name()))]
    pub async fn run(&self, urls: &[String]) -> BatchSummary {
        let start = Instant::now();
        let concurrency = self.config.max_concurrency.max(1);
        info!(concurrency, "Starting batch");

        let mut indexed: Vec<(usize, UrlOutcome)> = stream::iter(urls.iter().enumerate())
            .map(|(i, url)| async move { (i, self.process(i, url).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);

        let summary = BatchSummary::from_outcomes(indexed.into_iter().map(|(_, o)| o).collect());
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cached = summary.cached,
            output_dir = %self.config.output_dir,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch complete"
        );
        summary
    }

    fn fail(&self, url: &str, stage: Stage, err: &dyn fmt::Display) -> UrlOutcome {
        error!(url, %stage, error = %err, "URL failed");
        UrlOutcome::Failed {
            url: url.to_string(),
            stage,
            reason: err.to_string(),
        }
    }

    #[instrument(level = "info", skip(self))]
    async fn process(&self, index: usize, url: &str) -> UrlOutcome {
        if self.cancel.load(Ordering::SeqCst) {
            warn!(url, "Cancelled before start");
            return UrlOutcome::Failed {
                url: url.to_string(),
                stage: Stage::Pending,
                reason: "cancelled".to_string(),
            };
        }

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(url).await {
                info!(url, title = %entry.title, "Already processed, skipping");
                return UrlOutcome::Cached {
                    url: url.to_string(),
                    title: entry.title,
                };
            }
        }

        let fetched = match self.fetcher.fetch(url).await {
            Ok(f) => f,
            Err(e) => return self.fail(url, Stage::Fetching, &e),
        };

        let article = match self.extractor.extract(&fetched.body, url) {
            Ok(a) => a,
            Err(e) => {
                if self.config.debug_dump && matches!(e, ExtractError::Insufficient { .. }) {
                    self.dump_markup(url, &fetched.body).await;
                }
                return self.fail(url, Stage::Extracting, &e);
            }
        };
        drop(fetched);
        info!(
            url,
            title = %truncate_for_log(&article.title, 80),
            chars = article.char_count(),
            strategy = %article.strategy,
            "Extracted"
        );

        let title = match self.translator.translate(&article.title).await {
            Ok(t) if !t.trim().is_empty() => t.trim().to_string(),
            Ok(_) => article.title.clone(),
            Err(e) => return self.fail(url, Stage::TranslatingTitle, &e),
        };

        let text = match self.translator.translate(&article.text).await {
            Ok(t) => t,
            Err(e) => return self.fail(url, Stage::TranslatingBody, &e),
        };

        let html = render(&article, &title, &text, &self.config);
        let path = Path::new(&self.config.output_dir)
            .join(format!("{}.html", safe_filename(&title, url)));
        if let Err(e) = write_atomic(&path, html.as_bytes()).await {
            return self.fail(url, Stage::Rendering, &e);
        }
        info!(url, path = %path.display(), "Saved");

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(url, &CacheEntry::new(url, &title)).await {
                warn!(url, error = %e, "Page saved but cache entry could not be written");
            }
        }

        UrlOutcome::Saved {
            url: url.to_string(),
            title,
            path,
            strategy: article.strategy,
        }
    }

    async fn dump_markup(&self, url: &str, body: &str) {
        let path = self
            .config
            .debug_dir()
            .join(format!("{}.html", fingerprint(url)));
        match write_atomic(&path, body.as_bytes()).await {
            Ok(()) => debug!(url, path = %path.display(), "Dumped raw markup"),
            Err(e) => warn!(url, error = %e, "Could not write debug dump"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranslateError;
    use crate::http::mock::{MockTransport, ok};
    use async_trait::async_trait;

    const PAGE: &str = "<html><head><title>Hello</title></head>\
        <body><article>Paragraph one. Paragraph two.</article></body></html>";

    struct Identity;

    #[async_trait]
    impl Translator for Identity {
        fn name(&self) -> &str {
            "identity"
        }

        async fn translate(&self, text: &str) -> std::result::Result<String, TranslateError> {
            Ok(text.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Translator for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn translate(&self, _text: &str) -> std::result::Result<String, TranslateError> {
            Err(TranslateError::Provider {
                backend: "broken".into(),
                payload: "quota".into(),
            })
        }
    }

    // the fixture page is far below the production size gates
    fn config(dir: &Path) -> Arc<Config> {
        let mut config = Config {
            output_dir: dir.to_string_lossy().into_owned(),
            min_content_chars: 10,
            ..Config::default()
        };
        config.blocking.min_body_bytes = 0;
        Arc::new(config)
    }

    fn html_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|x| x == "html"))
            .collect()
    }

    async fn pipeline(
        config: Arc<Config>,
        transport: &Arc<MockTransport>,
        translator: Arc<dyn Translator>,
    ) -> Pipeline {
        Pipeline::new(config, transport.clone(), translator)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_with_identity_translator() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.com/hello";
        let transport = Arc::new(MockTransport::new().always(url, ok(200, PAGE)));
        let p = pipeline(config(dir.path()), &transport, Arc::new(Identity)).await;

        let summary = p.run(&[url.to_string()]).await;
        assert_eq!((summary.succeeded, summary.total), (1, 1));

        let files = html_files(dir.path());
        assert_eq!(files, vec![dir.path().join("Hello.html")]);
        let html = std::fs::read_to_string(&files[0]).unwrap();
        assert!(html.contains("<title>Hello</title>"));
        assert!(html.contains("Paragraph one."));
        assert!(html.contains("Paragraph two."));

        let cache_file = dir
            .path()
            .join(".cache")
            .join(format!("{}.json", fingerprint(url)));
        assert!(cache_file.exists());
    }

    #[tokio::test]
    async fn test_second_run_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.com/hello";
        let transport = Arc::new(MockTransport::new().always(url, ok(200, PAGE)));
        let p = pipeline(config(dir.path()), &transport, Arc::new(Identity)).await;

        p.run(&[url.to_string()]).await;
        let calls = transport.calls();
        let summary = p.run(&[url.to_string()]).await;

        assert_eq!(transport.calls(), calls);
        assert_eq!((summary.succeeded, summary.cached), (1, 1));
        assert_eq!(
            summary.outcomes[0],
            UrlOutcome::Cached {
                url: url.to_string(),
                title: "Hello".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cache_disabled_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.com/hello";
        let transport = Arc::new(MockTransport::new().always(url, ok(200, PAGE)));
        let cfg = Arc::new(Config {
            use_cache: false,
            ..(*config(dir.path())).clone()
        });
        let p = pipeline(cfg, &transport, Arc::new(Identity)).await;

        p.run(&[url.to_string()]).await;
        p.run(&[url.to_string()]).await;
        assert_eq!(transport.calls(), 2);
        assert!(!dir.path().join(".cache").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_captcha_page_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.com/guarded";
        let body = format!("<html><body>captcha {}</body></html>", "x".repeat(466));
        assert_eq!(body.len(), 500);
        let transport = Arc::new(MockTransport::new().always(url, ok(200, &body)));
        let p = pipeline(config(dir.path()), &transport, Arc::new(Identity)).await;

        let summary = p.run(&[url.to_string()]).await;
        assert_eq!((summary.succeeded, summary.total), (0, 1));
        assert_eq!(summary.outcomes[0].stage(), Stage::Fetching);
        assert!(html_files(dir.path()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_sink_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let good = "https://example.com/hello";
        let bad = "https://down.example.org/page";
        let transport = Arc::new(
            MockTransport::new()
                .always(good, ok(200, PAGE))
                .always(bad, ok(503, "unavailable")),
        );
        let p = pipeline(config(dir.path()), &transport, Arc::new(Identity)).await;

        let summary = p.run(&[bad.to_string(), good.to_string()]).await;
        assert_eq!((summary.succeeded, summary.failed, summary.total), (1, 1, 2));
        assert_eq!(summary.outcomes[0].url(), bad);
        assert_eq!(transport.calls_to(bad), 3);
        let UrlOutcome::Failed { reason, .. } = &summary.outcomes[0] else {
            panic!("expected failure");
        };
        assert!(reason.contains("3 attempts"), "{reason}");
    }

    #[tokio::test]
    async fn test_translation_failure_names_stage() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.com/hello";
        let transport = Arc::new(MockTransport::new().always(url, ok(200, PAGE)));
        let p = pipeline(config(dir.path()), &transport, Arc::new(Broken)).await;

        let summary = p.run(&[url.to_string()]).await;
        assert_eq!(summary.outcomes[0].stage(), Stage::TranslatingTitle);
        assert!(html_files(dir.path()).is_empty());
        let cache = Cache::open(dir.path().join(".cache")).await.unwrap();
        assert!(cache.get(url).await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_urls_are_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let p = pipeline(config(dir.path()), &transport, Arc::new(Identity)).await;
        p.cancel_handle().store(true, Ordering::SeqCst);

        let urls = vec!["https://a.example/1".to_string(), "https://b.example/2".to_string()];
        let summary = p.run(&urls).await;
        assert_eq!(summary.failed, 2);
        assert_eq!(transport.calls(), 0);
        for outcome in &summary.outcomes {
            assert!(matches!(
                outcome,
                UrlOutcome::Failed { stage: Stage::Pending, reason, .. } if reason == "cancelled"
            ));
        }
    }

    #[tokio::test]
    async fn test_debug_dump_on_insufficient_content() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://example.com/hello";
        let transport = Arc::new(MockTransport::new().always(url, ok(200, PAGE)));
        let cfg = Arc::new(Config {
            min_content_chars: 1000,
            debug_dump: true,
            ..(*config(dir.path())).clone()
        });
        let p = pipeline(cfg, &transport, Arc::new(Identity)).await;

        let summary = p.run(&[url.to_string()]).await;
        assert_eq!(summary.outcomes[0].stage(), Stage::Extracting);
        let dump = dir
            .path()
            .join(".debug")
            .join(format!("{}.html", fingerprint(url)));
        assert_eq!(std::fs::read_to_string(dump).unwrap(), PAGE);
    }

    #[test]
    fn test_summary_counts() {
        let outcomes = vec![
            UrlOutcome::Cached {
                url: "a".into(),
                title: "t".into(),
            },
            UrlOutcome::Failed {
                url: "b".into(),
                stage: Stage::Fetching,
                reason: "x".into(),
            },
        ];
        let s = BatchSummary::from_outcomes(outcomes);
        assert_eq!((s.total, s.succeeded, s.failed, s.cached), (2, 1, 1, 1));
    }
}
