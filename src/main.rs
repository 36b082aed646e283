//! # Article Translator
//!
//! Reads a list of URLs, turns each article into a translated static HTML
//! page, and prints a batch summary.
//!
//! ## Usage
//!
//! ```sh
//! article_translator -i urls.txt -o output -l zh -b simple
//! ```
//!
//! Configuration problems (bad YAML, unknown backend, missing credential,
//! unwritable output directory, missing URL file) stop the run before any
//! network request. Individual URL failures never do.

use article_translator::cli::Cli;
use article_translator::error::ConfigError;
use article_translator::http::ReqwestTransport;
use article_translator::pipeline::{Pipeline, UrlOutcome};
use article_translator::translate::create_translator;
use article_translator::utils::{ensure_writable_dir, parse_url_list};
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("article_translator starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(?args.config, %args.input, %args.outdir, "Parsed CLI arguments");

    let config = match args.into_config() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        backend = %config.backend,
        source = %config.source_lang,
        target = %config.target_lang,
        proxy = config.proxy.as_deref().unwrap_or("none"),
        concurrency = config.max_concurrency,
        cache = config.use_cache,
        "Configuration loaded"
    );

    // Backend construction never touches the network, so do it first
    let transport = Arc::new(ReqwestTransport::new(config.proxy.as_deref())?);
    let translator = match create_translator(&config, transport.clone()) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "Cannot create translator");
            return Err(e.into());
        }
    };

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&config.output_dir).await {
        error!(
            path = %config.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let raw = match tokio::fs::read_to_string(&config.urls_file).await {
        Ok(raw) => raw,
        Err(e) => {
            error!(path = %config.urls_file, error = %e, "Cannot read URL list");
            return Err(ConfigError::MissingUrls(config.urls_file.clone()).into());
        }
    };
    let urls = parse_url_list(&raw);
    if urls.is_empty() {
        warn!(path = %config.urls_file, "No URLs to process");
        return Ok(());
    }
    info!(count = urls.len(), path = %config.urls_file, "Loaded URL list");

    let pipeline = Pipeline::new(Arc::clone(&config), transport, translator).await?;

    // Ctrl-C stops URLs that have not started; running ones finish
    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight URLs");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let summary = pipeline.run(&urls).await;

    for outcome in &summary.outcomes {
        match outcome {
            UrlOutcome::Saved { url, path, .. } => {
                debug!(%url, path = %path.display(), "saved")
            }
            UrlOutcome::Cached { url, .. } => debug!(%url, "cached"),
            UrlOutcome::Failed { url, stage, reason } => {
                warn!(%url, %stage, %reason, "failed")
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        succeeded = summary.succeeded,
        total = summary.total,
        cached = summary.cached,
        output_dir = %config.output_dir,
        "Execution complete: {}/{} succeeded",
        summary.succeeded,
        summary.total
    );

    Ok(())
}
