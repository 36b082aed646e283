//! # Article Translator
//!
//! Batch-fetches web articles, extracts their readable text, translates or
//! rewrites it through a pluggable backend, and renders one static HTML page
//! per article.
//!
//! ## Architecture
//!
//! Each URL runs through its own pipeline:
//! 1. **Fetching** ([`fetch`]): browser-like requests with retries, user-agent
//!    rotation, anti-bot detection and proxy fallback
//! 2. **Extracting** ([`extract`]): a cascade of readability, density scoring
//!    and structural selectors
//! 3. **Translating** ([`translate`]): paragraph-bounded chunks sent to a free,
//!    machine-translation or LLM backend
//! 4. **Rendering** ([`render`]): a fixed, escaped HTML template
//!
//! [`pipeline`] runs URLs concurrently and records one outcome per URL;
//! [`cache`] makes reruns skip URLs that already produced a page.

pub mod cache;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod http;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod retry;
pub mod translate;
pub mod utils;
