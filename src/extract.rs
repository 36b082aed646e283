//! Article extraction.
//!
//! Raw markup goes through an ordered list of strategies; the first one whose
//! text is longer than `min_strategy_chars` wins, and a strategy that errors
//! (or panics inside a third-party parser) simply hands over to the next.
//!
//! 1. **Readability**: Mozilla's algorithm via the `readability` crate.
//! 2. **Density scoring**: a Readability-style scorer over the `scraper` DOM
//!    that picks the densest content block, strips its images and reads the
//!    text back out of the fragment.
//! 3. **Structural fallback**: per-site selectors, then common content
//!    selectors, then the largest `div`/`section`, then `<body>`.
//!
//! Text comes back as trimmed paragraphs joined by a blank line.

use crate::config::Config;
use crate::error::ExtractError;
use crate::models::{ExtractedArticle, PARAGRAPH_SEPARATOR, Strategy};
use crate::utils::truncate_for_log;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashMap;
use std::io::Cursor;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static IMG_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());
static POSITIVE_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)article|body|content|entry|main|page|post|text|blog|story").unwrap()
});
static NEGATIVE_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)comment|footer|sidebar|nav|menu|share|related|promo|widget|banner|sponsor|\bad\b")
        .unwrap()
});

/// Tags whose content never counts as article text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "nav", "footer", "header", "aside", "img", "form",
    "svg", "button", "template",
];

/// Tags that start a new paragraph.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol",
    "blockquote", "pre", "table", "tr", "br", "figure", "figcaption", "dd", "dt", "hr",
];

const GENERIC_SELECTORS: &[&str] = &[
    "article",
    "main",
    ".article-content",
    ".post-content",
    ".entry-content",
    "#content",
];

/// Minimum text a `div`/`section` needs before it can win the largest-block pick.
const BLOCK_FLOOR_CHARS: usize = 50;

/// Minimum paragraph length that contributes to density scores.
const SCORED_PARAGRAPH_CHARS: usize = 25;

/// Stateless apart from the shared config; safe to use from many tasks.
pub struct Extractor {
    config: Arc<Config>,
}

impl Extractor {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Turn `raw` markup fetched from `url` into an article.
    ///
    /// Fails with [`ExtractError::NoContent`] when nothing readable is found,
    /// and with [`ExtractError::Insufficient`] when the best text is shorter
    /// than `min_content_chars`.
    #[instrument(level = "info", skip(self, raw), fields(bytes = raw.len()))]
    pub fn extract(&self, raw: &str, url: &str) -> Result<ExtractedArticle, ExtractError> {
        let parsed_url = Url::parse(url).ok();
        let document = Html::parse_document(raw);
        let title = extract_title(&document, url);
        let lead_image = parsed_url
            .as_ref()
            .and_then(|base| extract_lead_image(&document, base));

        let (strategy, text) = self.pick_text(raw, &document, parsed_url.as_ref())?;

        let article = ExtractedArticle {
            url: url.to_string(),
            title,
            text,
            lead_image,
            strategy,
        };

        let chars = article.char_count();
        if chars < self.config.min_content_chars {
            warn!(
                %url,
                chars,
                min = self.config.min_content_chars,
                %strategy,
                preview = %truncate_for_log(&article.text, 200),
                "Extracted text is implausibly short"
            );
            return Err(ExtractError::Insufficient {
                chars,
                min: self.config.min_content_chars,
            });
        }

        info!(
            %url,
            chars,
            paragraphs = article.paragraphs().count(),
            %strategy,
            title = %article.title,
            "Extracted article"
        );
        Ok(article)
    }

    fn pick_text(
        &self,
        raw: &str,
        document: &Html,
        url: Option<&Url>,
    ) -> Result<(Strategy, String), ExtractError> {
        let min = self.config.min_strategy_chars;
        let adequate = |text: &str| text.chars().count() > min;

        if let Some(url) = url {
            match guarded(|| readability_text(raw, url)) {
                Some(text) if adequate(&text) => return Ok((Strategy::Readability, text)),
                Some(text) => debug!(chars = text.chars().count(), "readability result too short"),
                None => debug!("readability strategy failed"),
            }
        }

        match guarded(|| density_text(document)) {
            Some(text) if adequate(&text) => return Ok((Strategy::DensityScoring, text)),
            Some(text) => debug!(chars = text.chars().count(), "density result too short"),
            None => debug!("density strategy found no candidates"),
        }

        let host = url.and_then(|u| u.host_str()).unwrap_or_default();
        self.structural_text(document, host)
            .ok_or(ExtractError::NoContent)
    }

    fn structural_text(&self, document: &Html, host: &str) -> Option<(Strategy, String)> {
        if let Some(selectors) = self.config.selectors_for(host) {
            for raw_sel in selectors {
                let Ok(selector) = Selector::parse(raw_sel) else {
                    warn!(selector = %raw_sel, %host, "Ignoring invalid domain selector");
                    continue;
                };
                if let Some(el) = document.select(&selector).next() {
                    let text = block_text(el);
                    if text.chars().count() >= self.config.min_strategy_chars {
                        debug!(selector = %raw_sel, "domain selector matched");
                        return Some((Strategy::DomainSelector, text));
                    }
                }
            }
        }

        for raw_sel in GENERIC_SELECTORS {
            let selector = Selector::parse(raw_sel).ok()?;
            if let Some(el) = document.select(&selector).next() {
                let text = block_text(el);
                if !text.is_empty() {
                    debug!(selector = %raw_sel, "generic selector matched");
                    return Some((Strategy::GenericSelector, text));
                }
            }
        }

        let blocks = Selector::parse("div, section").ok()?;
        let largest = document
            .select(&blocks)
            .map(block_text)
            .filter(|t| t.chars().count() >= BLOCK_FLOOR_CHARS)
            .max_by_key(|t| t.chars().count());
        if let Some(text) = largest {
            return Some((Strategy::LargestBlock, text));
        }

        let body = Selector::parse("body").ok()?;
        document
            .select(&body)
            .next()
            .map(block_text)
            .filter(|t| !t.is_empty())
            .map(|t| (Strategy::Body, t))
    }
}

/// Run a strategy, treating a panic inside it like any other failure.
fn guarded<F>(f: F) -> Option<String>
where
    F: FnOnce() -> Option<String>,
{
    catch_unwind(AssertUnwindSafe(f)).ok().flatten()
}

fn readability_text(raw: &str, url: &Url) -> Option<String> {
    let mut cursor = Cursor::new(raw.as_bytes());
    let product = readability::extractor::extract(&mut cursor, url).ok()?;
    let text = normalize_text(&product.text);
    (!text.is_empty()).then_some(text)
}

/// Readability-style density scoring over the parsed DOM.
fn density_text(document: &Html) -> Option<String> {
    let paragraphs = Selector::parse("p, pre, td").ok()?;
    let mut scores = HashMap::new();

    for para in document.select(&paragraphs) {
        let text = block_text(para);
        let len = text.chars().count();
        if len < SCORED_PARAGRAPH_CHARS {
            continue;
        }
        let commas = text.matches([',', '，', '、']).count() as f64;
        let score = 1.0 + commas + (len as f64 / 100.0).min(3.0);

        let parent = para.parent().and_then(ElementRef::wrap);
        if let Some(parent) = parent {
            *scores
                .entry(parent.id())
                .or_insert_with(|| initial_score(parent)) += score;
            if let Some(grand) = parent.parent().and_then(ElementRef::wrap) {
                *scores
                    .entry(grand.id())
                    .or_insert_with(|| initial_score(grand)) += score / 2.0;
            }
        }
    }

    let (best, _) = scores
        .into_iter()
        .filter_map(|(id, score)| {
            let el = document.tree.get(id).and_then(ElementRef::wrap)?;
            Some((el, score * (1.0 - link_density(el))))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    let fragment = IMG_TAG.replace_all(&best.html(), "").into_owned();
    let parsed = Html::parse_fragment(&fragment);
    let text = block_text(parsed.root_element());
    (!text.is_empty()).then_some(text)
}

fn initial_score(el: ElementRef) -> f64 {
    let tag = match el.value().name() {
        "article" => 10.0,
        "div" => 5.0,
        "pre" | "td" | "blockquote" => 3.0,
        "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" | "form" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    };
    tag + class_weight(el)
}

fn class_weight(el: ElementRef) -> f64 {
    let mut weight = 0.0;
    for attr in [el.value().attr("class"), el.value().attr("id")].into_iter().flatten() {
        if NEGATIVE_HINT.is_match(attr) {
            weight -= 25.0;
        }
        if POSITIVE_HINT.is_match(attr) {
            weight += 25.0;
        }
    }
    weight
}

fn link_density(el: ElementRef) -> f64 {
    let total = el.text().map(|t| t.chars().count()).sum::<usize>();
    if total == 0 {
        return 1.0;
    }
    let Ok(links) = Selector::parse("a") else {
        return 0.0;
    };
    let linked = el
        .select(&links)
        .flat_map(|a| a.text())
        .map(|t| t.chars().count())
        .sum::<usize>();
    linked as f64 / total as f64
}

/// Text under `root`, one paragraph per block element, non-content tags skipped.
pub fn block_text(root: ElementRef) -> String {
    let mut paragraphs = Vec::new();
    let mut line = String::new();
    walk(root, &mut paragraphs, &mut line);
    flush(&mut paragraphs, &mut line);
    paragraphs.join(PARAGRAPH_SEPARATOR)
}

fn walk(el: ElementRef, paragraphs: &mut Vec<String>, line: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => line.push_str(text),
            Node::Element(element) => {
                let name = element.name();
                if SKIP_TAGS.contains(&name) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    flush(paragraphs, line);
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    walk(child_el, paragraphs, line);
                }
                if block {
                    flush(paragraphs, line);
                }
            }
            _ => {}
        }
    }
}

fn flush(paragraphs: &mut Vec<String>, line: &mut String) {
    let collapsed = WHITESPACE.replace_all(line.trim(), " ");
    if !collapsed.is_empty() {
        paragraphs.push(collapsed.into_owned());
    }
    line.clear();
}

/// Collapse whitespace per line and join non-empty lines as paragraphs.
pub fn normalize_text(text: &str) -> String {
    text.lines()
        .map(|l| WHITESPACE.replace_all(l.trim(), " ").into_owned())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(PARAGRAPH_SEPARATOR)
}

/// Open Graph / Twitter title, then `<title>`, then the URL host.
pub fn extract_title(document: &Html, url: &str) -> String {
    if let Ok(meta) = Selector::parse("meta") {
        for el in document.select(&meta) {
            let attrs = el.value();
            let key = attrs
                .attr("property")
                .or_else(|| attrs.attr("name"))
                .unwrap_or_default()
                .to_lowercase();
            if key == "og:title" || key == "twitter:title" {
                let content = attrs.attr("content").unwrap_or_default().trim();
                if !content.is_empty() {
                    return WHITESPACE.replace_all(content, " ").into_owned();
                }
            }
        }
    }

    if let Ok(title_sel) = Selector::parse("title") {
        if let Some(el) = document.select(&title_sel).next() {
            let text = el.text().collect::<String>();
            let text = WHITESPACE.replace_all(text.trim(), " ");
            if !text.is_empty() {
                return text.into_owned();
            }
        }
    }

    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

fn extract_lead_image(document: &Html, base: &Url) -> Option<String> {
    let selector = Selector::parse(r#"meta[property="og:image"]"#).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .and_then(|c| base.join(c).ok())
        .map(|u| u.to_string())
}
