//! HTML rendering of translated articles.
//!
//! The page is a fixed, self-contained template: translated title in
//! `<title>`, `<meta name="description">` and `<h1>`, a meta row with the
//! fetch date, target language and a link to the original, the body as one
//! `<p>` per paragraph, and a language sidebar. Every substituted value is
//! HTML-escaped; nothing from the source page is emitted as markup.

use crate::config::{Config, language_display};
use crate::models::{ExtractedArticle, PARAGRAPH_SEPARATOR};
use chrono::{Local, NaiveDate};
use html_escape::{encode_double_quoted_attribute, encode_text};
use itertools::Itertools;

const STYLE: &str = r#"
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.8; color: #333; background: #f5f5f5; }
        .container { max-width: 1200px; margin: 0 auto; padding: 0 20px; }
        .article-layout { display: grid; grid-template-columns: 1fr 300px; gap: 2rem; margin: 2rem 0 3rem; }
        .article-main { background: white; border-radius: 10px; overflow: hidden; box-shadow: 0 2px 15px rgba(0,0,0,0.08); }
        .article-header { padding: 3rem 3rem 2rem; }
        .article-category { display: inline-block; background: #c41e3a; color: white; padding: 6px 16px; border-radius: 20px; font-size: 0.85rem; font-weight: bold; margin-bottom: 1rem; }
        .article-title { font-size: 2.5rem; margin-bottom: 1rem; line-height: 1.3; }
        .article-meta { display: flex; gap: 2rem; color: #999; font-size: 0.95rem; padding-bottom: 2rem; border-bottom: 2px solid #f0f0f0; flex-wrap: wrap; }
        .article-featured-image { width: 100%; height: 400px; object-fit: cover; }
        .article-featured-placeholder { width: 100%; height: 120px; background: linear-gradient(135deg, #c41e3a, #ff9800); }
        .article-content { padding: 3rem; font-size: 1.1rem; line-height: 1.9; }
        .article-content p { margin-bottom: 1.5rem; color: #444; }
        .source-info { background: #f8f9fa; padding: 1.5rem; margin: 0 3rem 3rem; border-left: 4px solid #c41e3a; }
        .widget { background: white; padding: 1.5rem; border-radius: 10px; box-shadow: 0 2px 8px rgba(0,0,0,0.05); }
        .widget h3 { color: #c41e3a; margin-bottom: 1rem; font-size: 1.2rem; }
        footer { background: #2c2c2c; color: #ccc; padding: 2rem 0 1rem; text-align: center; }
        footer a { color: #ffd700; text-decoration: none; }
        @media (max-width: 968px) { .article-layout { grid-template-columns: 1fr; } }
"#;

/// Render a translated article dated today.
pub fn render(article: &ExtractedArticle, title: &str, text: &str, config: &Config) -> String {
    render_dated(article, title, text, config, Local::now().date_naive())
}

/// Turn translated text into `<p>` elements; single newlines become `<br>`.
pub fn paragraphs_html(text: &str) -> String {
    text.split(PARAGRAPH_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let body = p.lines().map(|l| encode_text(l.trim())).join("<br>\n");
            format!("<p>{body}</p>")
        })
        .join("\n                    ")
}

fn featured_block(article: &ExtractedArticle, title: &str, config: &Config) -> String {
    match (&article.lead_image, config.show_lead_image) {
        (Some(src), true) => format!(
            r#"<img class="article-featured-image" src="{}" alt="{}">"#,
            encode_double_quoted_attribute(src),
            encode_double_quoted_attribute(title)
        ),
        _ => r#"<div class="article-featured-placeholder"></div>"#.to_string(),
    }
}

pub fn render_dated(
    article: &ExtractedArticle,
    title: &str,
    text: &str,
    config: &Config,
    fetched: NaiveDate,
) -> String {
    let title_text = encode_text(title);
    let title_attr = encode_double_quoted_attribute(title);
    let source_url = encode_double_quoted_attribute(&article.url);
    let lang = encode_double_quoted_attribute(&config.target_lang);
    let lang_display = encode_text(language_display(&config.target_lang));
    let source_display = encode_text(language_display(&config.source_lang));
    let fetched = fetched.format("%B %d, %Y");
    let featured = featured_block(article, title, config);
    let content = paragraphs_html(text);

    format!(
        r#"<!DOCTYPE html>
<html lang="{lang}">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title_text}</title>
    <meta name="description" content="{title_attr}">
    <style>{STYLE}    </style>
</head>
<body>
    <div class="container">
        <div class="article-layout">
            <article class="article-main">
                {featured}
                <div class="article-header">
                    <span class="article-category">TRANSLATED ARTICLE</span>
                    <h1 class="article-title">{title_text}</h1>
                    <div class="article-meta">
                        <span class="meta-item">{fetched}</span>
                        <span class="meta-item">Translated: {lang_display}</span>
                        <span class="meta-item"><a href="{source_url}" target="_blank" rel="noopener">View Original</a></span>
                    </div>
                </div>
                <div class="article-content">
                    {content}
                </div>
                <div class="source-info">
                    <strong>Original Source:</strong><br>
                    This article was automatically translated from <a href="{source_url}" target="_blank" rel="noopener">{source_url}</a>.
                </div>
            </article>
            <aside class="sidebar">
                <div class="widget">
                    <h3>Language</h3>
                    <p>Source: {source_display}<br>Target: {lang_display}</p>
                </div>
            </aside>
        </div>
    </div>
    <footer>
        <div class="container">
            <p><a href="{source_url}" target="_blank" rel="noopener">Original Article</a></p>
        </div>
    </footer>
</body>
</html>
"#
    )
}
