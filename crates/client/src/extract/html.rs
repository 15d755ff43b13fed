//! HTML to Markdown via scraper + htmd.

use scraper::{Html, Selector};
use sieve_core::Error;

use super::{HtmlDocument, TextExtractor};

/// Candidate containers for the readable part of a page, best first.
const CONTENT_ROOTS: &[&str] = &["article", "main", "[role=main]", "body"];

/// Elements that never carry readable content.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "header", "footer", "aside", "form", "iframe", "svg", "button",
];

/// Default [`TextExtractor`]: isolates the main content container and converts
/// it to Markdown with htmd.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmdExtractor;

impl HtmdExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for HtmdExtractor {
    fn name(&self) -> &'static str {
        "htmd"
    }

    fn extract_html(&self, html: &str) -> Result<HtmlDocument, Error> {
        let document = Html::parse_document(html);

        let title = select_text(&document, "title").or_else(|| select_text(&document, "h1"));
        let language = selector("html")
            .and_then(|s| document.select(&s).next())
            .and_then(|el| el.value().attr("lang"))
            .map(|lang| lang.trim().to_ascii_lowercase())
            .filter(|lang| !lang.is_empty());

        let container = CONTENT_ROOTS
            .iter()
            .filter_map(|s| selector(s))
            .find_map(|s| document.select(&s).next())
            .map(|el| el.html())
            .unwrap_or_else(|| html.to_string());

        let converter = htmd::HtmlToMarkdown::builder().skip_tags(SKIPPED_TAGS.to_vec()).build();
        let markdown = converter
            .convert(&container)
            .map_err(|e| Error::ExtractFailed(format!("markdown conversion failed: {e}")))?;

        Ok(HtmlDocument { title, markdown, language })
    }
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn select_text(document: &Html, s: &str) -> Option<String> {
    let selector = selector(s)?;
    let element = document.select(&selector).next()?;
    let text = element.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}
