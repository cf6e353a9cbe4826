//! HTML to markdown normalization.

use htmd::HtmlToMarkdown;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::traits::{ContentKind, RawContent, TextNormalizer};

const MAIN_CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role='main']",
    "#content",
    "#main",
    ".content",
    ".main",
    ".post-content",
    ".entry-content",
];

const BOILERPLATE_SELECTORS: &[&str] = &[
    "nav",
    "header",
    "footer",
    "aside",
    ".nav",
    ".navbar",
    ".header",
    ".footer",
    ".sidebar",
    ".menu",
    ".advertisement",
    ".ads",
    "#nav",
    "#header",
    "#footer",
    "#sidebar",
    "script",
    "style",
    "noscript",
    "iframe",
];

/// Converts HTML into markdown with page chrome stripped. Markdown and plain
/// text pass through trimmed.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlNormalizer;

impl HtmlNormalizer {
    pub fn new() -> Self {
        Self
    }

    fn converter() -> HtmlToMarkdown {
        HtmlToMarkdown::builder()
            .skip_tags(vec!["script", "style", "noscript", "iframe", "img", "svg"])
            .build()
    }

    fn html_to_markdown(&self, html: &str) -> String {
        if html.trim().is_empty() {
            warn!("empty html passed to normalizer");
            return String::new();
        }
        let main = main_content(html);
        match Self::converter().convert(&main) {
            Ok(markdown) => {
                let markdown = collapse_blank_lines(markdown.trim());
                debug!(html_length = html.len(), markdown_length = markdown.len(), "html converted to markdown");
                markdown
            }
            Err(e) => {
                warn!(error = %e, html_length = html.len(), "html to markdown conversion failed");
                String::new()
            }
        }
    }
}

impl TextNormalizer for HtmlNormalizer {
    fn normalize(&self, raw: &RawContent) -> String {
        match raw.kind {
            ContentKind::Html => self.html_to_markdown(&raw.body),
            ContentKind::Markdown | ContentKind::Text => raw.body.trim().to_string(),
        }
    }
}

/// Inner HTML of the first main-content region, else `<body>` minus boilerplate.
fn main_content(html: &str) -> String {
    let document = Html::parse_document(html);

    for selector in MAIN_CONTENT_SELECTORS {
        if let Ok(selector) = Selector::parse(selector) {
            if let Some(main) = document.select(&selector).next() {
                return main.html();
            }
        }
    }

    if let Ok(body_selector) = Selector::parse("body") {
        if let Some(body) = document.select(&body_selector).next() {
            return remove_boilerplate(&body.html());
        }
    }

    html.to_string()
}

fn remove_boilerplate(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut result = html.to_string();
    for selector in BOILERPLATE_SELECTORS {
        if let Ok(selector) = Selector::parse(selector) {
            for element in fragment.select(&selector) {
                result = result.replace(&element.html(), "");
            }
        }
    }
    result
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim_end().to_string()
}
