//! Signals that a network response needs a real browser.

use scraper::{Html, Selector};

/// Statuses commonly returned by bot-mitigation layers.
pub const BOT_WALL_STATUSES: [u16; 3] = [403, 429, 503];

/// Framework mount points that are empty in a server response when the page
/// is rendered client-side.
const FRAMEWORK_ROOTS: &[&str] = &["#root", "#app", "#__next", "#__nuxt", "[ng-app]", "[data-reactroot]"];

/// A root counts as empty below this many visible characters.
const EMPTY_ROOT_CHARS: usize = 20;

pub fn is_bot_wall(status: u16) -> bool {
    BOT_WALL_STATUSES.contains(&status)
}

/// Whether an HTML body looks like an unrendered JavaScript shell: too little
/// visible text, or a known framework root with nothing in it.
pub fn looks_like_js_shell(html: &str, min_text_chars: usize) -> bool {
    let document = Html::parse_document(html);

    let visible = visible_text_len(&document);
    if visible < min_text_chars {
        tracing::debug!(visible, min_text_chars, "near-empty body");
        return true;
    }

    FRAMEWORK_ROOTS.iter().any(|selector| {
        let Ok(selector) = Selector::parse(selector) else {
            return false;
        };
        document.select(&selector).any(|root| {
            let text: usize = root.text().map(|t| t.trim().chars().count()).sum();
            text < EMPTY_ROOT_CHARS
        })
    })
}

fn visible_text_len(document: &Html) -> usize {
    let Ok(body) = Selector::parse("body") else {
        return 0;
    };
    let hidden = ["script", "style", "noscript", "template"];

    document
        .select(&body)
        .next()
        .map(|body| {
            body.descendants()
                .filter_map(|node| {
                    let text = node.value().as_text()?;
                    let parent = node.parent()?.value().as_element()?;
                    (!hidden.contains(&parent.name())).then(|| text.trim().chars().count())
                })
                .sum()
        })
        .unwrap_or(0)
}
