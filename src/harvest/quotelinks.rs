//! Reply references inside post bodies.
//!
//! Bodies are HTML fragments. Replies show up as quote links
//! (`<a href="#p123" class="quotelink">&gt;&gt;123</a>`, or
//! `/g/thread/100#p123` for cross-thread references) and occasionally as bare
//! `>>123` text when the origin did not linkify them.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

static QUOTELINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.quotelink[href]").expect("valid selector"));

static POST_ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"#p(\d+)$").expect("valid regex"));

static BARE_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r">>(\d+)").expect("valid regex"));

/// Extract the post numbers a body replies to, sorted and deduplicated.
#[must_use]
pub fn extract_reply_ids(html: &str) -> Vec<u64> {
    if html.is_empty() {
        return Vec::new();
    }

    let document = Html::parse_fragment(html);
    let mut ids = BTreeSet::new();

    for element in document.select(&QUOTELINK_SELECTOR) {
        if let Some(href) = element.value().attr("href") {
            if let Some(id) = POST_ANCHOR
                .captures(href)
                .and_then(|c| c[1].parse::<u64>().ok())
            {
                ids.insert(id);
            }
        }
    }

    // Text nodes are already entity-decoded, so "&gt;&gt;123" reads as ">>123".
    let text: String = document.root_element().text().collect();
    for caps in BARE_QUOTE.captures_iter(&text) {
        if let Ok(id) = caps[1].parse::<u64>() {
            ids.insert(id);
        }
    }

    ids.into_iter().collect()
}
