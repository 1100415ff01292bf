//! Post body normalization
//!
//! Board posts arrive as HTML-ish strings with entity-encoded characters and
//! quote-reference markers (`&gt;&gt;` followed by a 9-digit post id). Two
//! variants are exposed: `clean_text` for ingestion storage and
//! `clean_for_scoring` for the sentiment job, which additionally strips URLs
//! and decodes a few more entities.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

static QUOTE_REF_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"&gt;&gt;\d{9}").unwrap());

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:[a-zA-Z0-9]|[$-_@.&+]|[!*\\(),]|(?:%[0-9a-fA-F]{2}))+").unwrap()
});

/// Clean a raw post body for storage.
///
/// Removes HTML tags, drops quote-reference markers entirely, decodes `&gt;`
/// to a literal `>` and strips encoded apostrophes. Whitespace is left as-is;
/// an empty or all-whitespace result is valid output (the cleanup sweep
/// deletes such replies later).
pub fn clean_text(raw: &str) -> String {
    let text = TAG_PATTERN.replace_all(raw, "");
    let text = QUOTE_REF_PATTERN.replace_all(&text, "");
    let text = text.replace("&gt;", ">");
    text.replace("&#039;", "")
}

/// Clean a reply body before sentiment scoring.
///
/// Same as `clean_text` but strips URLs first and handles `&amp;`/`&quot;`,
/// since links and stray entities skew the lexicon scores.
pub fn clean_for_scoring(raw: &str) -> String {
    let text = URL_PATTERN.replace_all(raw, "");
    let text = TAG_PATTERN.replace_all(&text, "");
    let text = QUOTE_REF_PATTERN.replace_all(&text, "");
    let text = text.replace("&gt;", ">");
    let text = text.replace("&amp;", "&");
    let text = text.replace("&#039;", "");
    text.replace("&quot;", "")
}
