// src/ingest/normalize.rs
//! Text normalizer producing the exact input form the scoring model was trained on.
//!
//! Stage order is part of the contract with the scoring service:
//! 1) strip URLs
//! 2) emoji glyphs -> `:tag:` -> working-language name
//! 3) strip a leading `RT` token
//! 4) `@handle` -> `@`
//! 5) denylisted punctuation -> space
//! 6) collapse whitespace
//! 7) lowercase + trim

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Longest emoji sequence (in chars) tried at a single position.
const MAX_EMOJI_CHARS: usize = 10;

static EMOJI_NAMES_ES: Lazy<HashMap<String, String>> = Lazy::new(|| {
    let raw = include_str!("../../config/emoji_names_es.json");
    serde_json::from_str::<HashMap<String, String>>(raw).expect("valid emoji name table")
});

static RE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://(?:[a-zA-Z]|[0-9]|[$-_@.&+]|[!*\(\),]|(?:%[0-9a-fA-F][0-9a-fA-F]))+")
        .expect("static regex")
});
static RE_EMOJI_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([a-z0-9_]+):").expect("static regex"));
static RE_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\w+").expect("static regex"));
static RE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.,/#@!¡?¿$%\^&*;:{}=\-_`~()”“"]"#).expect("static regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Map raw post text to the canonical scoring input. Total and deterministic.
pub fn normalize(raw: &str) -> String {
    let out = RE_URL.replace_all(raw, "");
    let out = translate_emoji_tags(&demojize(&out));
    let out = strip_leading_rt(&out);
    let out = RE_MENTION.replace_all(out, "@");
    let out = RE_PUNCT.replace_all(&out, " ");
    let out = RE_WS.replace_all(&out, " ");
    out.to_lowercase().trim().to_string()
}

/// Replace every emoji glyph with `:tag:`, preferring the longest sequence
/// (ZWJ and variation-selector forms) at each position.
pub fn demojize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    'outer: while let Some(first) = rest.chars().next() {
        if !first.is_ascii() || starts_keycap(rest) {
            let bounds: Vec<usize> = rest
                .char_indices()
                .map(|(i, _)| i)
                .skip(1)
                .chain(std::iter::once(rest.len()))
                .take(MAX_EMOJI_CHARS)
                .collect();
            for &end in bounds.iter().rev() {
                if let Some(emoji) = emojis::get(&rest[..end]) {
                    out.push(':');
                    out.push_str(&emoji_tag(emoji.name()));
                    out.push(':');
                    rest = &rest[end..];
                    continue 'outer;
                }
            }
        }
        out.push(first);
        rest = &rest[first.len_utf8()..];
    }
    out
}

/// `1️⃣`, `#️⃣`: an ASCII base followed by VS16 or the combining keycap.
/// Any other ASCII is never the start of a glyph.
fn starts_keycap(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some('0'..='9' | '#' | '*'))
        && matches!(chars.next(), Some('\u{FE0F}' | '\u{20E3}'))
}

/// CLDR name -> tag: lowercase, every run of non-alphanumerics becomes `_`.
fn emoji_tag(name: &str) -> String {
    let mut tag = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !tag.is_empty() {
                tag.push('_');
            }
            pending_sep = false;
            tag.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    tag
}

/// Unmapped tags pass through untouched.
fn translate_emoji_tags(s: &str) -> String {
    RE_EMOJI_TAG
        .replace_all(s, |caps: &Captures| match EMOJI_NAMES_ES.get(&caps[1]) {
            Some(name) => name.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn strip_leading_rt(s: &str) -> &str {
    match s.strip_prefix("RT") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest,
        _ => s,
    }
}
