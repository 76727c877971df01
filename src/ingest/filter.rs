// src/ingest/filter.rs
//! Relevance heuristics for search results.
//!
//! The thresholds here are empirically tuned and the downstream dashboard relies
//! on this exact selectivity; keep them as they are.

use crate::config::targets::Target;
use crate::ingest::types::RawPost;

/// Posts mentioning more accounts than this (and not clearly addressed to the
/// target) are dropped.
pub const MAX_UNADDRESSED_MENTIONS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Leads with a mention of somebody other than the target.
    AmbiguousLeadingMention,
    /// Mentions many accounts without being a reply or retweet of the target.
    TooManyMentions,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::AmbiguousLeadingMention => "ambiguous_leading_mention",
            RejectReason::TooManyMentions => "too_many_mentions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept { is_retweet: bool },
    Reject(RejectReason),
}

/// Text the filter and the rest of the pipeline look at.
/// Retweets are rebuilt from the original post so the text is never truncated.
pub fn effective_text(raw: &RawPost) -> (String, bool) {
    match &raw.retweeted {
        Some(rt) => (format!("RT @{} {}", rt.author_handle, rt.full_text), true),
        None => (raw.full_text.clone(), false),
    }
}

/// Classify an already computed effective text. Pure.
pub fn classify_text(
    text: &str,
    is_retweet: bool,
    in_reply_to: Option<&str>,
    account: &str,
) -> Decision {
    let addressed = format!("@{account}");
    let retweet_of_target = format!("RT @{account}");
    let replies_to_target = in_reply_to == Some(account);

    if text.starts_with('@') && !text.starts_with(&addressed) && !replies_to_target {
        return Decision::Reject(RejectReason::AmbiguousLeadingMention);
    }

    if !text.starts_with(&retweet_of_target)
        && !text.starts_with(&addressed)
        && !replies_to_target
        && text.matches('@').count() > MAX_UNADDRESSED_MENTIONS
    {
        return Decision::Reject(RejectReason::TooManyMentions);
    }

    Decision::Accept { is_retweet }
}

/// Decide whether a search result is about `target`.
pub fn classify(raw: &RawPost, target: &Target) -> Decision {
    let (text, is_retweet) = effective_text(raw);
    classify_text(&text, is_retweet, raw.in_reply_to.as_deref(), &target.account)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACC: &str = "pablocasado_";

    #[test]
    fn reply_field_rescues_leading_mention() {
        let d = classify_text("@someone_else @pablocasado_ vaya", false, Some(ACC), ACC);
        assert_eq!(d, Decision::Accept { is_retweet: false });
    }

    #[test]
    fn exactly_two_mentions_is_fine() {
        let d = classify_text("hola @a y @b", false, None, ACC);
        assert_eq!(d, Decision::Accept { is_retweet: false });
    }

    #[test]
    fn three_mentions_not_addressed_is_noise() {
        let d = classify_text("hola @a @b @c", false, None, ACC);
        assert_eq!(d, Decision::Reject(RejectReason::TooManyMentions));
    }

    #[test]
    fn many_mentions_allowed_when_addressed_to_target() {
        let d = classify_text("@pablocasado_ @a @b @c", false, None, ACC);
        assert_eq!(d, Decision::Accept { is_retweet: false });
        let d = classify_text("RT @pablocasado_ con @a @b @c", true, None, ACC);
        assert_eq!(d, Decision::Accept { is_retweet: true });
    }

    #[test]
    fn handle_prefix_match_is_textual() {
        // "@pablocasado_fan" starts with "@pablocasado_", so the prefix check accepts it.
        let d = classify_text("@pablocasado_fan hola", false, None, ACC);
        assert_eq!(d, Decision::Accept { is_retweet: false });
    }
}
