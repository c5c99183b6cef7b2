use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{InboundMessage, Rule};

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:https?://|www\.|\b(?:t|telegram)\.me/)\S+").expect("valid link regex")
});

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@[a-z0-9_]+").expect("valid mention regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ForwardingPaused,
    GlobalSleep,
    RuleSchedule,
    Duplicate,
    ServiceMessage,
    ForwardedOrigin,
    Reply,
    PureMedia,
    Link,
    Mention,
    Blacklisted(String),
    NotWhitelisted,
    EmptyBody,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ForwardingPaused => write!(f, "forwarding paused"),
            SkipReason::GlobalSleep => write!(f, "global sleep window"),
            SkipReason::RuleSchedule => write!(f, "rule schedule window"),
            SkipReason::Duplicate => write!(f, "duplicate"),
            SkipReason::ServiceMessage => write!(f, "service message"),
            SkipReason::ForwardedOrigin => write!(f, "forwarded origin"),
            SkipReason::Reply => write!(f, "reply"),
            SkipReason::PureMedia => write!(f, "media without text"),
            SkipReason::Link => write!(f, "contains link"),
            SkipReason::Mention => write!(f, "contains mention"),
            SkipReason::Blacklisted(term) => write!(f, "blacklisted term {:?}", term),
            SkipReason::NotWhitelisted => write!(f, "no whitelist term"),
            SkipReason::EmptyBody => write!(f, "nothing to send"),
        }
    }
}

/// Per-invocation facts every rule is checked against.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext {
    pub now: DateTime<Utc>,
    pub offset: FixedOffset,
    pub duplicate: bool,
}

pub fn contains_link(text: &str) -> bool {
    LINK_RE.is_match(text)
}

pub fn contains_mention(text: &str) -> bool {
    MENTION_RE.is_match(text)
}

/// Runs the rule's filters in order and returns the first one that fails.
///
/// The global checks (pause, sleep window) happen before fan-out, in the engine.
pub fn evaluate(rule: &Rule, msg: &InboundMessage, ctx: &FilterContext) -> Option<SkipReason> {
    if let Some(window) = &rule.schedule_window {
        if window.contains_instant(ctx.now, ctx.offset) {
            return Some(SkipReason::RuleSchedule);
        }
    }

    if ctx.duplicate {
        return Some(SkipReason::Duplicate);
    }

    if rule.block_service && msg.is_service {
        return Some(SkipReason::ServiceMessage);
    }
    if rule.block_forwarded && msg.is_forwarded {
        return Some(SkipReason::ForwardedOrigin);
    }
    if rule.block_replies && msg.is_reply {
        return Some(SkipReason::Reply);
    }

    if rule.block_media && msg.is_pure_media() {
        return Some(SkipReason::PureMedia);
    }

    let body = msg.body();
    if rule.block_links && contains_link(body) {
        return Some(SkipReason::Link);
    }
    if rule.block_mentions && contains_mention(body) {
        return Some(SkipReason::Mention);
    }

    let lowered = body.to_lowercase();
    if let Some(term) = rule
        .blacklist
        .iter()
        .find(|t| !t.is_empty() && lowered.contains(t.as_str()))
    {
        return Some(SkipReason::Blacklisted(term.clone()));
    }

    let whitelist: Vec<&String> = rule.whitelist.iter().filter(|t| !t.is_empty()).collect();
    if !whitelist.is_empty() && !whitelist.iter().any(|t| lowered.contains(t.as_str())) {
        return Some(SkipReason::NotWhitelisted);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, AttachmentKind};
    use chrono::{FixedOffset, TimeZone};
    use teloxide::types::{ChatId, MessageId};

    fn ctx_at(h: u32, m: u32) -> FilterContext {
        FilterContext {
            now: Utc.with_ymd_and_hms(2024, 5, 10, h, m, 0).unwrap(),
            offset: FixedOffset::east_opt(0).unwrap(),
            duplicate: false,
        }
    }

    fn text(body: &str) -> InboundMessage {
        let mut msg = InboundMessage::new(ChatId(-100111), MessageId(7));
        msg.text = Some(body.to_string());
        msg
    }

    fn rule() -> Rule {
        Rule::new("-100111", Some("-100222".into()), Default::default())
    }

    #[test]
    fn blacklist_wins_over_whitelist() {
        let mut r = rule();
        r.blacklist = vec!["spam".into()];
        r.whitelist = vec!["sale".into()];
        let verdict = evaluate(&r, &text("SALE with SPAM"), &ctx_at(12, 0));
        assert_eq!(verdict, Some(SkipReason::Blacklisted("spam".into())));
    }

    #[test]
    fn whitelist_is_case_insensitive() {
        let mut r = rule();
        r.whitelist = vec!["sale".into()];
        assert_eq!(evaluate(&r, &text("big SALE today"), &ctx_at(12, 0)), None);
        assert_eq!(
            evaluate(&r, &text("nothing here"), &ctx_at(12, 0)),
            Some(SkipReason::NotWhitelisted)
        );
    }

    #[test]
    fn rule_schedule_blocks_overnight() {
        let mut r = rule();
        r.schedule_window = Some("22:00-06:00".parse().unwrap());
        assert_eq!(
            evaluate(&r, &text("hi"), &ctx_at(23, 30)),
            Some(SkipReason::RuleSchedule)
        );
        assert_eq!(evaluate(&r, &text("hi"), &ctx_at(12, 0)), None);
    }

    #[test]
    fn duplicates_are_skipped_after_schedule() {
        let mut ctx = ctx_at(12, 0);
        ctx.duplicate = true;
        assert_eq!(evaluate(&rule(), &text("hi"), &ctx), Some(SkipReason::Duplicate));
    }

    #[test]
    fn origin_flags_only_apply_when_set() {
        let mut msg = text("hi");
        msg.is_forwarded = true;
        msg.is_reply = true;
        msg.is_service = true;
        assert_eq!(evaluate(&rule(), &msg, &ctx_at(12, 0)), None);

        let mut r = rule();
        r.block_replies = true;
        assert_eq!(evaluate(&r, &msg, &ctx_at(12, 0)), Some(SkipReason::Reply));
        r.block_forwarded = true;
        assert_eq!(evaluate(&r, &msg, &ctx_at(12, 0)), Some(SkipReason::ForwardedOrigin));
        r.block_service = true;
        assert_eq!(evaluate(&r, &msg, &ctx_at(12, 0)), Some(SkipReason::ServiceMessage));
    }

    #[test]
    fn media_with_caption_passes_media_block() {
        let mut r = rule();
        r.block_media = true;

        let mut msg = InboundMessage::new(ChatId(-100111), MessageId(8));
        msg.attachment = Some(Attachment {
            kind: AttachmentKind::Photo,
            file_id: None,
        });
        assert_eq!(evaluate(&r, &msg, &ctx_at(12, 0)), Some(SkipReason::PureMedia));

        msg.caption = Some("look".into());
        assert_eq!(evaluate(&r, &msg, &ctx_at(12, 0)), None);
    }

    #[test]
    fn links_and_mentions_are_detected_in_captions() {
        let mut r = rule();
        r.block_links = true;
        r.block_mentions = true;

        let mut msg = InboundMessage::new(ChatId(-100111), MessageId(9));
        msg.caption = Some("join T.ME/somewhere".into());
        assert_eq!(evaluate(&r, &msg, &ctx_at(12, 0)), Some(SkipReason::Link));

        msg.caption = Some("ask @Someone_1".into());
        assert_eq!(evaluate(&r, &msg, &ctx_at(12, 0)), Some(SkipReason::Mention));
    }

    #[test]
    fn link_regex_covers_common_forms() {
        assert!(contains_link("see https://example.com/x"));
        assert!(contains_link("WWW.example.com"));
        assert!(contains_link("telegram.me/chan"));
        assert!(!contains_link("plain words only"));
        assert!(!contains_mention("mail me at nobody"));
    }
}
