use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teloxide::types::{ChatId, InlineKeyboardMarkup, MessageId};

use crate::schedule::TimeWindow;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// Keep the original envelope ("Forwarded from ...").
    #[default]
    Forward,
    /// Rebuild the message so its content can be changed.
    Copy,
}

impl ForwardMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardMode::Forward => "forward",
            ForwardMode::Copy => "copy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Some(ForwardMode::Forward),
            "copy" => Some(ForwardMode::Copy),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub find: String,
    pub replace: String,
}

impl Replacement {
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Rule {
    pub id: i64,
    pub source_spec: String, // Comma-separated ids and @handles
    pub destination: Option<String>,
    pub active: bool,
    pub mode: ForwardMode,
    pub delay_seconds: u32,

    pub block_links: bool,
    pub block_mentions: bool,
    pub block_media: bool,
    pub block_forwarded: bool,
    pub block_replies: bool,
    pub block_service: bool,

    pub remove_buttons: bool,
    pub remove_caption: bool,
    pub silent: bool,
    pub suppress_link_preview: bool,

    pub blacklist: Vec<String>,
    pub whitelist: Vec<String>,
    pub replacements: Vec<Replacement>,
    pub prefix: String,
    pub suffix: String,
    pub schedule_window: Option<TimeWindow>,

    pub forwarded_count: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl Rule {
    /// A fresh rule with creation defaults. The id is assigned by the store.
    pub fn new(source_spec: impl Into<String>, destination: Option<String>, mode: ForwardMode) -> Self {
        Self {
            source_spec: source_spec.into(),
            destination,
            active: true,
            mode,
            ..Default::default()
        }
    }

    /// Any presentation flag means the message cannot go out verbatim.
    pub fn forces_reconstruction(&self) -> bool {
        self.remove_buttons || self.remove_caption || self.silent || self.suppress_link_preview
    }

    /// Lowercases list terms and drops empty ones.
    pub fn normalized(mut self) -> Self {
        self.blacklist = normalize_terms(self.blacklist);
        self.whitelist = normalize_terms(self.whitelist);
        self
    }
}

fn normalize_terms(terms: Vec<String>) -> Vec<String> {
    terms
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// How the global header/footer combine with a rule's prefix/suffix.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HeaderLayering {
    /// Global text only when the rule has none of its own.
    #[default]
    Fallback,
    /// Global text always, outside the rule's own text.
    Stacked,
}

impl HeaderLayering {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderLayering::Fallback => "fallback",
            HeaderLayering::Stacked => "stacked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fallback" => Some(HeaderLayering::Fallback),
            "stacked" => Some(HeaderLayering::Stacked),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GlobalConfig {
    pub admin_id: Option<i64>,
    pub global_header: String,
    pub global_footer: String,
    pub header_layering: HeaderLayering,
    pub sleep_window: Option<TimeWindow>,
    pub schedule_active: bool,
    pub forwarding_active: bool,
    pub dedup_enabled: bool,
    /// Mode for new rules and for the fallback route.
    pub default_mode: ForwardMode,

    // Fallback route, used when no rule matches a message.
    pub source_spec: String,
    pub destination: Option<String>,
    pub delay_seconds: u32,
    pub block_links: bool,
    pub block_mentions: bool,
    /// Also used by rules that have no replacements of their own.
    pub replacements: Vec<Replacement>,
    pub blacklist: Vec<String>,
    pub whitelist: Vec<String>,
}

/// Id carried by the rule built from the global fallback route.
pub const FALLBACK_RULE_ID: i64 = 0;

impl GlobalConfig {
    /// The fallback route as a rule, or `None` when no global source is set.
    ///
    /// It carries no prefix or suffix of its own and is never persisted.
    pub fn fallback_rule(&self) -> Option<Rule> {
        if self.source_spec.trim().is_empty() {
            return None;
        }
        let rule = Rule {
            id: FALLBACK_RULE_ID,
            delay_seconds: self.delay_seconds,
            block_links: self.block_links,
            block_mentions: self.block_mentions,
            replacements: self.replacements.clone(),
            blacklist: self.blacklist.clone(),
            whitelist: self.whitelist.clone(),
            ..Rule::new(self.source_spec.clone(), self.destination.clone(), self.default_mode)
        };
        Some(rule.normalized())
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            admin_id: None,
            global_header: String::new(),
            global_footer: String::new(),
            header_layering: HeaderLayering::Fallback,
            sleep_window: None,
            schedule_active: false,
            forwarding_active: true,
            dedup_enabled: true,
            default_mode: ForwardMode::Forward,
            source_spec: String::new(),
            destination: None,
            delay_seconds: 0,
            block_links: false,
            block_mentions: false,
            replacements: Vec::new(),
            blacklist: Vec::new(),
            whitelist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Animation,
    Sticker,
    VideoNote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub file_id: Option<String>,
}

/// An inbound message or channel post, as seen by the engine.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub chat_handle: Option<String>, // Without the leading '@'
    /// Chat a forwarded message originally came from, when Telegram exposes it.
    pub origin_chat_id: Option<ChatId>,
    pub origin_handle: Option<String>,
    pub message_id: MessageId,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub attachment: Option<Attachment>,
    pub is_reply: bool,
    pub is_forwarded: bool,
    pub is_service: bool,
    pub is_edit: bool,
    pub protected_content: bool,
    pub controls: Option<InlineKeyboardMarkup>,
}

impl InboundMessage {
    pub fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            chat_handle: None,
            origin_chat_id: None,
            origin_handle: None,
            message_id,
            text: None,
            caption: None,
            attachment: None,
            is_reply: false,
            is_forwarded: false,
            is_service: false,
            is_edit: false,
            protected_content: false,
            controls: None,
        }
    }

    /// Text, or the caption for media, or empty.
    pub fn body(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or("")
    }

    pub fn is_pure_media(&self) -> bool {
        self.attachment.is_some() && self.body().trim().is_empty()
    }

    pub fn dedup_key(&self) -> (i64, i32) {
        (self.chat_id.0, self.message_id.0)
    }
}
