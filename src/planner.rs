use teloxide::types::{ChatId, InlineKeyboardMarkup, MessageId, Recipient};

use crate::error::{DispatchError, TransportError};
use crate::filters::SkipReason;
use crate::models::{Attachment, ForwardMode, InboundMessage, Rule};
use crate::transform::Transformed;
use crate::transport::Transport;

/// The single transport call chosen for a rule/message pair.
#[derive(Debug, Clone)]
pub enum Plan {
    ForwardVerbatim {
        destination: Recipient,
        origin: ChatId,
        message_id: MessageId,
    },
    SendText {
        destination: Recipient,
        text: String,
        suppress_preview: bool,
        silent: bool,
    },
    CopyWithCaption {
        destination: Recipient,
        origin: ChatId,
        message_id: MessageId,
        caption: String,
        suppress_preview: bool,
        silent: bool,
        controls: Option<InlineKeyboardMarkup>,
    },
    SendMedia {
        destination: Recipient,
        attachment: Attachment,
        caption: String,
    },
}

#[derive(Debug)]
pub enum PlanError {
    Skip(SkipReason),
    Config(DispatchError),
}

impl From<DispatchError> for PlanError {
    fn from(e: DispatchError) -> Self {
        PlanError::Config(e)
    }
}

impl Plan {
    pub fn name(&self) -> &'static str {
        match self {
            Plan::ForwardVerbatim { .. } => "forward",
            Plan::SendText { .. } => "send_text",
            Plan::CopyWithCaption { .. } => "copy",
            Plan::SendMedia { .. } => "send_media",
        }
    }

    pub fn destination(&self) -> &Recipient {
        match self {
            Plan::ForwardVerbatim { destination, .. }
            | Plan::SendText { destination, .. }
            | Plan::CopyWithCaption { destination, .. }
            | Plan::SendMedia { destination, .. } => destination,
        }
    }

    pub async fn execute(self, transport: &dyn Transport) -> Result<(), TransportError> {
        match self {
            Plan::ForwardVerbatim {
                destination,
                origin,
                message_id,
            } => transport.forward_verbatim(&destination, origin, message_id).await,
            Plan::SendText {
                destination,
                text,
                suppress_preview,
                silent,
            } => transport.send_text(&destination, &text, suppress_preview, silent).await,
            Plan::CopyWithCaption {
                destination,
                origin,
                message_id,
                caption,
                suppress_preview,
                silent,
                controls,
            } => {
                transport
                    .copy_with_caption(
                        &destination,
                        origin,
                        message_id,
                        &caption,
                        suppress_preview,
                        silent,
                        controls,
                    )
                    .await
            }
            Plan::SendMedia {
                destination,
                attachment,
                caption,
            } => transport.send_media(&destination, &attachment, &caption).await,
        }
    }
}

/// `-100123` becomes a chat id, `@name` a channel username.
pub fn parse_destination(rule: &Rule) -> Result<Recipient, DispatchError> {
    let raw = rule
        .destination
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| DispatchError::MissingDestination {
            rule_id: rule.id,
            source_spec: rule.source_spec.clone(),
        })?;

    if let Ok(id) = raw.parse::<i64>() {
        return Ok(Recipient::Id(ChatId(id)));
    }
    if raw.len() > 1 && raw.starts_with('@') {
        return Ok(Recipient::ChannelUsername(raw.to_string()));
    }
    Err(DispatchError::InvalidDestination {
        rule_id: rule.id,
        destination: raw.to_string(),
    })
}

pub fn plan(rule: &Rule, msg: &InboundMessage, transformed: Transformed) -> Result<Plan, PlanError> {
    let destination = parse_destination(rule)?;

    // Protected chats refuse forwardMessage and copyMessage alike.
    if rule.mode == ForwardMode::Forward
        && !transformed.modified
        && !rule.forces_reconstruction()
        && !msg.protected_content
    {
        return Ok(Plan::ForwardVerbatim {
            destination,
            origin: msg.chat_id,
            message_id: msg.message_id,
        });
    }

    let Some(attachment) = &msg.attachment else {
        if transformed.body.trim().is_empty() {
            return Err(PlanError::Skip(SkipReason::EmptyBody));
        }
        return Ok(Plan::SendText {
            destination,
            text: transformed.body,
            suppress_preview: rule.suppress_link_preview,
            silent: rule.silent,
        });
    };

    let caption = if rule.remove_caption {
        String::new()
    } else {
        transformed.body
    };

    if msg.protected_content && attachment.file_id.is_some() {
        return Ok(Plan::SendMedia {
            destination,
            attachment: attachment.clone(),
            caption,
        });
    }

    Ok(Plan::CopyWithCaption {
        destination,
        origin: msg.chat_id,
        message_id: msg.message_id,
        caption,
        suppress_preview: rule.suppress_link_preview,
        silent: rule.silent,
        controls: if rule.remove_buttons {
            None
        } else {
            msg.controls.clone()
        },
    })
}
