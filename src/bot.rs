use teloxide::prelude::*;
use teloxide::types::{MessageKind, MessageOrigin, ParseMode};
use teloxide::utils::html;

use crate::engine::Engine;
use crate::models::{Attachment, AttachmentKind, InboundMessage, Rule};

pub async fn run_bot(bot: Bot, engine: Engine) {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_channel_post().endpoint(handle_channel_post))
        .branch(Update::filter_edited_message().endpoint(handle_edit))
        .branch(Update::filter_edited_channel_post().endpoint(handle_edit));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn attachment_of(msg: &Message) -> Option<Attachment> {
    let (kind, file_id) = if let Some(sizes) = msg.photo() {
        (AttachmentKind::Photo, sizes.last().map(|p| p.file.id.0.clone()))
    } else if let Some(v) = msg.video() {
        (AttachmentKind::Video, Some(v.file.id.0.clone()))
    } else if let Some(d) = msg.document() {
        (AttachmentKind::Document, Some(d.file.id.0.clone()))
    } else if let Some(a) = msg.audio() {
        (AttachmentKind::Audio, Some(a.file.id.0.clone()))
    } else if let Some(v) = msg.voice() {
        (AttachmentKind::Voice, Some(v.file.id.0.clone()))
    } else if let Some(a) = msg.animation() {
        (AttachmentKind::Animation, Some(a.file.id.0.clone()))
    } else if let Some(s) = msg.sticker() {
        (AttachmentKind::Sticker, Some(s.file.id.0.clone()))
    } else if let Some(n) = msg.video_note() {
        (AttachmentKind::VideoNote, Some(n.file.id.0.clone()))
    } else {
        return None;
    };
    Some(Attachment { kind, file_id })
}

/// Maps a Telegram message onto the engine's view of it.
pub fn inbound_from(msg: &Message, is_edit: bool) -> InboundMessage {
    let (is_service, protected_content) = match &msg.kind {
        MessageKind::Common(common) => (false, common.has_protected_content),
        _ => (true, false),
    };

    let origin_chat = match msg.forward_origin() {
        Some(MessageOrigin::Chat { sender_chat, .. }) => Some(sender_chat),
        Some(MessageOrigin::Channel { chat, .. }) => Some(chat),
        _ => None,
    };

    InboundMessage {
        chat_id: msg.chat.id,
        chat_handle: msg.chat.username().map(str::to_string),
        origin_chat_id: origin_chat.map(|c| c.id),
        origin_handle: origin_chat.and_then(|c| c.username()).map(str::to_string),
        message_id: msg.id,
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        attachment: attachment_of(msg),
        is_reply: msg.reply_to_message().is_some(),
        is_forwarded: msg.forward_origin().is_some(),
        is_service,
        is_edit,
        protected_content,
        controls: msg.reply_markup().cloned(),
    }
}

fn relay(engine: &Engine, msg: &Message, is_edit: bool) {
    let inbound = inbound_from(msg, is_edit);
    let fan_out = engine.handle(inbound);

    if let Some(reason) = &fan_out.halted {
        tracing::debug!(reason = %reason, "Message not relayed");
    }
    fan_out.detach(msg.chat.id.0, msg.id.0);
}

#[tracing::instrument(skip(bot, engine, msg), fields(chat_id = %msg.chat.id, message_id = msg.id.0))]
async fn handle_message(bot: Bot, msg: Message, engine: Engine) -> ResponseResult<()> {
    if let Some(text) = msg.text() {
        if text.starts_with('/') && is_admin(&engine, &msg) {
            let mut parts = text.split_whitespace();
            let cmd = parts.next().unwrap_or("");
            let cmd = cmd.split('@').next().unwrap_or(cmd);
            let args: Vec<&str> = parts.collect();
            if handle_admin_command(&bot, &msg, &engine, cmd, &args).await? {
                return Ok(());
            }
        }
    }

    relay(&engine, &msg, false);
    Ok(())
}

#[tracing::instrument(skip(msg, engine), fields(chat_id = %msg.chat.id, message_id = msg.id.0))]
async fn handle_channel_post(msg: Message, engine: Engine) -> ResponseResult<()> {
    relay(&engine, &msg, false);
    Ok(())
}

#[tracing::instrument(skip(msg, engine), fields(chat_id = %msg.chat.id, message_id = msg.id.0))]
async fn handle_edit(msg: Message, engine: Engine) -> ResponseResult<()> {
    relay(&engine, &msg, true);
    Ok(())
}

fn is_admin(engine: &Engine, msg: &Message) -> bool {
    let sender = msg.from.as_ref().map(|u| u.id.0 as i64);
    msg.chat.is_private() && sender.is_some() && sender == engine.snapshot().global.admin_id
}

/// Returns false for commands this bot does not own, so they get relayed.
async fn handle_admin_command(
    bot: &Bot,
    msg: &Message,
    engine: &Engine,
    cmd: &str,
    args: &[&str],
) -> ResponseResult<bool> {
    let reply = match cmd {
        "/add" => add_rule(engine, args).await,
        "/delete" => delete_rule(engine, args).await,
        "/status" => status_text(engine).await,
        "/pause" => set_forwarding(engine, false)
            .await
            .map(|_| "⏸ Forwarding paused.".to_string()),
        "/resume" => set_forwarding(engine, true)
            .await
            .map(|_| "▶️ Forwarding resumed.".to_string()),
        "/reload" => engine
            .refresh()
            .await
            .map(|_| format!("🔄 Reloaded {} active rules.", engine.snapshot().rules.len())),
        _ => return Ok(false),
    };

    let text = match reply {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(command = cmd, error = %e, "Admin command failed");
            format!("❌ {}", html::escape(&e.to_string()))
        }
    };
    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(true)
}

async fn set_forwarding(engine: &Engine, active: bool) -> anyhow::Result<()> {
    let store = engine.store();
    let mut global = store.get_global_config().await?;
    global.forwarding_active = active;
    store.save_global_config(&global).await?;
    tracing::info!(active, "Forwarding state changed");
    engine.refresh().await
}

/// `/add <sources> <destination>`; the mode comes from the global default.
pub async fn add_rule(engine: &Engine, args: &[&str]) -> anyhow::Result<String> {
    let [source, destination] = args else {
        anyhow::bail!("usage: /add <source[,source...]> <destination>");
    };
    let store = engine.store();
    let mode = store.get_global_config().await?.default_mode;
    let rule = store
        .create_rule(&Rule::new(*source, Some(destination.to_string()), mode))
        .await?;
    engine.refresh().await?;
    Ok(format!(
        "✅ Rule #{} created: {} → {} [{}]",
        rule.id,
        html::escape(&rule.source_spec),
        html::escape(destination),
        rule.mode.as_str()
    ))
}

/// `/delete <id>`; the rule stops matching as soon as this returns.
pub async fn delete_rule(engine: &Engine, args: &[&str]) -> anyhow::Result<String> {
    let [id] = args else {
        anyhow::bail!("usage: /delete <rule id>");
    };
    let id: i64 = id.trim_start_matches('#').parse()?;
    let store = engine.store();
    if store.get_rule(id).await?.is_none() {
        anyhow::bail!("rule #{} does not exist", id);
    }
    store.delete_rule(id).await?;
    engine.refresh().await?;
    Ok(format!("🗑 Rule #{} deleted.", id))
}

async fn status_text(engine: &Engine) -> anyhow::Result<String> {
    let rules = engine.store().list_rules().await?;
    let global = engine.snapshot().global.clone();

    let mut out = format!(
        "<b>Forwarding:</b> {}\n<b>Rules:</b> {} ({} active)\n<b>Dedup cache:</b> {} entries\n",
        if global.forwarding_active { "on" } else { "paused" },
        rules.len(),
        rules.iter().filter(|r| r.active).count(),
        engine.dedup().len(),
    );
    if global.schedule_active {
        if let Some(window) = global.sleep_window {
            out.push_str(&format!("<b>Sleep window:</b> {}\n", window));
        }
    }
    if !global.source_spec.trim().is_empty() {
        out.push_str(&format!(
            "<b>Fallback:</b> {} → {}\n",
            html::escape(&global.source_spec),
            html::escape(global.destination.as_deref().unwrap_or("⚠️ unset")),
        ));
    }

    for rule in &rules {
        let last = rule
            .last_triggered_at
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        out.push_str(&format!(
            "\n#{} {} → {} [{}{}] sent {} (last {})",
            rule.id,
            html::escape(&rule.source_spec),
            html::escape(rule.destination.as_deref().unwrap_or("⚠️ unset")),
            rule.mode.as_str(),
            if rule.active { "" } else { ", off" },
            rule.forwarded_count,
            last,
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn channel_text_post_maps_handle_and_text() {
        let msg = message(json!({
            "message_id": 10,
            "date": 1_700_000_000,
            "chat": { "id": -100111, "type": "channel", "title": "News", "username": "news" },
            "text": "hello"
        }));

        let inbound = inbound_from(&msg, false);
        assert_eq!(inbound.chat_id, ChatId(-100111));
        assert_eq!(inbound.chat_handle.as_deref(), Some("news"));
        assert_eq!(inbound.message_id.0, 10);
        assert_eq!(inbound.body(), "hello");
        assert!(inbound.attachment.is_none());
        assert!(!inbound.is_service);
        assert!(!inbound.is_reply);
    }

    #[test]
    fn photo_uses_largest_size_and_caption() {
        let msg = message(json!({
            "message_id": 11,
            "date": 1_700_000_000,
            "chat": { "id": -100111, "type": "channel", "title": "News" },
            "photo": [
                { "file_id": "small", "file_unique_id": "s", "file_size": 10, "width": 90, "height": 90 },
                { "file_id": "large", "file_unique_id": "l", "file_size": 99, "width": 800, "height": 800 }
            ],
            "caption": "look"
        }));

        let inbound = inbound_from(&msg, true);
        let attachment = inbound.attachment.clone().unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Photo);
        assert_eq!(attachment.file_id.as_deref(), Some("large"));
        assert_eq!(inbound.body(), "look");
        assert!(!inbound.is_pure_media());
        assert!(inbound.is_edit);
    }

    #[test]
    fn channel_forward_exposes_origin_chat() {
        let msg = message(json!({
            "message_id": 12,
            "date": 1_700_000_000,
            "chat": { "id": -100999, "type": "channel", "title": "Mirror" },
            "forward_origin": {
                "type": "channel",
                "date": 1_699_999_000,
                "chat": { "id": -100111, "type": "channel", "title": "News", "username": "news" },
                "message_id": 40
            },
            "text": "reposted"
        }));

        let inbound = inbound_from(&msg, false);
        assert!(inbound.is_forwarded);
        assert_eq!(inbound.origin_chat_id, Some(ChatId(-100111)));
        assert_eq!(inbound.origin_handle.as_deref(), Some("news"));
    }
}
