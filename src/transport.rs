use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InlineKeyboardMarkup, InputFile, LinkPreviewOptions, MessageId, Recipient,
};

use crate::error::TransportError;
use crate::models::{Attachment, AttachmentKind};

/// Outbound primitives the engine dispatches through.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn forward_verbatim(
        &self,
        destination: &Recipient,
        origin: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError>;

    #[allow(clippy::too_many_arguments)]
    async fn copy_with_caption(
        &self,
        destination: &Recipient,
        origin: ChatId,
        message_id: MessageId,
        caption: &str,
        suppress_preview: bool,
        silent: bool,
        controls: Option<InlineKeyboardMarkup>,
    ) -> Result<(), TransportError>;

    async fn send_text(
        &self,
        destination: &Recipient,
        text: &str,
        suppress_preview: bool,
        silent: bool,
    ) -> Result<(), TransportError>;

    async fn send_media(
        &self,
        destination: &Recipient,
        attachment: &Attachment,
        caption: &str,
    ) -> Result<(), TransportError>;

    async fn notify_admin(&self, admin_id: ChatId, text: &str) -> Result<(), TransportError>;
}

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn no_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn forward_verbatim(
        &self,
        destination: &Recipient,
        origin: ChatId,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        self.bot
            .forward_message(destination.clone(), origin, message_id)
            .await?;
        Ok(())
    }

    async fn copy_with_caption(
        &self,
        destination: &Recipient,
        origin: ChatId,
        message_id: MessageId,
        caption: &str,
        suppress_preview: bool,
        silent: bool,
        controls: Option<InlineKeyboardMarkup>,
    ) -> Result<(), TransportError> {
        // copyMessage has no link preview switch; previews only exist on text messages.
        if suppress_preview {
            tracing::trace!("Link preview suppression does not apply to copied media");
        }

        let mut request = self
            .bot
            .copy_message(destination.clone(), origin, message_id)
            .caption(caption)
            .disable_notification(silent);
        if let Some(markup) = controls {
            request = request.reply_markup(markup);
        }
        request.await?;
        Ok(())
    }

    async fn send_text(
        &self,
        destination: &Recipient,
        text: &str,
        suppress_preview: bool,
        silent: bool,
    ) -> Result<(), TransportError> {
        let mut request = self
            .bot
            .send_message(destination.clone(), text)
            .disable_notification(silent);
        if suppress_preview {
            request = request.link_preview_options(no_preview());
        }
        request.await?;
        Ok(())
    }

    async fn send_media(
        &self,
        destination: &Recipient,
        attachment: &Attachment,
        caption: &str,
    ) -> Result<(), TransportError> {
        let file_id = attachment
            .file_id
            .clone()
            .ok_or_else(|| TransportError::Rejected("attachment has no file reference".into()))?;
        let file = InputFile::file_id(FileId(file_id));
        let to = destination.clone();

        match attachment.kind {
            AttachmentKind::Photo => {
                self.bot.send_photo(to, file).caption(caption).await?;
            }
            AttachmentKind::Video => {
                self.bot.send_video(to, file).caption(caption).await?;
            }
            AttachmentKind::Document => {
                self.bot.send_document(to, file).caption(caption).await?;
            }
            AttachmentKind::Audio => {
                self.bot.send_audio(to, file).caption(caption).await?;
            }
            AttachmentKind::Voice => {
                self.bot.send_voice(to, file).caption(caption).await?;
            }
            AttachmentKind::Animation => {
                self.bot.send_animation(to, file).caption(caption).await?;
            }
            // Neither carries a caption.
            AttachmentKind::Sticker => {
                self.bot.send_sticker(to, file).await?;
            }
            AttachmentKind::VideoNote => {
                self.bot.send_video_note(to, file).await?;
            }
        }
        Ok(())
    }

    async fn notify_admin(&self, admin_id: ChatId, text: &str) -> Result<(), TransportError> {
        self.bot.send_message(admin_id, text).await?;
        Ok(())
    }
}
