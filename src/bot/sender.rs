//! Telegram side of delivery: turns delivery groups into Bot API calls.

use crate::config::TELEGRAM_MESSAGE_LIMIT;
use crate::pipeline::{ActionHint, MediaSender, SendError};
use crate::types::{Conversation, DeliveryGroup, MediaAsset, MediaKind};
use crate::utils::{caption_html, split_long_message};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{
    BusinessConnectionId, ChatAction, InputFile, InputMedia, InputMediaAudio, InputMediaPhoto,
    InputMediaVideo, LinkPreviewOptions, MessageId, ParseMode, ReplyParameters,
};
use teloxide::RequestError;
use tracing::{debug, info, warn};

/// How many times a `RetryAfter` answer is waited out before giving up
const RETRY_AFTER_MAX_RETRIES: usize = 4;

/// [`MediaSender`] backed by the Telegram Bot API
#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
    collapse_at_chars: usize,
}

impl std::fmt::Debug for TelegramSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSender")
            .field("collapse_at_chars", &self.collapse_at_chars)
            .finish_non_exhaustive()
    }
}

impl TelegramSender {
    /// Text longer than `collapse_at_chars` is sent as an expandable quote
    #[must_use]
    pub const fn new(bot: Bot, collapse_at_chars: usize) -> Self {
        Self {
            bot,
            collapse_at_chars,
        }
    }

    async fn send_text(
        &self,
        conversation: &Conversation,
        text: &str,
    ) -> Result<Vec<i32>, SendError> {
        let chat_id = ChatId(conversation.id.0);
        let mut ids = Vec::new();
        for part in split_long_message(text, TELEGRAM_MESSAGE_LIMIT) {
            let html = caption_html(&part, self.collapse_at_chars);
            let message = with_retry_after(conversation, "send text", || {
                let mut req = self
                    .bot
                    .send_message(chat_id, html.clone())
                    .parse_mode(ParseMode::Html)
                    .link_preview_options(no_preview());
                if let Some(rp) = reply_params(conversation) {
                    req = req.reply_parameters(rp);
                }
                if let Some(id) = business_id(conversation) {
                    req = req.business_connection_id(id);
                }
                async move { req.await }
            })
            .await?;
            ids.push(message.id.0);
        }
        Ok(ids)
    }

    async fn send_single(
        &self,
        conversation: &Conversation,
        asset: &MediaAsset,
        caption: Option<&str>,
    ) -> Result<i32, SendError> {
        let chat_id = ChatId(conversation.id.0);
        let caption = caption.map(|c| caption_html(c, self.collapse_at_chars));
        let reply = reply_params(conversation);
        let business = business_id(conversation);

        let message = match asset.kind {
            MediaKind::Image => {
                with_retry_after(conversation, "send photo", || {
                    let mut req = self.bot.send_photo(chat_id, input_file(asset));
                    if let Some(caption) = &caption {
                        req = req.caption(caption.clone()).parse_mode(ParseMode::Html);
                    }
                    if let Some(rp) = &reply {
                        req = req.reply_parameters(rp.clone());
                    }
                    if let Some(id) = &business {
                        req = req.business_connection_id(id.clone());
                    }
                    async move { req.await }
                })
                .await?
            }
            MediaKind::Video => {
                with_retry_after(conversation, "send video", || {
                    let mut req = self
                        .bot
                        .send_video(chat_id, input_file(asset))
                        .supports_streaming(true);
                    if let Some(w) = asset.width.and_then(|w| w.try_into().ok()) {
                        req = req.width(w);
                    }
                    if let Some(h) = asset.height.and_then(|h| h.try_into().ok()) {
                        req = req.height(h);
                    }
                    if let Some(secs) = whole_seconds(asset).and_then(|s| s.try_into().ok()) {
                        req = req.duration(secs);
                    }
                    if let Some(caption) = &caption {
                        req = req.caption(caption.clone()).parse_mode(ParseMode::Html);
                    }
                    if let Some(rp) = &reply {
                        req = req.reply_parameters(rp.clone());
                    }
                    if let Some(id) = &business {
                        req = req.business_connection_id(id.clone());
                    }
                    async move { req.await }
                })
                .await?
            }
            MediaKind::Audio => {
                with_retry_after(conversation, "send audio", || {
                    let mut req = self.bot.send_audio(chat_id, input_file(asset));
                    if let Some(secs) = whole_seconds(asset).and_then(|s| s.try_into().ok()) {
                        req = req.duration(secs);
                    }
                    if let Some(caption) = &caption {
                        req = req.caption(caption.clone()).parse_mode(ParseMode::Html);
                    }
                    if let Some(rp) = &reply {
                        req = req.reply_parameters(rp.clone());
                    }
                    if let Some(id) = &business {
                        req = req.business_connection_id(id.clone());
                    }
                    async move { req.await }
                })
                .await?
            }
            MediaKind::Text => {
                let body = asset.text().unwrap_or_default();
                let ids = self.send_text(conversation, &body).await?;
                return ids
                    .first()
                    .copied()
                    .ok_or_else(|| SendError::Rejected("empty text asset".to_string()));
            }
        };
        Ok(message.id.0)
    }

    async fn send_album(
        &self,
        conversation: &Conversation,
        assets: &[MediaAsset],
        caption: Option<&str>,
    ) -> Result<Vec<i32>, SendError> {
        let chat_id = ChatId(conversation.id.0);
        let caption = caption.map(|c| caption_html(c, self.collapse_at_chars));
        let reply = reply_params(conversation);
        let business = business_id(conversation);

        let messages = with_retry_after(conversation, "send media group", || {
            let media: Vec<InputMedia> = assets
                .iter()
                .enumerate()
                .filter_map(|(i, asset)| {
                    let caption = if i == 0 { caption.clone() } else { None };
                    input_media(asset, caption)
                })
                .collect();
            let mut req = self.bot.send_media_group(chat_id, media);
            if let Some(rp) = &reply {
                req = req.reply_parameters(rp.clone());
            }
            if let Some(id) = &business {
                req = req.business_connection_id(id.clone());
            }
            async move { req.await }
        })
        .await?;
        Ok(messages.iter().map(|m| m.id.0).collect())
    }
}

#[async_trait]
impl MediaSender for TelegramSender {
    async fn send_group(
        &self,
        conversation: &Conversation,
        group: &DeliveryGroup,
    ) -> Result<Vec<i32>, SendError> {
        debug!(
            chat_id = %conversation.id,
            position = group.position,
            assets = group.assets.len(),
            bytes = group.total_bytes(),
            "Sending group"
        );
        let caption = group.caption.as_deref();
        let ids = match group.assets.as_slice() {
            [] => match caption {
                Some(text) => self.send_text(conversation, text).await?,
                None => Vec::new(),
            },
            [asset] => vec![self.send_single(conversation, asset, caption).await?],
            assets => self.send_album(conversation, assets, caption).await?,
        };
        info!(
            chat_id = %conversation.id,
            position = group.position,
            messages = ids.len(),
            "Group delivered"
        );
        Ok(ids)
    }

    async fn send_notice(&self, conversation: &Conversation, text: &str) -> Result<i32, SendError> {
        let chat_id = ChatId(conversation.id.0);
        let message = with_retry_after(conversation, "send notice", || {
            let mut req = self
                .bot
                .send_message(chat_id, text.to_string())
                .link_preview_options(no_preview());
            if let Some(rp) = reply_params(conversation) {
                req = req.reply_parameters(rp);
            }
            if let Some(id) = business_id(conversation) {
                req = req.business_connection_id(id);
            }
            async move { req.await }
        })
        .await?;
        Ok(message.id.0)
    }

    async fn send_action(
        &self,
        conversation: &Conversation,
        action: ActionHint,
    ) -> Result<(), SendError> {
        let action = match action {
            ActionHint::Typing => ChatAction::Typing,
            ActionHint::UploadingVideo => ChatAction::UploadVideo,
            ActionHint::UploadingAudio => ChatAction::UploadVoice,
        };
        let mut req = self
            .bot
            .send_chat_action(ChatId(conversation.id.0), action);
        if let Some(id) = business_id(conversation) {
            req = req.business_connection_id(id);
        }
        req.await.map(|_| ()).map_err(send_error)
    }
}

/// Run a request, waiting out Telegram's `RetryAfter` answers.
///
/// Any other error is returned as is; a sent message is never re-sent.
async fn with_retry_after<T, F, Fut>(
    conversation: &Conversation,
    operation: &'static str,
    mut request: F,
) -> Result<T, SendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut retries = 0usize;

    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(wait) = retry_after(&err) else {
                    warn!(
                        chat_id = %conversation.id,
                        operation,
                        error = %err,
                        "Telegram request failed"
                    );
                    return Err(send_error(err));
                };

                if retries >= RETRY_AFTER_MAX_RETRIES {
                    warn!(
                        chat_id = %conversation.id,
                        operation,
                        retries,
                        retry_after_secs = wait.as_secs(),
                        "Telegram rate limit persisted after retries"
                    );
                    return Err(send_error(err));
                }

                retries += 1;
                warn!(
                    chat_id = %conversation.id,
                    operation,
                    retries,
                    retry_after_secs = wait.as_secs(),
                    "Telegram rate limited, waiting before retry"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}

fn retry_after(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

fn send_error(error: RequestError) -> SendError {
    match error {
        RequestError::Network(e) => SendError::Network(e.to_string()),
        RequestError::Io(e) => SendError::Network(e.to_string()),
        other => SendError::Rejected(other.to_string()),
    }
}

fn reply_params(conversation: &Conversation) -> Option<ReplyParameters> {
    conversation
        .reply_to
        .map(|id| ReplyParameters::new(MessageId(id)).allow_sending_without_reply())
}

pub(super) fn business_id(conversation: &Conversation) -> Option<BusinessConnectionId> {
    conversation.identity.clone().map(BusinessConnectionId)
}

const fn no_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

fn input_file(asset: &MediaAsset) -> InputFile {
    InputFile::memory(asset.payload.to_vec()).file_name(asset.file_name.clone())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_seconds(asset: &MediaAsset) -> Option<u32> {
    asset
        .duration_secs
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|d| d.round().min(f64::from(u32::MAX)) as u32)
}

/// Album member for an asset; text never rides in an album
fn input_media(asset: &MediaAsset, caption: Option<String>) -> Option<InputMedia> {
    let file = input_file(asset);
    let media = match asset.kind {
        MediaKind::Image => {
            let mut photo = InputMediaPhoto::new(file);
            if let Some(caption) = caption {
                photo = photo.caption(caption).parse_mode(ParseMode::Html);
            }
            InputMedia::Photo(photo)
        }
        MediaKind::Video => {
            let mut video = InputMediaVideo::new(file).supports_streaming(true);
            if let Some(w) = asset.width.and_then(|w| w.try_into().ok()) {
                video = video.width(w);
            }
            if let Some(h) = asset.height.and_then(|h| h.try_into().ok()) {
                video = video.height(h);
            }
            if let Some(secs) = whole_seconds(asset).and_then(|s| s.try_into().ok()) {
                video = video.duration(secs);
            }
            if let Some(caption) = caption {
                video = video.caption(caption).parse_mode(ParseMode::Html);
            }
            InputMedia::Video(video)
        }
        MediaKind::Audio => {
            let mut audio = InputMediaAudio::new(file);
            if let Some(secs) = whole_seconds(asset).and_then(|s| s.try_into().ok()) {
                audio = audio.duration(secs);
            }
            if let Some(caption) = caption {
                audio = audio.caption(caption).parse_mode(ParseMode::Html);
            }
            InputMedia::Audio(audio)
        }
        MediaKind::Text => return None,
    };
    Some(media)
}
