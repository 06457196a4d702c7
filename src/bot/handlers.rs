//! Update filtering and the entry point from Telegram into the link pipeline.

use crate::pipeline::{InboundMessage, LinkPipeline};
use crate::types::{Conversation, ConversationId};
use std::collections::HashSet;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{MessageEntityKind, MessageKind};
use tracing::{debug, info};

/// Chats the bot answers in
#[derive(Debug, Clone, Default)]
pub struct ChatFilter {
    allowed: HashSet<i64>,
}

impl ChatFilter {
    /// An empty set admits every chat
    #[must_use]
    pub const fn new(allowed: HashSet<i64>) -> Self {
        Self { allowed }
    }

    #[must_use]
    pub fn permits(&self, chat_id: i64) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&chat_id)
    }
}

/// Plain and business messages both go through the same handler
#[must_use]
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter(accepts)
                .endpoint(handle_message),
        )
        .branch(
            Update::filter_business_message()
                .filter(accepts)
                .endpoint(handle_message),
        )
}

fn accepts(msg: Message, filter: Arc<ChatFilter>) -> bool {
    let from_bot = msg.from.as_ref().is_some_and(|u| u.is_bot);
    if from_bot {
        return false;
    }
    if !filter.permits(msg.chat.id.0) {
        debug!(chat_id = msg.chat.id.0, "Ignoring message from chat outside allow-list");
        return false;
    }
    msg.text().or_else(|| msg.caption()).is_some()
}

async fn handle_message(msg: Message, pipeline: Arc<LinkPipeline>) -> ResponseResult<()> {
    let inbound = inbound_message(&msg);
    let links = pipeline.links(&inbound);
    if links.is_empty() {
        return respond(());
    }

    info!(
        chat_id = msg.chat.id.0,
        message_id = msg.id.0,
        links = links.len(),
        "Message with links"
    );

    // Resolution takes minutes; don't hold up the dispatcher's per-chat queue
    tokio::spawn(async move {
        if let Some(report) = pipeline.handle(inbound).await {
            debug!(
                messages = report.sent_messages.len(),
                notices = report.notices,
                send_failures = report.send_failures,
                "Message handled"
            );
        }
    });

    respond(())
}

/// What the pipeline needs from a Telegram message
#[must_use]
pub fn inbound_message(msg: &Message) -> InboundMessage {
    let conversation = Conversation {
        id: ConversationId(msg.chat.id.0),
        reply_to: Some(msg.id.0),
        identity: business_connection(msg),
    };
    let text = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    InboundMessage {
        conversation,
        text: text.to_string(),
        urls: entity_urls(msg),
    }
}

/// Set only on messages delivered through a business account connection
fn business_connection(msg: &Message) -> Option<String> {
    match &msg.kind {
        MessageKind::Common(common) => common
            .business_connection_id
            .as_ref()
            .map(|id| id.0.clone()),
        _ => None,
    }
}

/// URLs marked up by Telegram, in message order. `None` when the message has
/// no entities at all, so the caller falls back to scanning the text.
fn entity_urls(msg: &Message) -> Option<Vec<String>> {
    let entities = msg
        .parse_entities()
        .or_else(|| msg.parse_caption_entities())?;
    if entities.is_empty() {
        return None;
    }
    Some(
        entities
            .iter()
            .filter_map(|entity| match entity.kind() {
                MessageEntityKind::Url => Some(entity.text().to_string()),
                MessageEntityKind::TextLink { url } => Some(url.to_string()),
                _ => None,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::sender::business_id;
    use teloxide::types::BusinessConnectionId;

    fn message(extra: &str) -> Message {
        let json = format!(
            r#"{{
              "message_id": 31,
              "from": {{ "id": 250918540, "is_bot": false, "first_name": "Ann" }},
              "chat": {{ "id": 250918540, "first_name": "Ann", "type": "private" }},
              "date": 1568289890,
              "text": "see https://youtu.be/abc",
              "entities": [{{ "type": "url", "offset": 4, "length": 20 }}]
              {extra}
            }}"#
        );
        serde_json::from_str(&json).expect("valid message json")
    }

    #[test]
    fn test_business_message_sets_identity() {
        let msg = message(r#", "business_connection_id": "biz-42""#);
        let inbound = inbound_message(&msg);

        assert_eq!(inbound.conversation.id, ConversationId(250_918_540));
        assert_eq!(inbound.conversation.reply_to, Some(31));
        assert_eq!(inbound.conversation.identity.as_deref(), Some("biz-42"));
        assert_eq!(
            business_id(&inbound.conversation),
            Some(BusinessConnectionId("biz-42".to_string()))
        );
        assert_eq!(
            inbound.urls,
            Some(vec!["https://youtu.be/abc".to_string()])
        );
    }

    #[test]
    fn test_plain_message_has_no_identity() {
        let inbound = inbound_message(&message(""));
        assert!(inbound.conversation.identity.is_none());
        assert!(business_id(&inbound.conversation).is_none());
    }

    #[test]
    fn test_chat_filter() {
        let open = ChatFilter::default();
        assert!(open.permits(42));

        let closed = ChatFilter::new([1, -100].into_iter().collect());
        assert!(closed.permits(-100));
        assert!(!closed.permits(42));
    }
}
