//! Ordered delivery of resolved links to one conversation.

use super::packager::Packed;
use super::reorder::ReorderBuffer;
use crate::types::{Conversation, DeliveryGroup, FailureKind};
use async_trait::async_trait;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Idle per-conversation locks are forgotten after this long
const LOCK_TTL: Duration = Duration::from_secs(3600);
const LOCK_CAPACITY: u64 = 10_000;

/// Outbound send failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// The platform refused the request
    #[error("send rejected: {0}")]
    Rejected(String),
    /// The request never got an answer
    #[error("network error: {0}")]
    Network(String),
}

/// "Working on it" indicator shown while links resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionHint {
    Typing,
    UploadingVideo,
    UploadingAudio,
}

/// Messaging platform side of delivery
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSender: Send + Sync {
    /// Send one group as a single outbound unit; returns the created message ids
    async fn send_group(
        &self,
        conversation: &Conversation,
        group: &DeliveryGroup,
    ) -> Result<Vec<i32>, SendError>;

    /// Send a short plain-text notice
    async fn send_notice(&self, conversation: &Conversation, text: &str)
        -> Result<i32, SendError>;

    /// Show an activity indicator
    async fn send_action(
        &self,
        conversation: &Conversation,
        action: ActionHint,
    ) -> Result<(), SendError>;
}

/// What one link contributes at its position
#[derive(Debug, Clone)]
pub enum LinkDelivery {
    Groups(Packed),
    Failed(FailureKind),
    Skipped,
}

/// Summary of one message's delivery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Ids of every message sent, in send order
    pub sent_messages: Vec<i32>,
    /// Notices sent (failures, dropped files)
    pub notices: usize,
    /// Groups the platform refused
    pub send_failures: usize,
}

/// Notice for assets dropped from a delivered bundle
#[must_use]
pub fn dropped_notice(count: usize) -> String {
    format!("⚠️ Skipped {count} file(s) over the size limit")
}

/// Sends deliveries in link order, one conversation at a time
pub struct DeliveryCoordinator {
    sender: Arc<dyn MediaSender>,
    send_as: HashMap<i64, String>,
    locks: Cache<i64, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for DeliveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryCoordinator")
            .field("send_as", &self.send_as)
            .finish_non_exhaustive()
    }
}

impl DeliveryCoordinator {
    /// `send_as` maps chat ids to the identity every send there is attributed to
    #[must_use]
    pub fn new(sender: Arc<dyn MediaSender>, send_as: HashMap<i64, String>) -> Self {
        let locks = Cache::builder()
            .max_capacity(LOCK_CAPACITY)
            .time_to_idle(LOCK_TTL)
            .build();
        Self {
            sender,
            send_as,
            locks,
        }
    }

    /// Where sends for `conversation` actually go
    #[must_use]
    pub fn target_for(&self, conversation: &Conversation) -> Conversation {
        let mut target = conversation.clone();
        if let Some(identity) = self.send_as.get(&conversation.id.0) {
            target.identity = Some(identity.clone());
        }
        target
    }

    /// Show an activity indicator; failures are only logged
    pub async fn hint(&self, target: &Conversation, action: ActionHint) {
        if let Err(e) = self.sender.send_action(target, action).await {
            debug!(chat_id = %target.id, error = %e, "Chat action failed");
        }
    }

    /// Start an ordered delivery of `links` positions to `target`
    #[must_use]
    pub fn session(&self, target: Conversation, links: usize) -> DeliverySession<'_> {
        DeliverySession {
            coordinator: self,
            target,
            buffer: ReorderBuffer::new(links),
            report: DeliveryReport::default(),
        }
    }

    /// Deliver completed links in position order, whatever order they are given in
    pub async fn deliver(
        &self,
        conversation: &Conversation,
        deliveries: Vec<(usize, LinkDelivery)>,
    ) -> DeliveryReport {
        let links = deliveries.iter().map(|(p, _)| p + 1).max().unwrap_or(0);
        let mut session = self.session(self.target_for(conversation), links);
        for (position, delivery) in deliveries {
            session.complete(position, delivery).await;
        }
        session.finish().await
    }

    async fn lock_for(&self, chat_id: i64) -> Arc<Mutex<()>> {
        self.locks
            .get_with(chat_id, async { Arc::new(Mutex::new(())) })
            .await
    }
}

/// Delivery of one inbound message
pub struct DeliverySession<'a> {
    coordinator: &'a DeliveryCoordinator,
    target: Conversation,
    buffer: ReorderBuffer<LinkDelivery>,
    report: DeliveryReport,
}

impl DeliverySession<'_> {
    /// Record a finished link and send everything that is now in order
    pub async fn complete(&mut self, position: usize, delivery: LinkDelivery) {
        if let Err(e) = self.buffer.insert(position, delivery) {
            error!(chat_id = %self.target.id, error = %e, "Dropping delivery");
            return;
        }
        self.flush().await;
    }

    /// Fill positions that never completed, flush, and report
    pub async fn finish(mut self) -> DeliveryReport {
        for position in self.buffer.missing() {
            warn!(chat_id = %self.target.id, position, "Link never completed");
            let _ = self
                .buffer
                .insert(position, LinkDelivery::Failed(FailureKind::Transient));
        }
        self.flush().await;
        self.report
    }

    async fn flush(&mut self) {
        let ready = self.buffer.drain_ready();
        if ready.is_empty() {
            return;
        }

        let lock = self.coordinator.lock_for(self.target.id.0).await;
        let _guard = lock.lock().await;
        for (position, delivery) in ready {
            self.send(position, delivery).await;
        }
    }

    async fn send(&mut self, position: usize, delivery: LinkDelivery) {
        match delivery {
            LinkDelivery::Skipped => {
                debug!(chat_id = %self.target.id, position, "Nothing to deliver");
            }
            LinkDelivery::Failed(kind) => {
                self.notice(kind.notice()).await;
            }
            LinkDelivery::Groups(packed) => {
                for group in &packed.groups {
                    self.send_group(group).await;
                }
                if !packed.dropped.is_empty() {
                    let text = if packed.groups.is_empty() {
                        FailureKind::OversizedAsset.notice().to_string()
                    } else {
                        dropped_notice(packed.dropped.len())
                    };
                    self.notice(&text).await;
                }
            }
        }
    }

    async fn send_group(&mut self, group: &DeliveryGroup) {
        let sender = &self.coordinator.sender;
        match sender.send_group(&self.target, group).await {
            Ok(ids) => self.report.sent_messages.extend(ids),
            Err(e) => {
                warn!(
                    chat_id = %self.target.id,
                    position = group.position,
                    members = group.assets.len(),
                    bytes = group.total_bytes(),
                    error = %e,
                    "Group send failed"
                );
                self.report.send_failures += 1;
                self.notice(FailureKind::SendFailed.notice()).await;
            }
        }
    }

    async fn notice(&mut self, text: &str) {
        match self.coordinator.sender.send_notice(&self.target, text).await {
            Ok(id) => {
                self.report.sent_messages.push(id);
                self.report.notices += 1;
            }
            Err(e) => warn!(chat_id = %self.target.id, error = %e, "Notice send failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationId, MediaAsset, MediaKind};
    use std::sync::Mutex as StdMutex;

    fn packed(position: usize, names: &[&str]) -> Packed {
        Packed {
            groups: vec![DeliveryGroup {
                position,
                conversation: ConversationId(1),
                assets: names
                    .iter()
                    .map(|n| MediaAsset::new(MediaKind::Image, *n, vec![0_u8; 1]))
                    .collect(),
                caption: None,
            }],
            dropped: Vec::new(),
        }
    }

    /// Mock sender recording what was sent, in order
    fn recording_sender(log: Arc<StdMutex<Vec<String>>>) -> MockMediaSender {
        let mut sender = MockMediaSender::new();
        let groups_log = Arc::clone(&log);
        sender.expect_send_group().returning(move |_, group| {
            let mut log = groups_log.lock().expect("log lock");
            log.push(format!("group@{}", group.position));
            Ok(vec![i32::try_from(log.len()).expect("small log")])
        });
        sender.expect_send_notice().returning(move |_, text| {
            let mut log = log.lock().expect("log lock");
            log.push(format!("notice:{text}"));
            Ok(i32::try_from(log.len()).expect("small log"))
        });
        sender
    }

    #[tokio::test]
    async fn test_out_of_order_completion_sent_in_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let coordinator =
            DeliveryCoordinator::new(Arc::new(recording_sender(Arc::clone(&log))), HashMap::new());

        let report = coordinator
            .deliver(
                &Conversation::new(1),
                vec![
                    (2, LinkDelivery::Groups(packed(2, &["c.jpg"]))),
                    (1, LinkDelivery::Skipped),
                    (3, LinkDelivery::Failed(FailureKind::Timeout)),
                    (0, LinkDelivery::Groups(packed(0, &["a.jpg"]))),
                ],
            )
            .await;

        let log = log.lock().expect("log lock").clone();
        assert_eq!(
            log,
            vec![
                "group@0".to_string(),
                "group@2".to_string(),
                format!("notice:{}", FailureKind::Timeout.notice()),
            ]
        );
        assert_eq!(report.sent_messages, vec![1, 2, 3]);
        assert_eq!(report.notices, 1);
    }

    #[tokio::test]
    async fn test_send_failure_becomes_notice() {
        let mut sender = MockMediaSender::new();
        sender
            .expect_send_group()
            .times(1)
            .returning(|_, _| Err(SendError::Rejected("too big".into())));
        sender
            .expect_send_notice()
            .withf(|_, text| text == FailureKind::SendFailed.notice())
            .times(1)
            .returning(|_, _| Ok(9));
        let coordinator = DeliveryCoordinator::new(Arc::new(sender), HashMap::new());

        let report = coordinator
            .deliver(
                &Conversation::new(1),
                vec![(0, LinkDelivery::Groups(packed(0, &["a.jpg"])))],
            )
            .await;
        assert_eq!(report.send_failures, 1);
        assert_eq!(report.sent_messages, vec![9]);
    }

    #[tokio::test]
    async fn test_dropped_assets_reported_after_bundle() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let coordinator =
            DeliveryCoordinator::new(Arc::new(recording_sender(Arc::clone(&log))), HashMap::new());
        let mut with_drop = packed(0, &["a.jpg"]);
        with_drop.dropped.push(super::super::packager::DroppedAsset {
            file_name: "big.mp4".into(),
            size: 1,
            reason: FailureKind::OversizedAsset,
        });

        coordinator
            .deliver(&Conversation::new(1), vec![(0, LinkDelivery::Groups(with_drop))])
            .await;

        let log = log.lock().expect("log lock").clone();
        assert_eq!(log, vec!["group@0".to_string(), format!("notice:{}", dropped_notice(1))]);
    }

    #[tokio::test]
    async fn test_send_as_identity_applied() {
        let mut sender = MockMediaSender::new();
        sender
            .expect_send_notice()
            .withf(|conversation, _| conversation.identity.as_deref() == Some("biz-1"))
            .times(1)
            .returning(|_, _| Ok(1));
        let coordinator = DeliveryCoordinator::new(
            Arc::new(sender),
            HashMap::from([(1, "biz-1".to_string())]),
        );

        coordinator
            .deliver(
                &Conversation::new(1),
                vec![(0, LinkDelivery::Failed(FailureKind::NotFound))],
            )
            .await;
    }

    #[tokio::test]
    async fn test_inbound_identity_kept_without_override() {
        let coordinator =
            DeliveryCoordinator::new(Arc::new(MockMediaSender::new()), HashMap::new());
        let mut conversation = Conversation::new(5);
        conversation.identity = Some("inbound".into());
        assert_eq!(
            coordinator.target_for(&conversation).identity.as_deref(),
            Some("inbound")
        );
    }

    #[tokio::test]
    async fn test_unfinished_positions_get_a_notice() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let coordinator =
            DeliveryCoordinator::new(Arc::new(recording_sender(Arc::clone(&log))), HashMap::new());
        let mut session = coordinator.session(Conversation::new(1), 2);
        session
            .complete(1, LinkDelivery::Groups(packed(1, &["b.jpg"])))
            .await;
        assert!(log.lock().expect("log lock").is_empty());

        session.finish().await;
        let log = log.lock().expect("log lock").clone();
        assert_eq!(
            log,
            vec![
                format!("notice:{}", FailureKind::Transient.notice()),
                "group@1".to_string(),
            ]
        );
    }
}
