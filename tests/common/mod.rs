//! Hand-written fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use loot_courier::backends::{ExtractionError, MediaBackend};
use loot_courier::pipeline::{
    ActionHint, MediaSender, SendError, TranscodeError, Transcoder,
};
use loot_courier::types::{
    BackendId, CandidateLink, Conversation, DeliveryGroup, ExtractionErrorKind, MediaAsset,
    MediaBundle, MediaKind, Scope,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Backend answering from a script: queued errors first, then success
pub struct FakeBackend {
    id: BackendId,
    delays: HashMap<String, Duration>,
    broken: HashMap<String, ExtractionErrorKind>,
    errors: Mutex<VecDeque<ExtractionErrorKind>>,
    images: usize,
    calls: AtomicUsize,
    scopes: Mutex<Vec<Scope>>,
}

impl FakeBackend {
    pub fn new(id: BackendId) -> Self {
        Self {
            id,
            delays: HashMap::new(),
            broken: HashMap::new(),
            errors: Mutex::new(VecDeque::new()),
            images: 1,
            calls: AtomicUsize::new(0),
            scopes: Mutex::new(Vec::new()),
        }
    }

    /// Links containing `needle` take `delay` to resolve
    pub fn delay(mut self, needle: &str, delay: Duration) -> Self {
        self.delays.insert(needle.to_string(), delay);
        self
    }

    /// Links containing `needle` always fail with `kind`
    pub fn broken(mut self, needle: &str, kind: ExtractionErrorKind) -> Self {
        self.broken.insert(needle.to_string(), kind);
        self
    }

    /// Fail `times` calls with `kind` before succeeding
    pub fn failing(self, kind: ExtractionErrorKind, times: usize) -> Self {
        self.errors
            .lock()
            .expect("errors lock")
            .extend(std::iter::repeat(kind).take(times));
        self
    }

    /// Images returned per successful call
    pub fn images(mut self, images: usize) -> Self {
        self.images = images;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn scopes(&self) -> Vec<Scope> {
        self.scopes.lock().expect("scopes lock").clone()
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn resolve(
        &self,
        link: &CandidateLink,
        scope: Scope,
    ) -> Result<MediaBundle, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scopes.lock().expect("scopes lock").push(scope);

        let delay = self
            .delays
            .iter()
            .find(|(needle, _)| link.normalized_url().contains(needle.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let url = link.normalized_url();
        let broken = self
            .broken
            .iter()
            .find(|(needle, _)| url.contains(needle.as_str()))
            .map(|(_, kind)| *kind);
        if let Some(kind) = broken {
            return Err(ExtractionError::new(kind, "broken link"));
        }

        let error = self.errors.lock().expect("errors lock").pop_front();
        if let Some(kind) = error {
            return Err(ExtractionError::new(kind, "scripted failure"));
        }

        let assets = (0..self.images)
            .map(|i| MediaAsset::new(MediaKind::Image, format!("{i}.jpg"), vec![0u8; 100]))
            .collect();
        Ok(MediaBundle::new(
            link.clone(),
            self.id,
            assets,
            Some(link.normalized_url().to_string()),
        ))
    }
}

/// Transcoder that never manages to shrink anything
pub struct NoTranscode;

#[async_trait]
impl Transcoder for NoTranscode {
    async fn reencode(
        &self,
        _asset: &MediaAsset,
        _target_bytes: u64,
    ) -> Result<MediaAsset, TranscodeError> {
        Err(TranscodeError::Failed("disabled in tests".to_string()))
    }
}

/// One outbound call, with the virtual time it happened at
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Group {
        position: usize,
        caption: Option<String>,
        assets: usize,
        identity: Option<String>,
    },
    Notice(String),
}

/// Sender that records everything instead of talking to Telegram
pub struct RecordingSender {
    start: Instant,
    log: Mutex<Vec<(Duration, Sent)>>,
    next_id: AtomicUsize,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            log: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.log
            .lock()
            .expect("log lock")
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn timeline(&self) -> Vec<(Duration, Sent)> {
        self.log.lock().expect("log lock").clone()
    }

    fn record(&self, sent: Sent) -> i32 {
        self.log
            .lock()
            .expect("log lock")
            .push((self.start.elapsed(), sent));
        i32::try_from(self.next_id.fetch_add(1, Ordering::SeqCst)).expect("small id")
    }
}

#[async_trait]
impl MediaSender for RecordingSender {
    async fn send_group(
        &self,
        conversation: &Conversation,
        group: &DeliveryGroup,
    ) -> Result<Vec<i32>, SendError> {
        let id = self.record(Sent::Group {
            position: group.position,
            caption: group.caption.clone(),
            assets: group.assets.len(),
            identity: conversation.identity.clone(),
        });
        Ok(vec![id])
    }

    async fn send_notice(
        &self,
        _conversation: &Conversation,
        text: &str,
    ) -> Result<i32, SendError> {
        Ok(self.record(Sent::Notice(text.to_string())))
    }

    async fn send_action(
        &self,
        _conversation: &Conversation,
        _action: ActionHint,
    ) -> Result<(), SendError> {
        Ok(())
    }
}
