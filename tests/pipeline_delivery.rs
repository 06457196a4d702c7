mod common;

use common::{FakeBackend, NoTranscode, RecordingSender, Sent};
use loot_courier::backends::BackendRegistry;
use loot_courier::links::LinkExtractor;
use loot_courier::pipeline::{InboundMessage, LinkPipeline, PipelineConfig, RetryPolicy};
use loot_courier::types::{
    BackendId, Conversation, ExtractionErrorKind, FailureKind, Platform, Scope,
};
use std::sync::Arc;
use std::time::Duration;

const CHAT: i64 = -100_500;

fn pipeline(
    backend: &Arc<FakeBackend>,
    sender: &Arc<RecordingSender>,
    config: PipelineConfig,
) -> LinkPipeline {
    let registry = BackendRegistry::new()
        .register(backend.clone())
        .route(Platform::YouTube, vec![BackendId::YtDlp])
        .route(Platform::Generic, vec![BackendId::YtDlp]);
    LinkPipeline::new(
        LinkExtractor::default().with_mention("CourierBot"),
        registry,
        Arc::new(NoTranscode),
        sender.clone(),
        config,
    )
}

fn message(text: &str) -> InboundMessage {
    InboundMessage {
        conversation: Conversation {
            reply_to: Some(7),
            ..Conversation::new(CHAT)
        },
        text: text.to_string(),
        urls: None,
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy::none(),
        ..PipelineConfig::default()
    }
}

fn group_positions(sent: &[Sent]) -> Vec<usize> {
    sent.iter()
        .filter_map(|s| match s {
            Sent::Group { position, .. } => Some(*position),
            Sent::Notice(_) => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn delivery_follows_link_order_not_completion_order() {
    let backend = Arc::new(
        FakeBackend::new(BackendId::YtDlp)
            .delay("v=slow", Duration::from_secs(3))
            .delay("/mid", Duration::from_secs(2))
            .delay("v=fast", Duration::from_secs(1)),
    );
    let sender = Arc::new(RecordingSender::new());
    let pipeline = pipeline(&backend, &sender, config());

    let report = pipeline
        .handle(message(
            "https://www.youtube.com/watch?v=slow then https://youtu.be/mid \
             and https://www.youtube.com/watch?v=fast",
        ))
        .await
        .expect("message has links");

    let sent = sender.sent();
    assert_eq!(group_positions(&sent), vec![0, 1, 2]);
    assert_eq!(report.sent_messages.len(), 3);
    assert_eq!(report.notices, 0);
    match &sent[0] {
        Sent::Group { caption, .. } => {
            assert_eq!(
                caption.as_deref(),
                Some("https://www.youtube.com/watch?v=slow")
            );
        }
        Sent::Notice(text) => panic!("unexpected notice {text}"),
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_is_confined_to_its_link() {
    let backend = Arc::new(
        FakeBackend::new(BackendId::YtDlp)
            .delay("v=first", Duration::from_secs(1))
            .delay("v=hang", Duration::from_secs(3600))
            .delay("v=last", Duration::from_secs(1)),
    );
    let sender = Arc::new(RecordingSender::new());
    let config = PipelineConfig {
        link_timeout: Duration::from_secs(10),
        ..config()
    };
    let pipeline = pipeline(&backend, &sender, config);

    let report = pipeline
        .handle(message(
            "https://youtu.be/first?v=first https://www.youtube.com/watch?v=hang \
             https://www.youtube.com/watch?v=last",
        ))
        .await
        .expect("message has links");

    let timeline = sender.timeline();
    assert_eq!(timeline.len(), 3);

    // The first link is delivered as soon as it resolves
    assert!(timeline[0].0 < Duration::from_secs(10));
    assert!(matches!(timeline[0].1, Sent::Group { position: 0, .. }));

    assert_eq!(
        timeline[1].1,
        Sent::Notice(FailureKind::Timeout.notice().to_string())
    );
    assert!(timeline[1].0 < Duration::from_secs(3600));
    assert!(matches!(timeline[2].1, Sent::Group { position: 2, .. }));
    assert_eq!(report.notices, 1);
}

#[tokio::test]
async fn message_without_links_gets_no_response() {
    let backend = Arc::new(FakeBackend::new(BackendId::YtDlp));
    let sender = Arc::new(RecordingSender::new());
    let pipeline = pipeline(&backend, &sender, config());

    assert!(pipeline.handle(message("nothing to see here")).await.is_none());
    assert!(pipeline
        .handle(message("check this out https://video.example/x"))
        .await
        .is_none());
    assert_eq!(backend.calls(), 0);
    assert!(sender.sent().is_empty());
}

#[tokio::test]
async fn mention_makes_unknown_link_explicit() {
    let backend = Arc::new(FakeBackend::new(BackendId::YtDlp));
    let sender = Arc::new(RecordingSender::new());
    let pipeline = pipeline(&backend, &sender, config());

    let msg = message("check this out https://video.example/x @CourierBot");
    let links = pipeline.links(&msg);
    assert_eq!(links.len(), 1);
    assert!(links[0].explicit_request());
    assert_eq!(links[0].platform(), Platform::Generic);

    let report = pipeline.handle(msg).await.expect("message has links");
    assert_eq!(report.sent_messages.len(), 1);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn collection_is_narrowed_unless_requested() {
    let backend = Arc::new(FakeBackend::new(BackendId::YtDlp).images(3));
    let sender = Arc::new(RecordingSender::new());
    let pipeline = pipeline(&backend, &sender, config());

    pipeline
        .handle(message("https://www.youtube.com/playlist?list=PL1"))
        .await
        .expect("message has links");
    pipeline
        .handle(message("@CourierBot https://www.youtube.com/playlist?list=PL1"))
        .await
        .expect("message has links");

    assert_eq!(backend.scopes(), vec![Scope::Item, Scope::Collection]);
    let sizes: Vec<usize> = sender
        .sent()
        .iter()
        .filter_map(|s| match s {
            Sent::Group { assets, .. } => Some(*assets),
            Sent::Notice(_) => None,
        })
        .collect();
    assert_eq!(sizes, vec![1, 3]);
}

#[tokio::test]
async fn send_as_identity_applies_to_every_send() {
    let backend = Arc::new(FakeBackend::new(BackendId::YtDlp));
    let sender = Arc::new(RecordingSender::new());
    let config = PipelineConfig {
        send_as: [(CHAT, "biz-1".to_string())].into_iter().collect(),
        ..config()
    };
    let pipeline = pipeline(&backend, &sender, config);

    pipeline
        .handle(message("https://youtu.be/a https://youtu.be/b"))
        .await
        .expect("message has links");

    let sent = sender.sent();
    assert_eq!(sent.len(), 2);
    for s in sent {
        match s {
            Sent::Group { identity, .. } => assert_eq!(identity.as_deref(), Some("biz-1")),
            Sent::Notice(text) => panic!("unexpected notice {text}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn failed_link_notice_takes_its_place_in_order() {
    // The middle link fails first, yet its notice lands between the others
    let backend = Arc::new(
        FakeBackend::new(BackendId::YtDlp)
            .delay("v=one", Duration::from_secs(2))
            .delay("v=three", Duration::from_secs(1))
            .broken("v=two", ExtractionErrorKind::NotFound),
    );
    let sender = Arc::new(RecordingSender::new());
    let pipeline = pipeline(&backend, &sender, config());

    let report = pipeline
        .handle(message(
            "https://www.youtube.com/watch?v=one https://www.youtube.com/watch?v=two \
             https://www.youtube.com/watch?v=three",
        ))
        .await
        .expect("message has links");

    let sent = sender.sent();
    assert_eq!(sent.len(), 3);
    assert!(matches!(sent[0], Sent::Group { position: 0, .. }));
    assert_eq!(
        sent[1],
        Sent::Notice(FailureKind::NotFound.notice().to_string())
    );
    assert!(matches!(sent[2], Sent::Group { position: 2, .. }));
    assert_eq!(report.notices, 1);
    assert_eq!(report.sent_messages.len(), 3);
}
