//! Per-link retry and fallback across the routed backends.

use crate::backends::{BackendRegistry, ExtractionError, MediaBackend};
use crate::types::{
    BackendId, CandidateLink, ExtractionErrorKind, FailureKind, MediaBundle, ResolutionOutcome,
    SkipReason,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

/// Backoff for transient failures of one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// First delay
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 4000,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delays doubling from `initial_backoff_ms`, jittered, capped
    pub fn strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(self.initial_backoff_ms.max(2) / 2)
            .max_delay(Duration::from_millis(self.max_backoff_ms))
            .map(jitter)
            .take(self.max_retries)
    }
}

/// What happened with one backend while resolving a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    pub backend: BackendId,
    /// Calls made, retries included
    pub attempts: usize,
    /// Final error, `None` on success
    pub error: Option<ExtractionErrorKind>,
}

/// Terminal outcome plus the attempt trail that led to it
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub outcome: ResolutionOutcome,
    pub attempts: Vec<AttemptRecord>,
}

impl DispatchReport {
    /// Attempts made against `backend`
    #[must_use]
    pub fn attempts_for(&self, backend: BackendId) -> usize {
        self.attempts
            .iter()
            .filter(|r| r.backend == backend)
            .map(|r| r.attempts)
            .sum()
    }
}

/// Drives links through their backends under a shared worker pool
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    retry: RetryPolicy,
    pool: Arc<Semaphore>,
    link_timeout: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<BackendRegistry>,
        retry: RetryPolicy,
        pool_size: usize,
        link_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            retry,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
            link_timeout,
        }
    }

    /// Resolve one link to a terminal outcome.
    ///
    /// Waits for a pool slot first; the timeout only covers the time after admission.
    pub async fn dispatch(&self, link: &CandidateLink) -> DispatchReport {
        let Ok(_permit) = Arc::clone(&self.pool).acquire_owned().await else {
            warn!(url = %link.normalized_url(), "Worker pool closed");
            return DispatchReport {
                outcome: ResolutionOutcome::Failed {
                    kind: FailureKind::Transient,
                    platform: link.platform(),
                },
                attempts: Vec::new(),
            };
        };

        let mut attempts = Vec::new();
        let outcome = match tokio::time::timeout(self.link_timeout, self.run(link, &mut attempts))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    url = %link.normalized_url(),
                    timeout_secs = self.link_timeout.as_secs(),
                    "Link resolution timed out"
                );
                ResolutionOutcome::Failed {
                    kind: FailureKind::Timeout,
                    platform: link.platform(),
                }
            }
        };

        DispatchReport { outcome, attempts }
    }

    async fn run(
        &self,
        link: &CandidateLink,
        trace: &mut Vec<AttemptRecord>,
    ) -> ResolutionOutcome {
        let backends = self.registry.backends_for(link.platform());
        if backends.is_empty() {
            debug!(platform = %link.platform(), "No backend routed");
            return ResolutionOutcome::Skipped(SkipReason::NoBackend);
        }

        let scope = link.effective_scope();
        let mut worst: Option<ExtractionErrorKind> = None;

        for backend in &backends {
            let counter = AtomicUsize::new(0);
            let result = self.try_backend(backend.as_ref(), link, &counter).await;
            let attempts = counter.load(Ordering::Relaxed);

            match result {
                Ok(bundle) => {
                    trace.push(AttemptRecord {
                        backend: backend.id(),
                        attempts,
                        error: None,
                    });
                    info!(
                        url = %link.normalized_url(),
                        backend = %backend.id(),
                        attempt = attempts,
                        assets = bundle.assets().len(),
                        "Resolved"
                    );
                    let bundle = if link.is_restricted() {
                        bundle.restrict_to_primary()
                    } else {
                        bundle
                    };
                    return ResolutionOutcome::Success(bundle);
                }
                Err(err) => {
                    warn!(
                        url = %link.normalized_url(),
                        backend = %backend.id(),
                        attempt = attempts,
                        ?scope,
                        error = %err,
                        "Backend failed, moving on"
                    );
                    trace.push(AttemptRecord {
                        backend: backend.id(),
                        attempts,
                        error: Some(err.kind),
                    });
                    if worst.is_none_or(|w| err.kind.severity() > w.severity()) {
                        worst = Some(err.kind);
                    }
                }
            }
        }

        match worst {
            None | Some(ExtractionErrorKind::Unsupported) => {
                ResolutionOutcome::Skipped(SkipReason::Unsupported)
            }
            Some(kind) => ResolutionOutcome::Failed {
                kind: kind.into(),
                platform: link.platform(),
            },
        }
    }

    /// Call one backend, retrying in place on `Transient` only
    async fn try_backend(
        &self,
        backend: &dyn MediaBackend,
        link: &CandidateLink,
        counter: &AtomicUsize,
    ) -> Result<MediaBundle, ExtractionError> {
        let scope = link.effective_scope();
        RetryIf::spawn(
            self.retry.strategy(),
            move || {
                let attempt = counter.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(backend = %backend.id(), attempt, "Trying backend");
                backend.resolve(link, scope)
            },
            ExtractionError::is_transient,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockMediaBackend;
    use crate::types::{MediaAsset, MediaKind, Platform, Scope};

    fn link(scope: Scope, explicit: bool) -> CandidateLink {
        CandidateLink::new(
            "https://youtu.be/x",
            "https://youtu.be/x",
            Platform::YouTube,
            scope,
            explicit,
            0,
        )
    }

    fn bundle(link: &CandidateLink, backend: BackendId, n: usize) -> MediaBundle {
        let assets = (0..n)
            .map(|i| MediaAsset::new(MediaKind::Video, format!("{i}.mp4"), vec![1_u8; 8]))
            .collect();
        MediaBundle::new(link.clone(), backend, assets, Some("caption".into()))
    }

    fn failing(id: BackendId, kind: ExtractionErrorKind, times: usize) -> MockMediaBackend {
        let mut backend = MockMediaBackend::new();
        backend.expect_id().return_const(id);
        backend
            .expect_resolve()
            .times(times)
            .returning(move |_, _| Err(ExtractionError::new(kind, "boom")));
        backend
    }

    fn succeeding(id: BackendId, assets: usize) -> MockMediaBackend {
        let mut backend = MockMediaBackend::new();
        backend.expect_id().return_const(id);
        backend
            .expect_resolve()
            .times(1)
            .returning(move |link, _| Ok(bundle(link, id, assets)));
        backend
    }

    fn idle(id: BackendId) -> MockMediaBackend {
        let mut backend = MockMediaBackend::new();
        backend.expect_id().return_const(id);
        backend.expect_resolve().never();
        backend
    }

    fn dispatcher(primary: MockMediaBackend, fallback: MockMediaBackend) -> Dispatcher {
        let registry = BackendRegistry::new()
            .register(Arc::new(primary))
            .register(Arc::new(fallback))
            .route(
                Platform::YouTube,
                vec![BackendId::YtDlp, BackendId::GalleryDl],
            );
        Dispatcher::new(
            Arc::new(registry),
            RetryPolicy {
                max_retries: 2,
                initial_backoff_ms: 10,
                max_backoff_ms: 20,
            },
            2,
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhausts_then_falls_back() {
        let d = dispatcher(
            failing(BackendId::YtDlp, ExtractionErrorKind::Transient, 3),
            succeeding(BackendId::GalleryDl, 1),
        );
        let report = d.dispatch(&link(Scope::Item, false)).await;
        assert!(matches!(report.outcome, ResolutionOutcome::Success(_)));
        assert_eq!(report.attempts_for(BackendId::YtDlp), 3);
        assert_eq!(report.attempts_for(BackendId::GalleryDl), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_and_rate_limit_never_retried() {
        for kind in [
            ExtractionErrorKind::AuthRequired,
            ExtractionErrorKind::RateLimited,
            ExtractionErrorKind::NotFound,
            ExtractionErrorKind::Unsupported,
        ] {
            let d = dispatcher(
                failing(BackendId::YtDlp, kind, 1),
                succeeding(BackendId::GalleryDl, 1),
            );
            let report = d.dispatch(&link(Scope::Item, false)).await;
            assert!(matches!(report.outcome, ResolutionOutcome::Success(_)));
            assert_eq!(report.attempts_for(BackendId::YtDlp), 1, "{kind}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_most_informative_failure_surfaces() {
        let d = dispatcher(
            failing(BackendId::YtDlp, ExtractionErrorKind::AuthRequired, 1),
            failing(BackendId::GalleryDl, ExtractionErrorKind::Transient, 3),
        );
        let report = d.dispatch(&link(Scope::Item, false)).await;
        assert!(matches!(
            report.outcome,
            ResolutionOutcome::Failed {
                kind: FailureKind::AuthRequired,
                platform: Platform::YouTube
            }
        ));
        assert_eq!(report.attempts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_unsupported_is_skipped() {
        let d = dispatcher(
            failing(BackendId::YtDlp, ExtractionErrorKind::Unsupported, 1),
            failing(BackendId::GalleryDl, ExtractionErrorKind::Unsupported, 1),
        );
        let report = d.dispatch(&link(Scope::Item, false)).await;
        assert!(matches!(
            report.outcome,
            ResolutionOutcome::Skipped(SkipReason::Unsupported)
        ));
    }

    #[tokio::test]
    async fn test_no_route_is_skipped() {
        let d = Dispatcher::new(
            Arc::new(BackendRegistry::new()),
            RetryPolicy::default(),
            1,
            Duration::from_secs(1),
        );
        let report = d.dispatch(&link(Scope::Item, false)).await;
        assert!(matches!(
            report.outcome,
            ResolutionOutcome::Skipped(SkipReason::NoBackend)
        ));
        assert!(report.attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrequested_collection_restricted_to_primary() {
        let mut primary = MockMediaBackend::new();
        primary.expect_id().return_const(BackendId::YtDlp);
        primary
            .expect_resolve()
            .withf(|_, scope| *scope == Scope::Item)
            .times(1)
            .returning(|link, _| Ok(bundle(link, BackendId::YtDlp, 4)));
        let d = dispatcher(primary, idle(BackendId::GalleryDl));

        let report = d.dispatch(&link(Scope::Collection, false)).await;
        let ResolutionOutcome::Success(bundle) = report.outcome else {
            panic!("expected success");
        };
        assert_eq!(bundle.binary_count(), 1);
        assert_eq!(bundle.caption(), Some("caption"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_collection_kept_whole() {
        let mut primary = MockMediaBackend::new();
        primary.expect_id().return_const(BackendId::YtDlp);
        primary
            .expect_resolve()
            .withf(|_, scope| *scope == Scope::Collection)
            .times(1)
            .returning(|link, _| Ok(bundle(link, BackendId::YtDlp, 4)));
        let d = dispatcher(primary, idle(BackendId::GalleryDl));

        let report = d.dispatch(&link(Scope::Collection, true)).await;
        let ResolutionOutcome::Success(bundle) = report.outcome else {
            panic!("expected success");
        };
        assert_eq!(bundle.binary_count(), 4);
    }

    #[test]
    fn test_strategy_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 4000,
        };
        let delays: Vec<_> = policy.strategy().collect();
        assert_eq!(delays.len(), 5);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(4000)));
        assert_eq!(RetryPolicy::none().strategy().count(), 0);
    }
}
