//! Background ingestion worker
//!
//! One polling cycle walks IDLE → FETCHING → CLASSIFYING → COMMITTING →
//! RECOMPUTE → IDLE:
//! - FETCHING: pull items after the feed's committed cursor
//! - CLASSIFYING: cache lookup per fingerprint, classify only unseen ones
//! - COMMITTING: advance the cursor only if the whole batch was stored
//! - RECOMPUTE: rebuild the pending-review snapshot
//!
//! Failures stay local: a feed error skips that feed, a persistence error
//! skips that feed's commit. Replaying an uncommitted batch is harmless
//! because already-classified fingerprints short-circuit at the lookup.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::classifier::ClassifierAdapter;
use crate::error::{EngineError, Result};
use crate::feed::SourceFeed;
use crate::model::{ClassificationRecord, FeedId, FeedItem, Fingerprint};
use crate::notify::NotificationState;
use crate::store::{CheckpointStore, ClassificationCache, MessageArchive};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CyclePhase {
    Idle = 0,
    Fetching = 1,
    Classifying = 2,
    Committing = 3,
    Recompute = 4,
}

impl CyclePhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CyclePhase::Fetching,
            2 => CyclePhase::Classifying,
            3 => CyclePhase::Committing,
            4 => CyclePhase::Recompute,
            _ => CyclePhase::Idle,
        }
    }
}

/// How a feed's part of the cycle ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FeedOutcome {
    Committed,
    NothingToCommit,
    FetchFailed(String),
    PersistenceFailed(String),
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedReport {
    pub feed: FeedId,
    pub fetched: usize,
    pub classified: usize,
    pub deduplicated: usize,
    /// Items whose automatic verdict collided with a user review
    pub conflicts: usize,
    pub outcome: FeedOutcome,
}

impl FeedReport {
    fn new(feed: FeedId) -> Self {
        Self {
            feed,
            fetched: 0,
            classified: 0,
            deduplicated: 0,
            conflicts: 0,
            outcome: FeedOutcome::NothingToCommit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Another cycle was already running
    pub skipped: bool,
    pub feeds: Vec<FeedReport>,
    /// `None` when the recompute failed and the badge is stale
    pub pending_count: Option<usize>,
}

impl CycleReport {
    fn new(skipped: bool) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            skipped,
            feeds: vec![],
            pending_count: None,
        }
    }

    pub fn classified(&self) -> usize {
        self.feeds.iter().map(|f| f.classified).sum()
    }
}

/// Cooperative stop request shared with the scheduler
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

pub struct IngestionWorker {
    feeds: Vec<Arc<dyn SourceFeed>>,
    classifier: Arc<ClassifierAdapter>,
    cache: Arc<dyn ClassificationCache>,
    checkpoints: Arc<dyn CheckpointStore>,
    archive: Arc<dyn MessageArchive>,
    notifications: Arc<NotificationState>,
    running: AtomicBool,
    phase: AtomicU8,
    shutdown: ShutdownHandle,
}

/// Clears the running flag even if a cycle panics
struct RunningGuard<'a>(&'a IngestionWorker);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set_phase(CyclePhase::Idle);
        self.0.running.store(false, Ordering::SeqCst);
    }
}

impl IngestionWorker {
    pub fn new<S>(
        feeds: Vec<Arc<dyn SourceFeed>>,
        classifier: Arc<ClassifierAdapter>,
        store: Arc<S>,
        notifications: Arc<NotificationState>,
    ) -> Self
    where
        S: ClassificationCache + CheckpointStore + MessageArchive + 'static,
    {
        Self::from_parts(
            feeds,
            classifier,
            store.clone(),
            store.clone(),
            store,
            notifications,
        )
    }

    pub(crate) fn from_parts(
        feeds: Vec<Arc<dyn SourceFeed>>,
        classifier: Arc<ClassifierAdapter>,
        cache: Arc<dyn ClassificationCache>,
        checkpoints: Arc<dyn CheckpointStore>,
        archive: Arc<dyn MessageArchive>,
        notifications: Arc<NotificationState>,
    ) -> Self {
        Self {
            feeds,
            classifier,
            cache,
            checkpoints,
            archive,
            notifications,
            running: AtomicBool::new(false),
            phase: AtomicU8::new(CyclePhase::Idle as u8),
            shutdown: ShutdownHandle::default(),
        }
    }

    /// Use a different checkpoint store than the record store
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn phase(&self) -> CyclePhase {
        CyclePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.request();
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Run one full polling cycle.
    ///
    /// Returns a skipped report without doing anything if another cycle is
    /// still in progress.
    pub fn run_cycle(&self) -> CycleReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let report = CycleReport::new(true);
            log::info!(
                "Cycle {} skipped: previous cycle still running",
                report.cycle_id
            );
            return report;
        }
        let _guard = RunningGuard(self);

        let mut report = CycleReport::new(false);
        log::debug!("Cycle {} started", report.cycle_id);

        for feed in &self.feeds {
            let feed_report = self.ingest_feed(feed.as_ref());
            log::info!(
                "Cycle {} {}: fetched {}, classified {}, deduplicated {}, outcome {:?}",
                report.cycle_id,
                feed_report.feed,
                feed_report.fetched,
                feed_report.classified,
                feed_report.deduplicated,
                feed_report.outcome
            );
            report.feeds.push(feed_report);
        }

        self.set_phase(CyclePhase::Recompute);
        match self.notifications.recompute(self.cache.as_ref()) {
            Ok(snapshot) => report.pending_count = Some(snapshot.pending_count),
            Err(e) => log::warn!(
                "Cycle {}: pending count left stale: {}",
                report.cycle_id,
                e
            ),
        }

        log::info!(
            "Cycle {} finished: {} classified, {} pending review",
            report.cycle_id,
            report.classified(),
            report
                .pending_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
        report
    }

    fn ingest_feed(&self, feed: &dyn SourceFeed) -> FeedReport {
        let mut report = FeedReport::new(feed.id());
        if self.shutdown.is_requested() {
            report.outcome = FeedOutcome::Interrupted;
            return report;
        }

        // FETCHING
        self.set_phase(CyclePhase::Fetching);
        let cursor = match self.checkpoints.get_cursor(feed.id()) {
            Ok(cursor) => cursor,
            Err(e) => {
                log::warn!("{}: cannot read checkpoint: {}", feed.id(), e);
                report.outcome = FeedOutcome::PersistenceFailed(e.to_string());
                return report;
            }
        };

        let batch = match feed.list_new_items(cursor.as_ref()) {
            Ok(batch) => batch,
            Err(e) => {
                log::warn!("{}: skipped this cycle: {}", feed.id(), e);
                report.outcome = FeedOutcome::FetchFailed(e.to_string());
                return report;
            }
        };
        report.fetched = batch.items.len();

        // CLASSIFYING
        self.set_phase(CyclePhase::Classifying);
        for item in &batch.items {
            if self.shutdown.is_requested() {
                log::info!("{}: shutdown requested, leaving batch uncommitted", feed.id());
                report.outcome = FeedOutcome::Interrupted;
                return report;
            }
            if let Err(e) = self.ingest_item(feed.id(), item, &mut report) {
                log::warn!("{}: batch not committed: {}", feed.id(), e);
                report.outcome = FeedOutcome::PersistenceFailed(e.to_string());
                return report;
            }
        }

        // COMMITTING
        self.set_phase(CyclePhase::Committing);
        report.outcome = match batch.next_cursor {
            None => FeedOutcome::NothingToCommit,
            Some(next) => match self.checkpoints.advance(feed.id(), &next) {
                Ok(()) => FeedOutcome::Committed,
                Err(e) => {
                    log::warn!("{}: checkpoint not advanced: {}", feed.id(), e);
                    FeedOutcome::PersistenceFailed(e.to_string())
                }
            },
        };
        report
    }

    fn ingest_item(&self, feed: FeedId, item: &FeedItem, report: &mut FeedReport) -> Result<()> {
        let fingerprint = Fingerprint::from_source(feed, &item.id);

        // Dedup gate: seen fingerprints never reach the classifier
        if self.cache.lookup(&fingerprint)?.is_some() {
            report.deduplicated += 1;
            return Ok(());
        }

        let verdict = self.classifier.classify_item(item);
        let analysis = self.classifier.analyze_item(item, Utc::now());
        let record =
            ClassificationRecord::new(fingerprint.clone(), verdict, &item.summary, item.timestamp)
                .with_analysis(&analysis);

        self.archive.archive(&fingerprint, item)?;
        match self.cache.upsert(&record) {
            Ok(_) => {
                report.classified += 1;
                Ok(())
            }
            Err(EngineError::InvariantViolation(message)) => {
                log::error!("{}: {}", fingerprint, message);
                report.conflicts += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Run cycles on a fixed interval until shutdown is requested.
///
/// Ticks that fall due while a cycle is still running are dropped, never
/// queued. An in-flight cycle is allowed to finish.
pub async fn run_scheduled(worker: Arc<IngestionWorker>, interval: Duration) {
    let shutdown = worker.shutdown_handle();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    log::info!("Ingestion worker started, polling every {:?}", interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wake.notified() => {}
        }
        if shutdown.is_requested() {
            break;
        }

        let cycle_worker = Arc::clone(&worker);
        match tokio::task::spawn_blocking(move || cycle_worker.run_cycle()).await {
            Ok(report) if report.skipped => {}
            Ok(report) => log::debug!(
                "Cycle {} took {}ms",
                report.cycle_id,
                (Utc::now() - report.started_at).num_milliseconds()
            ),
            Err(e) => log::error!("Ingestion cycle aborted: {}", e),
        }

        if shutdown.is_requested() {
            break;
        }
    }

    log::info!("Ingestion worker stopped");
}
