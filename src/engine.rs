//! Presentation-facing entry points
//!
//! Badge and dashboard surfaces talk to the engine through three calls:
//! `read_pending_count`, `build_view` and `mark_reviewed`. The engine also
//! hands out the ingestion worker wired to the same state.

use chrono::Utc;
use std::sync::Arc;

use crate::classifier::ClassifierAdapter;
use crate::error::{EngineError, Result};
use crate::feed::SourceFeed;
use crate::model::{Category, ClassificationRecord, FeedItem, Fingerprint};
use crate::notify::{NotificationSnapshot, NotificationState};
use crate::store::{CheckpointStore, ClassificationCache, MessageArchive};
use crate::view::{TimeWindow, View, ViewBuilder};
use crate::worker::IngestionWorker;

pub struct Engine {
    cache: Arc<dyn ClassificationCache>,
    checkpoints: Arc<dyn CheckpointStore>,
    archive: Arc<dyn MessageArchive>,
    classifier: Arc<ClassifierAdapter>,
    notifications: Arc<NotificationState>,
    views: ViewBuilder,
}

impl Engine {
    /// `external` are the calendar/task feeds merged into views.
    ///
    /// The badge is rebuilt from `store` before this returns, so a reopened
    /// database reports its pending messages straight away.
    pub fn new<S>(
        store: Arc<S>,
        classifier: Arc<ClassifierAdapter>,
        external: Vec<Arc<dyn SourceFeed>>,
    ) -> Result<Self>
    where
        S: ClassificationCache + CheckpointStore + MessageArchive + 'static,
    {
        let notifications = Arc::new(NotificationState::new(classifier.policy().threshold));
        let engine = Self {
            cache: store.clone(),
            checkpoints: store.clone(),
            archive: store.clone(),
            classifier,
            notifications,
            views: ViewBuilder::new(store, external),
        };
        engine.refresh()?;
        Ok(engine)
    }

    /// Build the ingestion worker for `feeds`, sharing this engine's state
    pub fn worker(&self, feeds: Vec<Arc<dyn SourceFeed>>) -> IngestionWorker {
        IngestionWorker::from_parts(
            feeds,
            Arc::clone(&self.classifier),
            Arc::clone(&self.cache),
            Arc::clone(&self.checkpoints),
            Arc::clone(&self.archive),
            Arc::clone(&self.notifications),
        )
    }

    /// Rebuild the badge from persisted records
    pub fn refresh(&self) -> Result<NotificationSnapshot> {
        self.notifications.recompute(self.cache.as_ref())
    }

    pub fn model_name(&self) -> &str {
        self.classifier.model_name()
    }

    pub fn read_pending_count(&self) -> usize {
        self.notifications.pending_count()
    }

    pub fn notification_snapshot(&self) -> Arc<NotificationSnapshot> {
        self.notifications.read()
    }

    pub fn build_view(&self, window: TimeWindow) -> Result<View> {
        self.views.build_view(window)
    }

    /// Apply a user decision; the badge reflects it before this returns
    pub fn mark_reviewed(
        &self,
        fingerprint: &Fingerprint,
        category: Category,
    ) -> Result<NotificationSnapshot> {
        let record = self.cache.mark_reviewed(fingerprint, category)?;
        log::info!("{} reviewed as {}", record.fingerprint, record.category);
        self.notifications.recompute(self.cache.as_ref())
    }

    /// Re-run the classifier on an unreviewed message's archived text.
    ///
    /// Reviewed messages are refused: only the user may change them. A review
    /// that lands while the model is running wins, and the returned record is
    /// whatever the cache holds afterwards.
    pub fn reclassify(&self, fingerprint: &Fingerprint) -> Result<ClassificationRecord> {
        let existing = self
            .cache
            .lookup(fingerprint)?
            .ok_or_else(|| EngineError::UnknownFingerprint(fingerprint.clone()))?;
        if existing.reviewed {
            return Err(EngineError::InvariantViolation(format!(
                "{} was reviewed as {}; review it again instead of reclassifying",
                fingerprint, existing.category
            )));
        }

        let item = self
            .archive
            .archived(fingerprint)?
            .ok_or_else(|| EngineError::UnknownFingerprint(fingerprint.clone()))?;

        let verdict = self.classifier.classify_item(&item);
        let analysis = self.classifier.analyze_item(&item, Utc::now());
        let record = ClassificationRecord::new(
            fingerprint.clone(),
            verdict,
            item.summary.as_str(),
            item.timestamp,
        )
        .with_analysis(&analysis);
        let outcome = self.cache.upsert(&record)?;
        log::info!(
            "{} reclassified as {} ({:?})",
            fingerprint,
            record.category,
            outcome
        );

        self.notifications.recompute(self.cache.as_ref())?;
        self.cache
            .lookup(fingerprint)?
            .ok_or_else(|| EngineError::UnknownFingerprint(fingerprint.clone()))
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ClassificationRecord>> {
        self.cache.lookup(fingerprint)
    }

    pub fn archived(&self, fingerprint: &Fingerprint) -> Result<Option<FeedItem>> {
        self.archive.archived(fingerprint)
    }

    /// All records newest first; pending ones most urgent first
    pub fn records(&self, pending_only: bool) -> Result<Vec<ClassificationRecord>> {
        let threshold = self.notifications.threshold();
        let mut records = self.cache.records()?;
        if pending_only {
            records.retain(|r| r.is_pending(threshold));
            // Stable: equal urgency stays newest first
            records.sort_by(|a, b| b.urgency.cmp(&a.urgency));
        }
        Ok(records)
    }

    /// Settled TASK messages at or above `min_urgency`, most urgent first
    pub fn urgent_tasks(&self, min_urgency: u8) -> Result<Vec<ClassificationRecord>> {
        let threshold = self.notifications.threshold();
        let mut records = self.cache.records()?;
        records.retain(|r| {
            r.category == Category::Task && !r.is_pending(threshold) && r.urgency >= min_urgency
        });
        records.sort_by(|a, b| b.urgency.cmp(&a.urgency));
        Ok(records)
    }
}
