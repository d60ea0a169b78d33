//! Pending-review badge state
//!
//! The count is never incremented by hand: `recompute` rescans the cache
//! and swaps in a fresh snapshot. Readers load the current snapshot without
//! taking a lock and always see a fully built value.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;
use crate::store::ClassificationCache;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationSnapshot {
    pub pending_count: usize,
    /// `None` until the first recompute
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct NotificationState {
    threshold: f64,
    current: ArcSwap<NotificationSnapshot>,
    // Serialises writers so snapshots are published in scan order
    recompute_lock: Mutex<()>,
}

impl NotificationState {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            current: ArcSwap::from_pointee(NotificationSnapshot::default()),
            recompute_lock: Mutex::new(()),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Rebuild the snapshot from the cache and publish it.
    ///
    /// On error the previous snapshot stays in place.
    pub fn recompute(&self, cache: &dyn ClassificationCache) -> Result<NotificationSnapshot> {
        let _writer = self.recompute_lock.lock();

        let pending_count = cache
            .records()?
            .iter()
            .filter(|r| r.is_pending(self.threshold))
            .count();

        let snapshot = NotificationSnapshot {
            pending_count,
            last_updated: Some(Utc::now()),
        };
        self.current.store(Arc::new(snapshot.clone()));

        log::debug!("Pending review count is now {}", pending_count);
        Ok(snapshot)
    }

    pub fn read(&self) -> Arc<NotificationSnapshot> {
        self.current.load_full()
    }

    pub fn pending_count(&self) -> usize {
        self.current.load().pending_count
    }
}
