//! Source feed trait and registry
//!
//! Feeds are pull-based: the worker hands over the last committed cursor and
//! receives everything newer plus the cursor to commit once the batch is
//! durably processed.
//!
//! Feed Status:
//! - JsonlFeed: Active (local JSON-lines export, byte-offset cursor)

mod jsonl;

pub use jsonl::JsonlFeed;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::model::{Cursor, FeedBatch, FeedId};

/// A pull-based source of mail, calendar or task items
pub trait SourceFeed: Send + Sync {
    fn id(&self) -> FeedId;

    /// Human-readable description
    fn description(&self) -> String;

    /// Check if this feed's data source exists
    fn is_available(&self) -> bool;

    /// Items after `cursor` (everything when `None`) and the next cursor.
    ///
    /// Fails with `TransientFeed`; the caller leaves the checkpoint alone.
    fn list_new_items(&self, cursor: Option<&Cursor>) -> Result<FeedBatch>;
}

/// Registry of configured feeds
#[derive(Default)]
pub struct FeedRegistry {
    feeds: Vec<Arc<dyn SourceFeed>>,
}

impl FeedRegistry {
    pub fn new(config: &Config) -> Self {
        let mut registry = Self::default();

        for feed in [FeedId::Mail, FeedId::Calendar, FeedId::Tasks] {
            if let Some(path) = config.feed_path(feed) {
                registry.register(Arc::new(JsonlFeed::new(feed, path)));
            }
        }

        registry
    }

    pub fn register(&mut self, feed: Arc<dyn SourceFeed>) {
        self.feeds.push(feed);
    }

    pub fn all(&self) -> &[Arc<dyn SourceFeed>] {
        &self.feeds
    }

    /// Feeds whose items get classified
    pub fn mail_feeds(&self) -> Vec<Arc<dyn SourceFeed>> {
        self.feeds
            .iter()
            .filter(|f| f.id() == FeedId::Mail)
            .cloned()
            .collect()
    }

    /// Calendar and task feeds, merged into the view as-is
    pub fn external_feeds(&self) -> Vec<Arc<dyn SourceFeed>> {
        self.feeds
            .iter()
            .filter(|f| f.id() != FeedId::Mail)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_config() {
        let yaml = r#"
feeds:
  mail:
    path: /tmp/mail.jsonl
  calendar:
    path: /tmp/calendar.jsonl
  tasks:
    enabled: false
    path: /tmp/tasks.jsonl
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let registry = FeedRegistry::new(&config);

        assert_eq!(registry.all().len(), 2);
        let mail: Vec<_> = registry.mail_feeds().iter().map(|f| f.id()).collect();
        assert_eq!(mail, vec![FeedId::Mail]);
        let external: Vec<_> = registry.external_feeds().iter().map(|f| f.id()).collect();
        assert_eq!(external, vec![FeedId::Calendar]);
    }

    #[test]
    fn test_empty_config_has_no_feeds() {
        let registry = FeedRegistry::new(&Config::default());
        assert!(registry.all().is_empty());
        assert!(registry.mail_feeds().is_empty());
    }
}
