pub mod classifier;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod model;
pub mod notify;
pub mod store;
pub mod view;
pub mod worker;

pub use classifier::{ClassifierAdapter, ClassifierPolicy, LanguageModel};
pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use feed::{FeedRegistry, SourceFeed};
pub use model::{Category, ClassificationRecord, FeedId, Fingerprint};
pub use notify::{NotificationSnapshot, NotificationState};
pub use store::Store;
pub use view::{TimeWindow, View, ViewItem};
pub use worker::{CycleReport, IngestionWorker};
