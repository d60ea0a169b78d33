//! Classifier adapter
//!
//! Wraps a `LanguageModel` with the operational policy the worker relies on:
//! - each attempt is bounded by a timeout
//! - timeouts and transient failures retry with exponential backoff
//! - exhausted retries degrade to UNCERTAIN instead of failing
//! - low-confidence or unrecognised labels degrade to UNCERTAIN
//!
//! Urgency and event times come from `analysis`, which is rule-based and
//! never calls the model.
//!
//! Backends:
//! - `chat`: OpenAI-compatible chat-completions endpoint
//! - `keywords`: deterministic keyword scoring, no network

pub mod analysis;
mod chat;
mod keywords;

pub use analysis::{EventTime, MessageAnalysis};
pub use chat::ChatCompletionsModel;
pub use keywords::KeywordModel;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::config::ClassifierConfig;
use crate::error::{EngineError, Result};
use crate::model::{Category, FeedItem, Verdict};

/// Longest body excerpt sent to the model, in characters
const MAX_BODY_CHARS: usize = 5000;

/// Raw answer from a model, before any policy is applied
#[derive(Debug, Clone, PartialEq)]
pub struct ModelVerdict {
    pub label: String,
    pub confidence: f64,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("transient model failure: {0}")]
    Transient(String),

    #[error("model rejected the request: {0}")]
    Rejected(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Timeout | ModelError::Transient(_))
    }
}

/// An external model that labels a prompt
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    fn classify(&self, prompt: &str) -> std::result::Result<ModelVerdict, ModelError>;
}

/// Threshold and retry settings
#[derive(Debug, Clone)]
pub struct ClassifierPolicy {
    pub threshold: f64,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            max_attempts: 3,
            timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl From<&ClassifierConfig> for ClassifierPolicy {
    fn from(config: &ClassifierConfig) -> Self {
        Self {
            threshold: config.threshold,
            max_attempts: config.max_attempts,
            timeout: Duration::from_secs(config.timeout_secs),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Message metadata that accompanies the text
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageMeta<'a> {
    pub sender: Option<&'a str>,
    pub subject: &'a str,
}

pub struct ClassifierAdapter {
    model: Arc<dyn LanguageModel>,
    policy: ClassifierPolicy,
    local_offset: FixedOffset,
}

impl ClassifierAdapter {
    /// Wall-clock times in message bodies are read as UTC until
    /// `with_local_offset` says otherwise
    pub fn new(model: Arc<dyn LanguageModel>, policy: ClassifierPolicy) -> Self {
        Self {
            model,
            policy,
            local_offset: Utc.fix(),
        }
    }

    pub fn with_local_offset(mut self, offset: FixedOffset) -> Self {
        self.local_offset = offset;
        self
    }

    pub fn policy(&self) -> &ClassifierPolicy {
        &self.policy
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Classify a message; never fails
    pub fn classify(&self, text: &str, meta: MessageMeta<'_>) -> Verdict {
        match self.try_classify(text, meta) {
            Ok(verdict) => verdict,
            Err(e) => {
                log::warn!("Downgrading '{}' to UNCERTAIN: {}", meta.subject, e);
                Verdict::unavailable()
            }
        }
    }

    pub fn classify_item(&self, item: &FeedItem) -> Verdict {
        self.classify(
            &item.content,
            MessageMeta {
                sender: item.sender.as_deref(),
                subject: &item.summary,
            },
        )
    }

    /// Urgency and event time of `item`, as of `now`
    pub fn analyze_item(&self, item: &FeedItem, now: DateTime<Utc>) -> MessageAnalysis {
        analysis::analyze(&item.summary, &item.content, now, self.local_offset)
    }

    /// Classify, reporting `ClassifierUnavailable` once retries are exhausted
    pub fn try_classify(&self, text: &str, meta: MessageMeta<'_>) -> Result<Verdict> {
        let prompt: Arc<str> = Arc::from(build_prompt(text, meta));
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 1;

        loop {
            match self.attempt(&prompt) {
                Ok(raw) => return Ok(self.apply_policy(raw)),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    log::warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        self.model.name(),
                        attempt,
                        max_attempts,
                        e,
                        backoff
                    );
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(EngineError::ClassifierUnavailable(format!(
                        "{} after {} attempt(s)",
                        e, attempt
                    )))
                }
            }
        }
    }

    /// One model call, bounded by the policy timeout.
    ///
    /// The call runs on its own thread; a call that overruns is abandoned
    /// and left to finish in the background.
    fn attempt(&self, prompt: &Arc<str>) -> std::result::Result<ModelVerdict, ModelError> {
        let (tx, rx) = mpsc::channel();
        let model = Arc::clone(&self.model);
        let prompt = Arc::clone(prompt);

        thread::Builder::new()
            .name("classifier-call".to_string())
            .spawn(move || {
                let _ = tx.send(model.classify(&prompt));
            })
            .map_err(|e| ModelError::Transient(format!("failed to spawn model call: {}", e)))?;

        match rx.recv_timeout(self.policy.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ModelError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ModelError::Transient("model call panicked".to_string()))
            }
        }
    }

    fn apply_policy(&self, raw: ModelVerdict) -> Verdict {
        let confidence = if raw.confidence.is_finite() {
            raw.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let label = Category::from_label(&raw.label);
        if label == Category::Uncertain && !raw.label.trim().eq_ignore_ascii_case("uncertain") {
            log::debug!("Unrecognised label '{}' treated as UNCERTAIN", raw.label);
        }

        let (category, rationale) = if confidence < self.policy.threshold {
            let note = format!(
                "{} at {:.2} is below threshold {:.2}",
                label, confidence, self.policy.threshold
            );
            let rationale = match raw.rationale {
                Some(r) if !r.is_empty() => format!("{} ({})", r, note),
                _ => note,
            };
            (Category::Uncertain, Some(rationale))
        } else {
            (label, raw.rationale)
        };

        Verdict {
            category,
            confidence,
            rationale,
        }
    }
}

/// Render the `[FROM]/[SUBJECT]/[BODY]` context block sent to the model
pub fn build_prompt(text: &str, meta: MessageMeta<'_>) -> String {
    let body = text.trim();
    let body = if body.chars().count() > MAX_BODY_CHARS {
        let truncated: String = body.chars().take(MAX_BODY_CHARS).collect();
        format!("{}\n... (truncated)", truncated)
    } else {
        body.to_string()
    };

    format!(
        "[FROM]\n{}\n\n[SUBJECT]\n{}\n\n[BODY]\n{}\n",
        meta.sender.unwrap_or("unknown"),
        meta.subject,
        body
    )
}
