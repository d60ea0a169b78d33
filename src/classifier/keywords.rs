//! Keyword-scoring backend
//!
//! Weighted keyword inventory per category. The winning category's share of
//! the evidence becomes the confidence, so a single weak hit stays below a
//! typical threshold and ends up in review.

use super::{LanguageModel, ModelError, ModelVerdict};
use crate::model::Category;

/// Extra mass in the confidence denominator; damps thin evidence
const EVIDENCE_PRIOR: u32 = 4;

const KEYWORDS: &[(&str, Category, u32)] = &[
    // SPAM
    ("unsubscribe", Category::Spam, 10),
    ("수신거부", Category::Spam, 10),
    ("newsletter", Category::Spam, 6),
    ("뉴스레터", Category::Spam, 6),
    ("광고", Category::Spam, 6),
    ("promotion", Category::Spam, 5),
    ("프로모션", Category::Spam, 5),
    ("discount", Category::Spam, 5),
    ("할인", Category::Spam, 5),
    ("coupon", Category::Spam, 5),
    ("쿠폰", Category::Spam, 5),
    ("webinar", Category::Spam, 4),
    ("free", Category::Spam, 2),
    // SCHEDULE
    ("zoom", Category::Schedule, 6),
    ("google meet", Category::Schedule, 6),
    ("meet.google.com", Category::Schedule, 6),
    ("teams", Category::Schedule, 5),
    ("interview", Category::Schedule, 5),
    ("면접", Category::Schedule, 5),
    ("meeting", Category::Schedule, 4),
    ("회의", Category::Schedule, 4),
    ("미팅", Category::Schedule, 4),
    ("invitation", Category::Schedule, 4),
    ("초대", Category::Schedule, 4),
    ("일정", Category::Schedule, 4),
    ("seminar", Category::Schedule, 3),
    ("세미나", Category::Schedule, 3),
    ("workshop", Category::Schedule, 3),
    ("appointment", Category::Schedule, 3),
    // TASK
    ("please reply", Category::Task, 6),
    ("회신", Category::Task, 6),
    ("submit", Category::Task, 6),
    ("제출", Category::Task, 6),
    ("deadline", Category::Task, 5),
    ("마감", Category::Task, 5),
    ("review", Category::Task, 5),
    ("검토", Category::Task, 5),
    ("approve", Category::Task, 5),
    ("승인", Category::Task, 5),
    ("request", Category::Task, 5),
    ("요청", Category::Task, 5),
    ("feedback", Category::Task, 4),
    ("피드백", Category::Task, 4),
];

#[derive(Debug, Default)]
pub struct KeywordModel;

impl KeywordModel {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageModel for KeywordModel {
    fn name(&self) -> &str {
        "keywords"
    }

    fn classify(&self, prompt: &str) -> Result<ModelVerdict, ModelError> {
        let text = prompt.to_lowercase();
        let categories = [Category::Schedule, Category::Task, Category::Spam];
        let mut scores = [0u32; 3];
        let mut matched: Vec<&str> = vec![];

        for (keyword, category, weight) in KEYWORDS {
            if text.contains(keyword) {
                if let Some(slot) = categories.iter().position(|c| c == category) {
                    scores[slot] += weight;
                    matched.push(*keyword);
                }
            }
        }

        let total: u32 = scores.iter().sum();
        if total == 0 {
            return Ok(ModelVerdict {
                label: Category::Uncertain.as_str().to_string(),
                confidence: 0.0,
                rationale: Some("no keyword signals".to_string()),
            });
        }

        // First category wins ties; the confidence already reflects the split
        let mut best = 0;
        for slot in 1..scores.len() {
            if scores[slot] > scores[best] {
                best = slot;
            }
        }
        let runner_up = total - scores[best];
        let confidence =
            f64::from(scores[best]) / f64::from(scores[best] + runner_up + EVIDENCE_PRIOR);

        Ok(ModelVerdict {
            label: categories[best].as_str().to_string(),
            confidence,
            rationale: Some(format!("keywords: {}", matched.join(", "))),
        })
    }
}
