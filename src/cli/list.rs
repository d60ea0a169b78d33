//! List, pending and show command implementations

use anyhow::Result;
use serde::Serialize;

use super::{print_json, truncate};
use crate::engine::Engine;
use crate::model::{ClassificationRecord, FeedItem, Fingerprint, ReviewEvent};
use crate::store::Store;

/// Everything `show` knows about one message
#[derive(Serialize)]
struct MessageDetail {
    record: ClassificationRecord,
    message: Option<FeedItem>,
    reviews: Vec<ReviewEvent>,
}

/// `urgent` lists settled tasks at or above that urgency instead
pub fn run(engine: &Engine, pending_only: bool, urgent: Option<u8>, json: bool) -> Result<()> {
    let records = match urgent {
        Some(min) => engine.urgent_tasks(min)?,
        None => engine.records(pending_only)?,
    };

    if json {
        return print_json(&records);
    }

    if records.is_empty() {
        if urgent.is_some() {
            println!("No urgent tasks.");
        } else if pending_only {
            println!("Nothing pending review.");
        } else {
            println!("No messages classified yet. Run 'mailsieve poll' first.");
        }
        return Ok(());
    }

    println!(
        "{:<12} {:<20} {:<10} {:>5} {:>3} {:<3} {}",
        "Received", "ID", "Category", "Conf", "Urg", "Rev", "Subject"
    );
    println!("{}", "-".repeat(100));

    for record in records {
        println!(
            "{:<12} {:<20} {:<10} {:>5.2} {:>3} {:<3} {}",
            record.received_at.format("%m-%d %H:%M"),
            truncate(record.fingerprint.as_str(), 20),
            record.category,
            record.confidence,
            record.urgency,
            if record.reviewed { "✓" } else { "" },
            truncate(&record.summary, 40),
        );
    }

    Ok(())
}

/// Print the badge value
pub fn pending(engine: &Engine, json: bool) -> Result<()> {
    let snapshot = engine.notification_snapshot();
    if json {
        return print_json(&*snapshot);
    }
    println!("{} message(s) pending review", snapshot.pending_count);
    if let Some(at) = snapshot.last_updated {
        println!("Updated {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

pub fn show(engine: &Engine, store: &Store, fingerprint: &Fingerprint, json: bool) -> Result<()> {
    let record = match engine.lookup(fingerprint)? {
        Some(r) => r,
        None => {
            println!("Message '{}' not found.", fingerprint);
            return Ok(());
        }
    };
    let message = engine.archived(fingerprint)?;
    let history = store.review_history(fingerprint)?;

    if json {
        return print_json(&MessageDetail {
            record,
            message,
            reviews: history,
        });
    }

    println!("\n{}", "=".repeat(80));
    println!("Message: {}", record.fingerprint);
    println!("Subject: {}", record.summary);
    println!(
        "Received: {} | Classified: {}",
        record.received_at.format("%Y-%m-%d %H:%M"),
        record.classified_at.format("%Y-%m-%d %H:%M")
    );
    println!(
        "Category: {} ({:.2}) | Urgency: {}{}",
        record.category,
        record.confidence,
        record.urgency,
        if record.reviewed { " | reviewed" } else { "" }
    );
    if let (Some(start), Some(end)) = (record.event_start, record.event_end) {
        println!(
            "Event: {} - {}",
            start.format("%Y-%m-%d %H:%M UTC"),
            end.format("%Y-%m-%d %H:%M UTC")
        );
    }
    if let Some(rationale) = &record.rationale {
        println!("Rationale: {}", rationale);
    }
    println!("{}", "=".repeat(80));

    match message {
        Some(item) => {
            if let Some(sender) = &item.sender {
                println!("From: {}", sender);
            }
            println!("\n{}", item.content);
        }
        None => println!("\n[No archived text]"),
    }

    if !history.is_empty() {
        println!("\n{}", "-".repeat(40));
        for event in history {
            println!(
                "{} reviewed {} -> {}",
                event.reviewed_at.format("%Y-%m-%d %H:%M"),
                event.previous_category,
                event.final_category
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, FeedId, Verdict};
    use chrono::Utc;

    #[test]
    fn test_message_detail_serializes_for_scripts() {
        let fingerprint = Fingerprint::from_source(FeedId::Mail, "42");
        let record = ClassificationRecord::new(
            fingerprint.clone(),
            Verdict {
                category: Category::Task,
                confidence: 0.8,
                rationale: None,
            },
            "Submit report",
            Utc::now(),
        );
        let detail = MessageDetail {
            record,
            message: None,
            reviews: vec![ReviewEvent {
                fingerprint,
                previous_category: Category::Uncertain,
                final_category: Category::Task,
                reviewed_at: Utc::now(),
            }],
        };

        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["record"]["fingerprint"], "mail:42");
        assert_eq!(value["record"]["category"], "TASK");
        assert_eq!(value["record"]["urgency"], 0);
        assert!(value["record"]["event_start"].is_null());
        assert!(value["message"].is_null());
        assert_eq!(value["reviews"][0]["previous_category"], "UNCERTAIN");
    }
}
