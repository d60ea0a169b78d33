//! View command implementation

use anyhow::Result;
use chrono::{Duration, Utc};

use super::{print_json, truncate};
use crate::engine::Engine;
use crate::model::Category;
use crate::view::TimeWindow;

/// Print everything from `hours` back to `hours` ahead, newest first
pub fn run(engine: &Engine, hours: i64, hide_spam: bool, json: bool) -> Result<()> {
    let span = Duration::hours(hours);
    let window = TimeWindow::around(Utc::now(), span, span);
    let items = engine
        .build_view(window)?
        .filter(|item| !(hide_spam && item.category == Category::Spam));

    if json {
        return print_json(&items.collect::<Vec<_>>());
    }

    let mut shown = 0;
    for item in items {
        if shown == 0 {
            println!(
                "{:<12} {:<9} {:<10} {:<20} {}",
                "When", "Source", "Category", "ID", "Summary"
            );
            println!("{}", "-".repeat(100));
        }

        let id = item
            .fingerprint
            .as_ref()
            .map(|f| truncate(f.as_str(), 20))
            .unwrap_or_else(|| "-".to_string());
        let marker = if item.reviewed { "" } else { " *" };

        println!(
            "{:<12} {:<9} {:<10} {:<20} {}{}",
            item.timestamp.format("%m-%d %H:%M"),
            item.source.as_str(),
            item.category,
            id,
            truncate(&item.summary, 45),
            marker,
        );
        shown += 1;
    }

    if shown == 0 {
        println!("Nothing in the last/next {} hours.", hours);
    } else {
        println!("\n{} item(s); * = not reviewed", shown);
    }
    Ok(())
}
