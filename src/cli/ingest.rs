//! Poll and watch command implementations

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use super::print_json;
use crate::engine::Engine;
use crate::feed::FeedRegistry;
use crate::worker::{run_scheduled, CycleReport, FeedOutcome};

pub fn poll(engine: &Engine, registry: &FeedRegistry, json: bool) -> Result<()> {
    let feeds = registry.mail_feeds();
    if feeds.is_empty() {
        println!("No mail feed configured. Set feeds.mail.path in mailsieve.yaml.");
        return Ok(());
    }

    if json {
        return print_json(&engine.worker(feeds).run_cycle());
    }

    for feed in registry.all() {
        let status = if feed.is_available() { "" } else { " [missing]" };
        println!("📡 {}{}", feed.description(), status);
    }
    println!("Classifying with {}\n", engine.model_name());

    let report = engine.worker(feeds).run_cycle();
    print_report(&report);
    Ok(())
}

/// Run the worker on its interval until Ctrl-C
pub fn watch(engine: &Engine, registry: &FeedRegistry, interval: Duration) -> Result<()> {
    let feeds = registry.mail_feeds();
    if feeds.is_empty() {
        println!("No mail feed configured. Set feeds.mail.path in mailsieve.yaml.");
        return Ok(());
    }

    let worker = Arc::new(engine.worker(feeds));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    println!(
        "Watching for new mail every {}s, {} pending. Ctrl-C to stop.",
        interval.as_secs(),
        engine.read_pending_count()
    );

    let stopper = worker.shutdown_handle();
    runtime.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupt received, finishing the current message");
                stopper.request();
            }
        });
        run_scheduled(Arc::clone(&worker), interval).await;
    });

    println!("Stopped. {} pending.", engine.read_pending_count());
    Ok(())
}

fn print_report(report: &CycleReport) {
    if report.skipped {
        println!("Another ingestion cycle is running; skipped.");
        return;
    }

    for feed in &report.feeds {
        let status = match &feed.outcome {
            FeedOutcome::Committed => "committed".to_string(),
            FeedOutcome::NothingToCommit => "up to date".to_string(),
            FeedOutcome::FetchFailed(e) => format!("fetch failed: {}", e),
            FeedOutcome::PersistenceFailed(e) => format!("not committed: {}", e),
            FeedOutcome::Interrupted => "interrupted".to_string(),
        };
        println!(
            "📬 {}: {} fetched, {} classified, {} already known, {} conflicts ({})",
            feed.feed, feed.fetched, feed.classified, feed.deduplicated, feed.conflicts, status
        );
    }

    match report.pending_count {
        Some(count) => println!("\n{} message(s) pending review", count),
        None => println!("\nPending count could not be refreshed"),
    }
}
