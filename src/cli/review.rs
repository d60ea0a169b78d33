//! Review and reclassify command implementations

use anyhow::{Context, Result};

use super::print_json;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::model::{Category, Fingerprint};

pub fn review(
    engine: &Engine,
    fingerprint: &Fingerprint,
    category: Category,
    json: bool,
) -> Result<()> {
    let snapshot = match engine.mark_reviewed(fingerprint, category) {
        Ok(s) => s,
        Err(EngineError::UnknownFingerprint(fp)) => {
            println!("Message '{}' not found.", fp);
            return Ok(());
        }
        Err(e) => return Err(e).context("recording review"),
    };

    if json {
        return print_json(&snapshot);
    }
    println!("✅ {} marked as {}", fingerprint, category);
    println!("{} message(s) pending review", snapshot.pending_count);
    Ok(())
}

pub fn reclassify(engine: &Engine, fingerprint: &Fingerprint, json: bool) -> Result<()> {
    let record = match engine.reclassify(fingerprint) {
        Ok(r) => r,
        Err(EngineError::UnknownFingerprint(fp)) => {
            println!("Message '{}' not found or has no archived text.", fp);
            return Ok(());
        }
        Err(e) => return Err(e).context("reclassifying"),
    };

    if json {
        return print_json(&record);
    }
    println!(
        "{} is now {} ({:.2}), urgency {}",
        record.fingerprint, record.category, record.confidence, record.urgency
    );
    if let Some(rationale) = &record.rationale {
        println!("Rationale: {}", rationale);
    }
    println!("{} message(s) pending review", engine.read_pending_count());
    Ok(())
}
