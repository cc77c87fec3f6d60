use gti_core::{GtiError, HistoryStore, PhaseHistory};
use log::info;

/// Merged histories are deduplicated per day rather than capped.
const UNBOUNDED: usize = usize::MAX;

pub fn run(history_path: &str, input_path: &str, dry_run: bool) -> Result<(), GtiError> {
    let incoming = PhaseHistory::from_json_str(&std::fs::read_to_string(input_path)?)?;
    let store = HistoryStore::new(history_path, UNBOUNDED);
    let report = store.merge(&incoming, dry_run)?;
    info!(
        "merged {} incoming sample(s) into {history_path}: {} added, {} skipped",
        incoming.len(),
        report.added,
        report.skipped
    );

    println!("Merge {input_path} → {history_path}");
    println!("  Existing kept:    {}", report.existing);
    println!("  Added:            {}", report.added);
    println!("  Skipped (dup day): {}", report.skipped);
    println!("  Total:            {}", report.total);
    if dry_run {
        println!("\nDry run; nothing written.");
    }
    Ok(())
}
