//! Plain-text rendering of daemon replies.

use anyhow::Result;
use keywatch_audit::LogEntry;
use keywatch_runtime::pipeline::{ParseOutput, PipelineOutcome, RemoteOutcome};
use keywatch_runtime::{DiscoveredFile, Notification, ServiceStatus};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_entries(entries: &[keywatch_keys::Entry]) {
    for entry in entries {
        println!(
            "  {:<24} +{:<3} {:<32} {} ({})",
            entry.character_name,
            entry.key_level,
            entry.dungeon_name,
            entry.resolved_timestamp.format("%Y-%m-%d %H:%M"),
            entry.source_channel.label(),
        );
    }
}

pub fn print_parse(parsed: &ParseOutput) {
    println!(
        "{} keys ({} extracted, {} skipped blocks, {} over the cap)",
        parsed.entries.len(),
        parsed.extracted,
        parsed.skipped_blocks,
        parsed.truncated
    );
    print_entries(&parsed.entries);
}

pub fn print_outcome(outcome: &PipelineOutcome) {
    println!("{} keys saved", outcome.snapshot.len());
    if outcome.skipped_blocks > 0 {
        println!("{} malformed blocks skipped", outcome.skipped_blocks);
    }
    if outcome.truncated > 0 {
        println!("{} keys dropped by the per-run cap", outcome.truncated);
    }
    match &outcome.remote {
        RemoteOutcome::Skipped => println!("remote sheet not configured"),
        RemoteOutcome::Reconciled(report) => println!(
            "sheet: {} updated, {} appended, {} unchanged",
            report.updated, report.appended, report.skipped
        ),
        RemoteOutcome::Failed(message) => println!("sheet export failed: {message}"),
    }
    print_entries(&outcome.snapshot.entries);
}

pub fn print_files(files: &[DiscoveredFile]) {
    if files.is_empty() {
        println!("no save files found");
        return;
    }
    for file in files {
        println!("{:?}\t{}\t{}", file.flavour, file.account, file.path.display());
    }
}

pub fn print_logs(entries: &[LogEntry]) {
    for entry in entries {
        println!(
            "{} [{:<5}] {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.severity.label(),
            entry.message
        );
    }
}

pub fn print_status(status: &ServiceStatus) {
    println!(
        "watching:   {}",
        status.watch_path.as_deref().unwrap_or("(nothing)")
    );
    println!("state:      {:?}", status.watch_state);
    println!(
        "remote:     {}",
        if status.remote_configured { "configured" } else { "not configured" }
    );
    println!("dungeons:   {}", status.dungeon_count);
    println!("log lines:  {}", status.log_count);
    println!("uptime:     {}s", status.uptime_secs);
}

pub fn print_notification(notification: &Notification) {
    match notification {
        Notification::KeysUpdated { count } => println!("keys updated: {count}"),
        Notification::ExportSucceeded { updated, appended } => {
            println!("sheet updated: {updated} rows changed, {appended} rows added")
        }
        Notification::Failure { title, message } => println!("{title}: {message}"),
    }
}
