//! Output formatting for human and JSON modes.

use indexsync::{Error, IndexHealth, ProgressSnapshot, RunExit, SyncStatus};
use serde::Serialize;
use std::collections::BTreeSet;

/// Output mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Plain text
    Human,
    /// One JSON document per result
    Json,
}

/// Format a progress snapshot.
pub fn format_snapshot(snapshot: &ProgressSnapshot, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_json(snapshot),
        OutputMode::Human => {
            let mut out = snapshot.message();
            if matches!(snapshot.status, SyncStatus::Running | SyncStatus::Paused) && snapshot.total_items > 0 {
                out.push_str(&format!(" ({:.0}%)", snapshot.fraction() * 100.0));
            }
            if let Some(trigger) = snapshot.trigger {
                out.push_str(&format!("\n  started from: {}", trigger));
            }
            if let Some(index) = &snapshot.current_index_name {
                out.push_str(&format!("\n  current index: {}", index));
            }
            for (index, count) in &snapshot.per_index_counts {
                out.push_str(&format!("\n  {}: {} indexed", index, count));
            }
            if snapshot.failed_count > 0 {
                out.push_str(&format!("\n  failed: {}", snapshot.failed_count));
            }
            out
        }
    }
}

/// Format how a run left the foreground.
pub fn format_exit(exit: &RunExit, snapshot: &ProgressSnapshot, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => format_snapshot(snapshot, mode),
        OutputMode::Human => match exit {
            RunExit::Completed { processed_count } => {
                let mut out = format!("Number of items synced: {}", processed_count);
                for (index, count) in &snapshot.per_index_counts {
                    out.push_str(&format!("\n  {}: {}", index, count));
                }
                if snapshot.failed_count > 0 {
                    out.push_str(&format!("\n  failed: {}", snapshot.failed_count));
                }
                out.push('\n');
                out.push_str(&snapshot.message());
                out
            }
            RunExit::Paused => format!(
                "{} at {}/{}",
                snapshot.message(),
                snapshot.processed_count,
                snapshot.total_items
            ),
            RunExit::Cancelled => snapshot.message(),
            RunExit::Failed(message) => format!("Sync failed: {}", message),
            RunExit::Superseded => "Sync continues in another worker".to_string(),
            RunExit::LockLost => "Sync lock was taken over; stopped".to_string(),
        },
    }
}

/// Format index health.
pub fn format_health(health: &[IndexHealth], mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_json(&health),
        OutputMode::Human => health
            .iter()
            .map(|h| {
                let count = h
                    .document_count
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "missing".to_string());
                let state = if h.enabled { "" } else { " (disabled)" };
                format!("{} [{}]: {}{}", h.index_name, h.physical_name, count, state)
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Format a list of index names.
pub fn format_names<'a>(names: impl IntoIterator<Item = &'a String>, mode: OutputMode) -> String {
    let names: Vec<&String> = names.into_iter().collect();
    match mode {
        OutputMode::Json => to_json(&names),
        OutputMode::Human => names.iter().map(|n| n.as_str()).collect::<Vec<_>>().join("\n"),
    }
}

/// Format enabled features.
pub fn format_features(enabled: &BTreeSet<String>, mode: OutputMode) -> String {
    format_names(enabled, mode)
}

/// Format an error for stderr.
pub fn format_error(err: &Error, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => {
            let kind = match err {
                Error::Busy(_) => "busy",
                Error::InvalidTransition(_) => "invalid_transition",
                Error::Config(_) => "config",
                Error::BackendTransient(_) | Error::Backend(_) => "backend",
                Error::ContentSource(_) => "content",
                Error::Storage(_) | Error::Conflict(_) | Error::Io(_) => "storage",
                Error::Serialization(_) | Error::Internal(_) => "internal",
            };
            serde_json::json!({ "error": kind, "message": err.to_string() }).to_string()
        }
        // Busy is a user-facing condition, not an error report
        OutputMode::Human if err.is_busy() => err.to_string(),
        OutputMode::Human => format!("(error) {}", err),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
}
