//! Format status, diffs, cycle reports and gc results as text.

use crate::diff::DiffResult;
use crate::gc::GcReport;
use crate::pending::PendingUpload;
use crate::store::AccessDescriptor;
use crate::sync::{CycleReport, Winner};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde::Serialize;

/// Snapshot shown by `hashsync status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub device_id: String,
    pub workspace: String,
    pub local_entries: usize,
    pub local_version: u64,
    pub local_root: String,
    pub base_version: u64,
    pub base_root: String,
    pub remote_version: u64,
    pub remote_root: String,
    pub local_changes: usize,
    pub pending: Vec<PendingRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingRow {
    pub path: String,
    pub content_hash: String,
    pub failed_rounds: u32,
    pub last_error: Option<String>,
}

impl From<&PendingUpload> for PendingRow {
    fn from(upload: &PendingUpload) -> Self {
        Self {
            path: upload.path.clone(),
            content_hash: upload.content_hash.short(),
            failed_rounds: upload.failed_rounds,
            last_error: upload.last_error.clone(),
        }
    }
}

/// Format a section heading with bold/underline.
pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(header);
    table
}

pub fn format_status_text(view: &StatusView) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Sync Status")));
    out.push_str(&format!("  Device: {}\n", view.device_id));
    out.push_str(&format!("  Workspace: {}\n\n", view.workspace));

    let mut trees = table(vec!["Tree", "Version", "Root", "Entries"]);
    trees.add_row(vec![
        "local".to_string(),
        view.local_version.to_string(),
        view.local_root.clone(),
        view.local_entries.to_string(),
    ]);
    trees.add_row(vec![
        "base".to_string(),
        view.base_version.to_string(),
        view.base_root.clone(),
        "-".to_string(),
    ]);
    trees.add_row(vec![
        "authoritative".to_string(),
        view.remote_version.to_string(),
        view.remote_root.clone(),
        "-".to_string(),
    ]);
    out.push_str(&format!("{}\n\n", trees));

    let in_sync = view.local_root == view.base_root
        && view.base_root == view.remote_root
        && view.pending.is_empty();
    if in_sync {
        out.push_str(&format!("  {}\n", "In sync".green()));
    } else {
        out.push_str(&format!(
            "  {} ({} local changes)\n",
            "Out of sync".yellow(),
            view.local_changes
        ));
    }

    if !view.pending.is_empty() {
        out.push_str(&format!("\n{}\n\n", format_section_heading("Pending uploads")));
        let mut pending = table(vec!["Path", "Hash", "Failed rounds", "Last error"]);
        for row in &view.pending {
            pending.add_row(vec![
                row.path.clone(),
                row.content_hash.clone(),
                row.failed_rounds.to_string(),
                row.last_error.clone().unwrap_or_else(|| "-".to_string()),
            ]);
        }
        out.push_str(&format!("{}\n", pending));
    }
    out
}

fn diff_table(diff: &DiffResult) -> Table {
    let mut rows = table(vec!["Change", "Path", "Hash"]);
    for entry in &diff.added {
        rows.add_row(vec!["added".to_string(), entry.path.clone(), entry.content_hash.short()]);
    }
    for modification in &diff.modified {
        rows.add_row(vec![
            "modified".to_string(),
            modification.path.clone(),
            format!("{} -> {}", modification.old_hash.short(), modification.new_hash.short()),
        ]);
    }
    for removal in &diff.removed {
        rows.add_row(vec!["removed".to_string(), removal.path.clone(), removal.content_hash.short()]);
    }
    rows
}

/// Outbound (base to local) and inbound (base to authoritative) changes
pub fn format_diff_text(outbound: &DiffResult, inbound: &DiffResult) -> String {
    let mut out = String::new();
    for (title, diff) in [("Local changes", outbound), ("Remote changes", inbound)] {
        out.push_str(&format!("{}\n\n", format_section_heading(title)));
        if diff.is_empty() {
            out.push_str("  None\n\n");
        } else {
            out.push_str(&format!("{}\n\n", diff_table(diff)));
        }
    }
    out
}

/// Serializable form of a diff for `--format json`
pub fn diff_json(diff: &DiffResult) -> serde_json::Value {
    serde_json::json!({
        "added": diff.added.iter().map(|e| &e.path).collect::<Vec<_>>(),
        "modified": diff.modified.iter().map(|m| &m.path).collect::<Vec<_>>(),
        "removed": diff.removed.iter().map(|r| &r.path).collect::<Vec<_>>(),
    })
}

pub fn format_report_text(report: &CycleReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Sync")));
    out.push_str(&format!("  {}\n", report));
    out.push_str(&format!("  Took {} ms\n\n", report.elapsed.as_millis()));

    let mut moved = table(vec!["Direction", "Path"]);
    let mut any = false;
    for (label, paths) in [
        ("down", &report.downloaded),
        ("deleted", &report.deleted_locally),
        ("up", &report.uploaded),
    ] {
        for path in paths {
            moved.add_row(vec![label.to_string(), path.clone()]);
            any = true;
        }
    }
    if any {
        out.push_str(&format!("{}\n\n", moved));
    }

    if !report.conflicts.is_empty() {
        out.push_str(&format!("{}\n\n", format_section_heading("Conflicts")));
        let mut conflicts = table(vec!["Path", "Winner", "Loser kept at"]);
        for conflict in &report.conflicts {
            let winner = match conflict.winner {
                Winner::Local => "local",
                Winner::Remote => "remote",
            };
            conflicts.add_row(vec![
                conflict.path.clone(),
                winner.to_string(),
                conflict.copy_path.clone().unwrap_or_else(|| "-".to_string()),
            ]);
        }
        out.push_str(&format!("{}\n\n", conflicts));
    }

    if !report.failed.is_empty() {
        out.push_str(&format!("{}\n\n", format_section_heading("Failures")));
        let mut failures = table(vec!["Path", "Error", "Retryable"]);
        for failure in &report.failed {
            failures.add_row(vec![
                failure.path.clone(),
                failure.error.clone(),
                if failure.retryable { "yes" } else { "no" }.to_string(),
            ]);
        }
        out.push_str(&format!("{}\n", failures));
    }
    out
}

pub fn format_gc_text(report: &GcReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Garbage collection")));
    out.push_str(&format!("  Stored objects: {}\n", report.stored));
    out.push_str(&format!("  Referenced: {}\n", report.referenced));
    let verb = if report.dry_run { "Would delete" } else { "Deleted" };
    out.push_str(&format!("  {}: {}\n", verb, report.unreferenced.len()));
    if !report.missing.is_empty() {
        out.push_str(&format!(
            "  {}: {}\n",
            "Missing referenced objects".red(),
            report.missing.len()
        ));
    }
    out
}

pub fn format_descriptor_text(descriptor: &AccessDescriptor) -> String {
    format!(
        "{}\n  Key: {}\n  Expires: {}\n",
        descriptor.url,
        descriptor.key,
        descriptor.expires_at.to_rfc3339()
    )
}
