use anyhow::{Context, Result};
use std::path::Path;

use crate::commands::CommandReport;
use crate::digest::audit;
use crate::digest::import::load_records;
use crate::digest::paths::resolve_paths;

pub fn run(input: &Path) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("import");

    let loaded =
        load_records(input).with_context(|| format!("failed to load {}", input.display()))?;
    if loaded.files.is_empty() {
        report.issue(format!("no json exports found under {}", input.display()));
        return Ok(report);
    }

    for file in &loaded.files {
        report.detail(format!(
            "file={} new={} updated={} skipped={} errors={}",
            file.file, file.new, file.updated, file.skipped, file.errors
        ));
    }
    for channel in &loaded.channels {
        let kind = match (channel.is_thread, channel.parent_channel_id) {
            (true, Some(parent)) => format!("thread of {parent}"),
            (true, None) => "thread".to_string(),
            (false, _) => channel.channel_type.clone(),
        };
        report.detail(format!(
            "channel={} #{} ({}) {kind}",
            channel.server_name, channel.channel_name, channel.channel_id
        ));
    }
    let totals = &loaded.totals;
    report.detail(format!("files_processed={}", loaded.files.len()));
    report.detail(format!("new_messages={}", totals.new));
    report.detail(format!("updated_messages={}", totals.updated));
    report.detail(format!("skipped={}", totals.skipped));
    report.detail(format!("errors={}", totals.errors));
    report.detail(format!("total_messages={}", loaded.records.len()));

    let status = if totals.errors > 0 { "partial" } else { "ok" };
    audit::append_event(
        &paths,
        "import",
        status,
        &format!(
            "{} file(s) from {}: new={} updated={} skipped={} errors={}",
            loaded.files.len(),
            input.display(),
            totals.new,
            totals.updated,
            totals.skipped,
            totals.errors
        ),
    )?;

    if totals.errors > 0 {
        report.issue(format!("{} file(s) could not be imported", totals.errors));
    }
    Ok(report)
}
