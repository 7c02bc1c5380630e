pub mod chunk;
pub mod digest;
pub mod export;
pub mod health;
pub mod import;
pub mod servers;
pub mod stats;
pub mod summarize;
pub mod users;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::ChunkArgs;
use crate::digest::chunker::Chunker;
use crate::digest::config::DigestConfig;
use crate::digest::import::{LoadedRecords, load_records};
use crate::digest::query::MessageQuery;
use crate::digest::record::MessageRecord;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
            output: None,
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

/// Reference time for relative windows: midnight after `as_of` when given,
/// otherwise the current UTC time.
pub fn reference_now(as_of: Option<NaiveDate>) -> NaiveDateTime {
    match as_of.and_then(|d| d.succ_opt()).and_then(|d| d.and_hms_opt(0, 0, 0)) {
        Some(ts) => ts,
        None => Utc::now().naive_utc(),
    }
}

/// Load exports under `input` and apply `query`, recording load counts on
/// `report`.
pub fn load_filtered(
    input: &Path,
    query: &MessageQuery,
    now: NaiveDateTime,
    report: &mut CommandReport,
) -> Result<Vec<MessageRecord>> {
    let LoadedRecords {
        records, totals, ..
    } = load_records(input).with_context(|| format!("failed to load {}", input.display()))?;
    report.detail(format!("input={}", input.display()));
    report.detail(format!("loaded_messages={}", records.len()));
    if totals.errors > 0 {
        report.detail(format!("unreadable_files={}", totals.errors));
    }
    if query.is_empty() {
        return Ok(records);
    }
    let filtered = query.apply(&records, now);
    report.detail(format!("matched_messages={}", filtered.len()));
    Ok(filtered)
}

/// Chunker plus timestamp flag after applying per-run overrides.
pub fn chunker_for(cfg: &DigestConfig, args: &ChunkArgs) -> Result<(Chunker, bool)> {
    let mut chunker_cfg = cfg.chunker.clone();
    if let Some(max_tokens) = args.max_tokens {
        chunker_cfg.max_tokens = max_tokens;
    }
    let include_timestamps = chunker_cfg.include_timestamps && !args.no_timestamps;
    Ok((chunker_cfg.build()?, include_timestamps))
}

pub fn write_output(path: Option<&PathBuf>, text: &str, report: &mut CommandReport) -> Result<()> {
    let Some(path) = path else {
        report.output = Some(text.to_string());
        return Ok(());
    };
    crate::digest::util::write_atomic(path, &format!("{text}\n"))?;
    report.detail(format!("output_path={}", path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_marks_report_failed_and_merge_keeps_it() {
        let mut report = CommandReport::new("import");
        report.detail("files=2");
        let mut other = CommandReport::new("import");
        other.issue("1 file failed");
        report.merge(other);
        assert!(!report.ok);
        assert_eq!(report.details, vec!["files=2"]);
        assert_eq!(report.issues, vec!["1 file failed"]);
    }

    #[test]
    fn chunker_for_applies_overrides() {
        let cfg = DigestConfig::default();
        let args = ChunkArgs {
            max_tokens: Some(500),
            no_timestamps: true,
        };
        let (chunker, timestamps) = chunker_for(&cfg, &args).expect("chunker");
        assert_eq!(chunker.max_tokens(), 500);
        assert!(!timestamps);

        let zero = ChunkArgs {
            max_tokens: Some(0),
            no_timestamps: false,
        };
        assert!(chunker_for(&cfg, &zero).is_err());
    }

    #[test]
    fn reference_now_uses_end_of_as_of_day() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 14).expect("date");
        assert_eq!(reference_now(Some(day)).to_string(), "2024-03-15 00:00:00");
    }
}
