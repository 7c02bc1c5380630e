use crate::digest::paths::DigestPaths;
use crate::digest::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn audit_log_path(paths: &DigestPaths) -> PathBuf {
    paths.logs_dir.join("audit.log")
}

pub fn append_event(paths: &DigestPaths, phase: &str, status: &str, message: &str) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = audit_log_path(paths);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::paths::DigestPaths;
    use tempfile::tempdir;

    #[test]
    fn append_event_writes_one_json_line_per_call() {
        let tmp = tempdir().expect("tempdir");
        let paths = DigestPaths::rooted_at(tmp.path());

        append_event(&paths, "import", "ok", "3 files").expect("first event");
        append_event(&paths, "digest", "skipped", "no activity").expect("second event");

        let raw = fs::read_to_string(audit_log_path(&paths)).expect("read audit log");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json line");
        assert_eq!(first["phase"], "import");
        assert_eq!(first["status"], "ok");
        assert!(lines[1].contains("\"no activity\""));
    }
}
