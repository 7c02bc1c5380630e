use crate::digest::util::run_command_with_optional_timeout;
use crate::error::DigestError;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const EXPORTER_BIN_NAME: &str = "DiscordChatExporter.Cli";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    Guild(u64),
    Channel(u64),
}

impl ExportTarget {
    pub fn describe(&self) -> String {
        match self {
            ExportTarget::Guild(id) => format!("guild {id}"),
            ExportTarget::Channel(id) => format!("channel {id}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub target: ExportTarget,
    pub output_dir: PathBuf,
    pub after: Option<String>,
    pub before: Option<String>,
}

pub fn resolve_exporter_bin(configured: Option<&str>) -> Result<PathBuf, DigestError> {
    if let Some(raw) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        let path = PathBuf::from(raw);
        if path.is_file() {
            return Ok(path);
        }
        return Err(DigestError::MissingExporterBinary(format!(
            "DCE_BIN points to a missing file: {raw}"
        )));
    }
    which::which(EXPORTER_BIN_NAME).map_err(|_| {
        DigestError::MissingExporterBinary(format!(
            "{EXPORTER_BIN_NAME} not found; set DCE_BIN or add it to PATH"
        ))
    })
}

/// Arguments for one exporter run. Media downloads are always off; only
/// message JSON is needed.
pub fn build_args(request: &ExportRequest, token: &str) -> Vec<String> {
    let (verb, flag, id) = match &request.target {
        ExportTarget::Guild(id) => ("exportguild", "--guild", id),
        ExportTarget::Channel(id) => ("export", "--channel", id),
    };
    let mut args = vec![
        verb.to_string(),
        "--token".to_string(),
        token.to_string(),
        flag.to_string(),
        id.to_string(),
        "--format".to_string(),
        "Json".to_string(),
        "--output".to_string(),
        request.output_dir.display().to_string(),
        "--media".to_string(),
        "false".to_string(),
    ];
    if matches!(request.target, ExportTarget::Guild(_)) {
        args.push("--reuse-media".to_string());
        args.push("false".to_string());
    }
    if let Some(after) = request.after.as_deref() {
        args.push("--after".to_string());
        args.push(after.to_string());
    }
    if let Some(before) = request.before.as_deref() {
        args.push("--before".to_string());
        args.push(before.to_string());
    }
    args
}

fn json_files_in(dir: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut out = BTreeSet::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
            out.insert(path);
        }
    }
    Ok(out)
}

/// Run the exporter and return the `.json` files it created.
pub fn run_export(
    bin: &Path,
    token: &str,
    request: &ExportRequest,
    timeout_secs: Option<u64>,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&request.output_dir)
        .with_context(|| format!("failed to create {}", request.output_dir.display()))?;
    let before = json_files_in(&request.output_dir)?;

    let mut cmd = Command::new(bin);
    cmd.args(build_args(request, token));
    let output = run_command_with_optional_timeout(&mut cmd, timeout_secs)
        .with_context(|| format!("failed to run `{}`", bin.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        return Err(DigestError::ExporterFailed {
            target: request.target.describe(),
            code: output.status.code().unwrap_or(-1),
            output: if stderr.is_empty() { stdout } else { stderr },
        }
        .into());
    }

    let after = json_files_in(&request.output_dir)?;
    Ok(after.difference(&before).cloned().collect())
}
