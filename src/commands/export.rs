use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::commands::CommandReport;
use crate::digest::audit;
use crate::digest::config::{ExportConfig, load_config};
use crate::digest::exporter::{ExportRequest, ExportTarget, resolve_exporter_bin, run_export};
use crate::digest::paths::resolve_paths;
use crate::digest::warn;
use crate::error::DigestError;

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub guild: Option<u64>,
    pub channel: Option<u64>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub output: Option<PathBuf>,
}

fn parse_id(raw: &str) -> Result<u64, DigestError> {
    raw.trim().parse::<u64>().map_err(|_| {
        DigestError::InvalidConfig(format!("export target `{}` is not a numeric id", raw.trim()))
    })
}

/// Explicit flags win; otherwise every configured guild and channel. Ids
/// name output directories, so anything but a snowflake is rejected.
fn targets(opts: &ExportOptions, cfg: &ExportConfig) -> Result<Vec<ExportTarget>, DigestError> {
    if let Some(guild) = opts.guild {
        return Ok(vec![ExportTarget::Guild(guild)]);
    }
    if let Some(channel) = opts.channel {
        return Ok(vec![ExportTarget::Channel(channel)]);
    }
    let guilds = cfg
        .guilds
        .iter()
        .map(|id| parse_id(id).map(ExportTarget::Guild));
    let channels = cfg
        .channels
        .iter()
        .map(|id| parse_id(id).map(ExportTarget::Channel));
    guilds.chain(channels).collect()
}

/// Guild exports get a directory per guild id; single channels share one.
fn target_dir(root: &Path, target: &ExportTarget) -> PathBuf {
    match target {
        ExportTarget::Guild(id) => root.join(id.to_string()),
        ExportTarget::Channel(_) => root.join("channels"),
    }
}

pub fn run(opts: &ExportOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let mut report = CommandReport::new("export");

    let token = cfg.export.token.clone().ok_or_else(|| {
        DigestError::InvalidConfig("DISCORD_TOKEN is not set (env, .env, or [export] token)".into())
    })?;
    let targets = targets(opts, &cfg.export)?;
    if targets.is_empty() {
        return Err(DigestError::InvalidConfig(
            "no export targets; pass --guild/--channel or set DCE_GUILDS/DCE_CHANNELS".into(),
        )
        .into());
    }
    let bin = resolve_exporter_bin(cfg.export.bin.as_deref())?;
    let root = opts.output.clone().unwrap_or_else(|| paths.exports_dir.clone());
    let after = opts.after.clone().or_else(|| cfg.export.after_date.clone());

    report.detail(format!("exporter={}", bin.display()));
    report.detail(format!("output_root={}", root.display()));
    if let Some(after) = after.as_deref() {
        report.detail(format!("after={after}"));
    }

    for target in targets {
        let request = ExportRequest {
            output_dir: target_dir(&root, &target),
            target,
            after: after.clone(),
            before: opts.before.clone(),
        };
        let described = request.target.describe();
        match run_export(&bin, &token, &request, cfg.export.timeout_secs) {
            Ok(files) => {
                report.detail(format!(
                    "target={described} new_files={} dir={}",
                    files.len(),
                    request.output_dir.display()
                ));
                audit::append_event(
                    &paths,
                    "export",
                    "ok",
                    &format!("{described}: {} new file(s)", files.len()),
                )?;
            }
            Err(err) => {
                warn::emit("export_failed", "export", &described, &format!("{err:#}"));
                audit::append_event(&paths, "export", "failed", &format!("{described}: {err:#}"))?;
                report.issue(format!("{described}: {err:#}"));
            }
        }
    }
    Ok(report)
}
