use anyhow::Result;

use crate::commands::CommandReport;
use crate::digest::config::{DigestConfig, load_config};
use crate::digest::exporter::resolve_exporter_bin;
use crate::digest::llm::{Completion, OllamaClient};
use crate::digest::paths::{DigestPaths, resolve_paths};

fn check_paths(paths: &DigestPaths) -> CommandReport {
    let mut report = CommandReport::new("health");
    report.detail(format!("digest_home={}", paths.digest_home.display()));
    report.detail(format!(
        "config_file={} exists={}",
        paths.config_file.display(),
        paths.config_file.exists()
    ));
    for (name, path) in [
        ("logs_dir", &paths.logs_dir),
        ("exports_dir", &paths.exports_dir),
        ("prompts_dir", &paths.prompts_dir),
        ("reports_dir", &paths.reports_dir),
    ] {
        let state = if path.is_dir() { "ok" } else { "absent" };
        report.detail(format!("path.{name}={state} ({})", path.display()));
    }
    report
}

fn check_collaborators(cfg: &DigestConfig) -> Result<CommandReport> {
    let mut report = CommandReport::new("health");
    report.detail(format!(
        "chunker.max_tokens={} tokens_per_word={} timestamps={}",
        cfg.chunker.max_tokens, cfg.chunker.tokens_per_word, cfg.chunker.include_timestamps
    ));
    report.detail(format!(
        "export.token={}",
        if cfg.export.token.is_some() { "set" } else { "unset" }
    ));

    match resolve_exporter_bin(cfg.export.bin.as_deref()) {
        Ok(bin) => report.detail(format!("exporter=ok ({})", bin.display())),
        Err(err) => report.issue(format!("exporter={err}")),
    }

    let client = OllamaClient::new(&cfg.ollama)?;
    if client.is_available() {
        report.detail(format!("{}=ready ({})", client.label(), cfg.ollama.host));
    } else {
        report.issue(format!(
            "{}=not_ready ({}); run `ollama serve` and `ollama pull {}`",
            client.label(),
            cfg.ollama.host,
            cfg.ollama.model
        ));
    }
    Ok(report)
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = check_paths(&paths);

    match load_config(&paths) {
        Ok(cfg) => report.merge(check_collaborators(&cfg)?),
        Err(err) => report.issue(format!("config={err:#}")),
    }
    Ok(report)
}
