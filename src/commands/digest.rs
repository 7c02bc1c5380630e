use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;

use crate::commands::{CommandReport, reference_now, write_output};
use crate::digest::audit;
use crate::digest::config::load_config;
use crate::digest::import::load_records;
use crate::digest::llm::{OllamaClient, Processor, PromptLibrary};
use crate::digest::paths::resolve_paths;
use crate::digest::query::{ServerSummary, server_summaries, server_summary};
use crate::digest::util::write_atomic;

#[derive(Debug, Clone)]
pub struct DigestOptions {
    pub input: PathBuf,
    pub server: Option<u64>,
    pub days: u32,
    pub as_of: Option<NaiveDate>,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
}

fn section_heading(summary: &ServerSummary) -> String {
    format!(
        "# {} ({} messages, {} users, last {} days)",
        summary.server_name, summary.total_messages, summary.active_users, summary.days
    )
}

pub fn run(opts: &DigestOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let mut report = CommandReport::new("digest");

    let loaded = load_records(&opts.input)
        .with_context(|| format!("failed to load {}", opts.input.display()))?;
    let now = reference_now(opts.as_of);
    let summaries: Vec<ServerSummary> = match opts.server {
        Some(id) => server_summary(&loaded.records, id, opts.days, now)
            .into_iter()
            .collect(),
        None => server_summaries(&loaded.records, None, opts.days, now),
    };
    report.detail(format!("loaded_messages={}", loaded.records.len()));
    report.detail(format!("window_end={}", now.format("%Y-%m-%d %H:%M")));
    report.detail(format!("active_servers={}", summaries.len()));

    if summaries.is_empty() {
        match opts.server {
            Some(id) => report.issue(format!(
                "server {id} has no messages in the last {} days",
                opts.days
            )),
            None => report.detail("no server activity in window; nothing to digest"),
        }
        return Ok(report);
    }

    if opts.dry_run {
        let data = serde_json::to_string_pretty(&summaries)?;
        write_output(opts.output.as_ref(), &data, &mut report)?;
        return Ok(report);
    }

    let processor = Processor::new(
        OllamaClient::new(&cfg.ollama)?,
        PromptLibrary::new(Some(paths.prompts_dir.clone())),
    );
    if !processor.is_ready() {
        report.issue(format!(
            "ollama at {} is not serving `{}`; rerun with --dry-run to inspect the activity data",
            cfg.ollama.host, cfg.ollama.model
        ));
        return Ok(report);
    }

    let stamp = now.format("%Y-%m-%d");
    let mut sections = Vec::with_capacity(summaries.len());
    for summary in &summaries {
        let data = serde_json::to_string_pretty(summary)?;
        let body = processor
            .weekly_digest(&data)
            .with_context(|| format!("digest failed for server {}", summary.server_id))?;
        let section = format!("{}\n\n{body}", section_heading(summary));

        let report_path = paths
            .reports_dir
            .join(format!("digest-{}-{stamp}.md", summary.server_id));
        write_atomic(&report_path, &format!("{section}\n"))?;
        report.detail(format!(
            "server={} messages={} report={}",
            summary.server_id,
            summary.total_messages,
            report_path.display()
        ));
        sections.push(section);
    }

    audit::append_event(
        &paths,
        "digest",
        "ok",
        &format!(
            "{} server(s), {} day window ending {stamp}",
            summaries.len(),
            opts.days
        ),
    )?;
    write_output(opts.output.as_ref(), &sections.join("\n\n"), &mut report)?;
    Ok(report)
}
