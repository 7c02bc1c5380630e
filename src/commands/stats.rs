use anyhow::Result;
use std::path::Path;

use crate::cli::{ChunkArgs, FilterArgs};
use crate::commands::{CommandReport, chunker_for, load_filtered, reference_now};
use crate::digest::chunker::DEFAULT_MAX_TOKENS;
use crate::digest::config::load_config;
use crate::digest::paths::resolve_paths;

pub fn run(input: &Path, filter: &FilterArgs, max_tokens: Option<usize>) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let mut report = CommandReport::new("stats");

    let (chunker, _) = chunker_for(
        &cfg,
        &ChunkArgs {
            max_tokens,
            no_timestamps: false,
        },
    )?;
    let records = load_filtered(input, &filter.query(), reference_now(filter.as_of), &mut report)?;

    let stats = chunker.stats(&records);
    report.detail(format!("total_messages={}", stats.total_messages));
    report.detail(format!("total_tokens={}", stats.total_tokens));
    report.detail(format!(
        "tokens_per_word={}",
        chunker.estimator().tokens_per_word()
    ));
    report.detail(format!(
        "avg_tokens_per_message={:.1}",
        stats.avg_tokens_per_message
    ));
    report.detail(format!(
        "estimated_chunks={} (budget {DEFAULT_MAX_TOKENS})",
        stats.estimated_chunks
    ));

    if chunker.max_tokens() != DEFAULT_MAX_TOKENS {
        let at_budget = chunker.stats_with_budget(&records, chunker.max_tokens());
        report.detail(format!(
            "estimated_chunks_at_budget={} (budget {})",
            at_budget.estimated_chunks,
            chunker.max_tokens()
        ));
    }
    report.detail(format!(
        "actual_chunks={}",
        chunker.chunk_messages(&records).len()
    ));
    Ok(report)
}
