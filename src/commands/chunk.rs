use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::cli::{ChunkArgs, FilterArgs};
use crate::commands::{CommandReport, chunker_for, load_filtered, reference_now, write_output};
use crate::digest::chunker::format_for_llm;
use crate::digest::config::load_config;
use crate::digest::paths::resolve_paths;

pub fn run(
    input: &Path,
    filter: &FilterArgs,
    chunking: &ChunkArgs,
    output: Option<&PathBuf>,
) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let mut report = CommandReport::new("chunk");

    let (chunker, include_timestamps) = chunker_for(&cfg, chunking)?;
    let records = load_filtered(input, &filter.query(), reference_now(filter.as_of), &mut report)?;

    let chunks = chunker.chunk_messages(&records);
    let total = chunks.len();
    let mut sections = Vec::with_capacity(total);
    for (idx, chunk) in chunks.into_iter().enumerate() {
        let tokens = chunker.total_tokens(chunk);
        if tokens > chunker.max_tokens() {
            report.detail(format!(
                "chunk_{}_oversized_message_tokens={tokens}",
                idx + 1
            ));
        }
        sections.push(format!(
            "### chunk {}/{total} ({} messages, ~{tokens} tokens)\n{}",
            idx + 1,
            chunk.len(),
            format_for_llm(chunk, include_timestamps)
        ));
    }

    report.detail(format!("max_tokens={}", chunker.max_tokens()));
    report.detail(format!("chunks={total}"));
    write_output(output, &sections.join("\n\n"), &mut report)?;
    Ok(report)
}
