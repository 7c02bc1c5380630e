use anyhow::Result;
use std::path::PathBuf;

use crate::cli::{ChunkArgs, FilterArgs, SummaryTask};
use crate::commands::{CommandReport, chunker_for, load_filtered, reference_now, write_output};
use crate::digest::chunker::estimate_tokens;
use crate::digest::audit;
use crate::digest::config::load_config;
use crate::digest::llm::{Completion, OllamaClient, Processor, PromptLibrary};
use crate::digest::paths::resolve_paths;
use crate::digest::record::{ChatMessage, MessageRecord};
use crate::digest::util::truncate_with_ellipsis;
use crate::digest::warn;

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub input: PathBuf,
    pub task: SummaryTask,
    pub topic: Option<String>,
    pub filter: FilterArgs,
    pub chunking: ChunkArgs,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
}

/// Stands in for the model on `--dry-run`: the reply is the filled prompt.
struct EchoCompletion;

impl Completion for EchoCompletion {
    fn generate(&self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn label(&self) -> String {
        "dry-run".to_string()
    }
}

impl SummaryTask {
    fn name(self) -> &'static str {
        match self {
            SummaryTask::Faq => "faq",
            SummaryTask::UserStory => "user-story",
            SummaryTask::Factcheck => "factcheck",
        }
    }
}

/// Channel name for FAQs, author for user stories, topic for fact checks.
fn task_label(opts: &SummarizeOptions, records: &[MessageRecord]) -> Option<String> {
    match opts.task {
        SummaryTask::Factcheck => opts
            .topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToOwned::to_owned),
        SummaryTask::Faq => opts.filter.channel.clone().or_else(|| {
            records
                .first()
                .map(|r| r.channel_name.clone().unwrap_or_else(|| "unknown".to_string()))
        }),
        SummaryTask::UserStory => opts
            .filter
            .author
            .clone()
            .or_else(|| records.first().map(|r| r.author().to_string())),
    }
}

fn analyze<C: Completion>(
    processor: &Processor<C>,
    task: SummaryTask,
    text: &str,
    label: &str,
) -> Result<String> {
    match task {
        SummaryTask::Faq => processor.channel_summary_faq(text, label),
        SummaryTask::UserStory => processor.user_story(text, label),
        SummaryTask::Factcheck => processor.factcheck(text, label),
    }
}

/// Result of running every chunk through the model. A failed call stops the
/// run; `text` still holds the parts that completed before it.
#[derive(Debug)]
struct BlockAnalysis {
    text: String,
    completed: usize,
    failure: Option<(usize, anyhow::Error)>,
}

fn analyze_blocks<C: Completion>(
    processor: &Processor<C>,
    task: SummaryTask,
    blocks: &[String],
    label: &str,
) -> BlockAnalysis {
    let total = blocks.len();
    let mut parts = Vec::with_capacity(total);
    let mut failure = None;
    for (idx, block) in blocks.iter().enumerate() {
        match analyze(processor, task, block, label) {
            Ok(part) if total == 1 => parts.push(part),
            Ok(part) => parts.push(format!("## part {}/{total}\n\n{part}", idx + 1)),
            Err(err) => {
                failure = Some((idx + 1, err));
                break;
            }
        }
    }
    BlockAnalysis {
        text: parts.join("\n\n"),
        completed: parts.len(),
        failure,
    }
}

pub fn run(opts: &SummarizeOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let mut report = CommandReport::new("summarize");
    report.detail(format!("task={}", opts.task.name()));

    if opts.task == SummaryTask::Factcheck
        && opts.topic.as_deref().is_none_or(|t| t.trim().is_empty())
    {
        report.issue("factcheck requires --topic");
        return Ok(report);
    }

    let (chunker, include_timestamps) = chunker_for(&cfg, &opts.chunking)?;
    let records = load_filtered(
        &opts.input,
        &opts.filter.query(),
        reference_now(opts.filter.as_of),
        &mut report,
    )?;
    if records.is_empty() {
        report.issue("no messages matched the filters");
        return Ok(report);
    }

    let label = task_label(opts, &records).unwrap_or_else(|| "unknown".to_string());
    let blocks = chunker.chunk_and_format(&records, include_timestamps);
    report.detail(format!("label={label}"));
    report.detail(format!("chunks={} (max_tokens {})", blocks.len(), chunker.max_tokens()));

    let prompts = PromptLibrary::new(Some(paths.prompts_dir.clone()));
    let analysis = if opts.dry_run {
        let processor = Processor::new(EchoCompletion, prompts);
        report.detail(format!("model={}", processor.client().label()));
        analyze_blocks(&processor, opts.task, &blocks, &label)
    } else {
        let processor = Processor::new(OllamaClient::new(&cfg.ollama)?, prompts);
        report.detail(format!("model={}", processor.client().label()));
        if !processor.is_ready() {
            warn::emit(
                "llm_not_ready",
                "summarize",
                &cfg.ollama.host,
                &format!("model {} not listed by /api/tags", cfg.ollama.model),
            );
            report.issue(format!(
                "ollama at {} is not serving `{}`; start `ollama serve` and `ollama pull {}`",
                cfg.ollama.host, cfg.ollama.model, cfg.ollama.model
            ));
            return Ok(report);
        }
        analyze_blocks(&processor, opts.task, &blocks, &label)
    };

    if let Some((failed_chunk, err)) = analysis.failure {
        let reason = format!("chunk {failed_chunk}/{} failed: {err:#}", blocks.len());
        warn::emit("llm_call_failed", "summarize", &label, &reason);
        report.detail(format!("completed_chunks={}", analysis.completed));
        report.issue(reason.clone());
        if !opts.dry_run {
            audit::append_event(&paths, "summarize", "failed", &format!("{label}: {reason}"))?;
        }
        if analysis.completed > 0 {
            write_output(opts.output.as_ref(), &analysis.text, &mut report)?;
        }
        return Ok(report);
    }

    let text = analysis.text;
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    report.detail(format!(
        "preview={}",
        truncate_with_ellipsis(first_line.trim(), PREVIEW_CHARS)
    ));
    report.detail(format!("output_tokens={}", estimate_tokens(&text)));
    if !opts.dry_run {
        audit::append_event(
            &paths,
            "summarize",
            "ok",
            &format!(
                "{} over {} message(s) in {} chunk(s) for {label}",
                opts.task.name(),
                records.len(),
                blocks.len()
            ),
        )?;
    }
    write_output(opts.output.as_ref(), &text, &mut report)?;
    Ok(report)
}
