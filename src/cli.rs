use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::digest::query::MessageQuery;

/// Upper bound for `--days` windows, roughly a century.
const MAX_WINDOW_DAYS: i64 = 36_500;

#[derive(Parser, Debug)]
#[command(
    name = "chat-digest",
    version,
    about = "Chunk exported chat history and summarize it with a local LLM",
    propagate_version = true
)]
pub struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only messages from this server id
    #[arg(long)]
    pub server: Option<u64>,

    /// Channel id or name
    #[arg(long)]
    pub channel: Option<String>,

    /// Author display name or username
    #[arg(long)]
    pub author: Option<String>,

    /// Case-insensitive content search
    #[arg(long)]
    pub search: Option<String>,

    /// Only messages from the last N days
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=MAX_WINDOW_DAYS))]
    pub days: Option<u32>,

    /// Keep only the most recent N matches
    #[arg(long)]
    pub limit: Option<usize>,

    /// Treat this date (YYYY-MM-DD) as today for relative windows
    #[arg(long = "as-of")]
    pub as_of: Option<NaiveDate>,
}

impl FilterArgs {
    pub fn query(&self) -> MessageQuery {
        MessageQuery {
            server_id: self.server,
            channel: self.channel.clone(),
            author: self.author.clone(),
            search: self.search.clone(),
            since_days: self.days,
            limit: self.limit,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ChunkArgs {
    /// Token budget per chunk (overrides config)
    #[arg(long = "max-tokens")]
    pub max_tokens: Option<usize>,

    /// Render lines without the [YYYY-MM-DD HH:MM] prefix
    #[arg(long = "no-timestamps")]
    pub no_timestamps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SummaryTask {
    Faq,
    UserStory,
    Factcheck,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse exports and report new/updated/skipped counts
    Import {
        #[arg(long)]
        input: PathBuf,
    },
    /// Token statistics for a message set
    Stats {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long = "max-tokens")]
        max_tokens: Option<usize>,
    },
    /// Print prompt-ready chunks
    Chunk {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        chunking: ChunkArgs,
        /// Write chunks to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run an LLM analysis over each chunk
    Summarize {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, value_enum)]
        task: SummaryTask,
        /// Topic for factcheck
        #[arg(long)]
        topic: Option<String>,
        #[command(flatten)]
        filter: FilterArgs,
        #[command(flatten)]
        chunking: ChunkArgs,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Build prompts without calling the model
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// Weekly activity digest per server
    Digest {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        server: Option<u64>,
        #[arg(
            long,
            default_value_t = 7,
            value_parser = clap::value_parser!(u32).range(1..=MAX_WINDOW_DAYS)
        )]
        days: u32,
        #[arg(long = "as-of")]
        as_of: Option<NaiveDate>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print the activity data without calling the model
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// Users active in several servers, recent posters, or a name search
    Users {
        #[arg(long)]
        input: PathBuf,
        #[arg(long = "min-servers", default_value_t = 3)]
        min_servers: usize,
        /// Case-insensitive partial match on display name or username
        #[arg(long, conflicts_with = "server")]
        find: Option<String>,
        /// Most active posters in this server id
        #[arg(long)]
        server: Option<u64>,
        #[arg(
            long,
            default_value_t = 30,
            requires = "server",
            value_parser = clap::value_parser!(u32).range(1..=MAX_WINDOW_DAYS)
        )]
        days: u32,
        #[arg(long, default_value_t = 20, requires = "server")]
        limit: usize,
        #[arg(long = "as-of", requires = "server")]
        as_of: Option<NaiveDate>,
    },
    /// Servers present in the exports
    Servers {
        #[arg(long)]
        input: PathBuf,
    },
    /// Run DiscordChatExporter for a guild or channel
    Export {
        #[arg(long, conflicts_with = "channel")]
        guild: Option<u64>,
        #[arg(long)]
        channel: Option<u64>,
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        before: Option<String>,
        /// Output root (defaults to DIGEST_EXPORTS_DIR)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show resolved paths, config, and collaborator readiness
    Health,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let mut lines = vec![format!("command={} ok={}", report.command, report.ok)];
    lines.extend(report.details.iter().cloned());
    lines.extend(report.issues.iter().map(|i| format!("issue: {i}")));

    match report.output.as_deref() {
        Some(output) => {
            println!("{output}");
            for line in lines {
                eprintln!("{line}");
            }
        }
        None => {
            for line in lines {
                println!("{line}");
            }
        }
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match &cli.command {
        Commands::Import { input } => commands::import::run(input)?,
        Commands::Stats {
            input,
            filter,
            max_tokens,
        } => commands::stats::run(input, filter, *max_tokens)?,
        Commands::Chunk {
            input,
            filter,
            chunking,
            output,
        } => commands::chunk::run(input, filter, chunking, output.as_ref())?,
        Commands::Summarize {
            input,
            task,
            topic,
            filter,
            chunking,
            output,
            dry_run,
        } => commands::summarize::run(&commands::summarize::SummarizeOptions {
            input: input.clone(),
            task: *task,
            topic: topic.clone(),
            filter: filter.clone(),
            chunking: chunking.clone(),
            output: output.clone(),
            dry_run: *dry_run,
        })?,
        Commands::Digest {
            input,
            server,
            days,
            as_of,
            output,
            dry_run,
        } => commands::digest::run(&commands::digest::DigestOptions {
            input: input.clone(),
            server: *server,
            days: *days,
            as_of: *as_of,
            output: output.clone(),
            dry_run: *dry_run,
        })?,
        Commands::Users {
            input,
            min_servers,
            find,
            server,
            days,
            limit,
            as_of,
        } => commands::users::run(&commands::users::UsersOptions {
            input: input.clone(),
            min_servers: *min_servers,
            find: find.clone(),
            server: *server,
            days: *days,
            limit: *limit,
            as_of: *as_of,
        })?,
        Commands::Servers { input } => commands::servers::run(input)?,
        Commands::Export {
            guild,
            channel,
            after,
            before,
            output,
        } => commands::export::run(&commands::export::ExportOptions {
            guild: *guild,
            channel: *channel,
            after: after.clone(),
            before: before.clone(),
            output: output.clone(),
        })?,
        Commands::Health => commands::health::run()?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
