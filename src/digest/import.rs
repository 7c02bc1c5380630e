//! DiscordChatExporter JSON parsing.
//!
//! Each export file covers one channel or thread. Files are parsed into
//! [`MessageRecord`]s and merged by message id, so re-importing overlapping
//! exports is idempotent: a repeated id replaces the earlier row and is
//! counted as an update.

use crate::digest::record::MessageRecord;
use crate::digest::warn;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Channel types that mean the exported "channel" is really a thread.
pub const THREAD_CHANNEL_TYPES: [&str; 3] =
    ["GuildPublicThread", "GuildPrivateThread", "GuildNewsThread"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub file: String,
    pub new: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ImportStats {
    fn for_file(path: &Path) -> Self {
        Self {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            ..Self::default()
        }
    }

    pub fn absorb(&mut self, other: &ImportStats) {
        self.new += other.new;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportChannel {
    pub server_id: u64,
    pub server_name: String,
    pub channel_id: u64,
    pub channel_name: String,
    pub channel_type: String,
    pub is_thread: bool,
    pub parent_channel_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ParsedExport {
    pub channel: Option<ExportChannel>,
    pub records: Vec<MessageRecord>,
    pub stats: ImportStats,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    pub records: Vec<MessageRecord>,
    pub files: Vec<ImportStats>,
    pub channels: Vec<ExportChannel>,
    pub totals: ImportStats,
}

/// Parse an exporter timestamp (`2024-01-15T14:32:00.000+00:00`) into naive
/// UTC. Offset-less values are taken as UTC already.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Discord ids show up both as JSON strings and as numbers.
pub fn parse_discord_id(raw: Option<&Value>) -> Option<u64> {
    match raw? {
        Value::String(s) => s.trim().parse::<u64>().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Server display name for an author: nickname over name, with the legacy
/// `#1234` discriminator kept when it is a real tag.
pub fn format_username(author: &Value) -> String {
    let name = author
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let display = author
        .get("nickname")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .unwrap_or(name);
    match author.get("discriminator").and_then(Value::as_str) {
        Some(tag) if !tag.is_empty() && tag != "0000" && tag != "0" => {
            format!("{display}#{tag}")
        }
        _ => display.to_string(),
    }
}

fn collect_json_files_into(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_json_files_into(&path, out)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            out.push(path);
        }
    }
    Ok(())
}

/// A file is returned as-is; a directory is searched recursively for
/// `*.json`, sorted by path.
pub fn collect_json_files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        anyhow::bail!("input path does not exist: {}", input.display());
    }
    let mut files = Vec::new();
    collect_json_files_into(input, &mut files)?;
    files.sort();
    if files.is_empty() {
        warn::emit(
            "no_json_files",
            "import",
            &input.display().to_string(),
            "directory has no .json exports",
        );
    }
    Ok(files)
}

fn parse_channel(data: &Value, stats: &mut ImportStats) -> Option<ExportChannel> {
    let guild = data.get("guild").unwrap_or(&Value::Null);
    let Some(server_id) = parse_discord_id(guild.get("id")) else {
        warn::emit("missing_guild_id", "import", &stats.file, "no guild.id; file skipped");
        stats.errors += 1;
        return None;
    };
    let server_name = guild
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("Unknown Server")
        .to_string();

    let channel = data.get("channel").unwrap_or(&Value::Null);
    let Some(channel_id) = parse_discord_id(channel.get("id")) else {
        warn::emit("missing_channel_id", "import", &stats.file, "no channel.id; file skipped");
        stats.errors += 1;
        return None;
    };
    let channel_name = channel
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let channel_type = channel
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let is_thread = THREAD_CHANNEL_TYPES.contains(&channel_type.as_str());
    let parent_channel_id = if is_thread {
        parse_discord_id(channel.get("categoryId"))
    } else {
        None
    };

    Some(ExportChannel {
        server_id,
        server_name,
        channel_id,
        channel_name,
        channel_type,
        is_thread,
        parent_channel_id,
    })
}

fn message_content(msg: &Value) -> String {
    let content = msg
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if !content.is_empty() {
        return content;
    }
    let names: Vec<&str> = msg
        .get("attachments")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|a| {
                    a.get("fileName")
                        .and_then(Value::as_str)
                        .unwrap_or("attachment")
                })
                .collect()
        })
        .unwrap_or_default();
    if names.is_empty() {
        content
    } else {
        format!("[{}]", names.join(", "))
    }
}

fn parse_message(
    msg: &Value,
    channel: &ExportChannel,
    stats: &mut ImportStats,
) -> Option<MessageRecord> {
    let message_id = parse_discord_id(msg.get("id"))?;
    let author = msg.get("author").unwrap_or(&Value::Null);
    let author_id = parse_discord_id(author.get("id"))?;

    let raw_ts = msg.get("timestamp").and_then(Value::as_str).unwrap_or("");
    let Some(created_at) = parse_timestamp(raw_ts) else {
        if !raw_ts.is_empty() {
            warn::emit(
                "bad_timestamp",
                "import",
                &stats.file,
                &format!("message {message_id}: {raw_ts}"),
            );
        }
        return None;
    };
    let edited_at = msg
        .get("timestampEdited")
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    let reply_to = msg
        .get("reference")
        .and_then(|r| parse_discord_id(r.get("messageId")));

    Some(MessageRecord {
        message_id: Some(message_id),
        server_id: Some(channel.server_id),
        server_name: Some(channel.server_name.clone()),
        channel_id: Some(channel.channel_id),
        channel_name: Some(channel.channel_name.clone()),
        thread_id: channel.is_thread.then_some(channel.channel_id),
        author_id: Some(author_id),
        author: Some(format_username(author)),
        username: author
            .get("name")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        content: Some(message_content(msg)),
        created_at: Some(created_at),
        edited_at,
        reply_to,
    })
}

/// Parse an already-decoded export document. `label` names the source in
/// stats and warnings.
pub fn parse_export_value(label: &Path, data: &Value) -> ParsedExport {
    let mut stats = ImportStats::for_file(label);
    let Some(channel) = parse_channel(data, &mut stats) else {
        return ParsedExport {
            channel: None,
            records: Vec::new(),
            stats,
        };
    };

    let mut records = Vec::new();
    for msg in data
        .get("messages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        match parse_message(msg, &channel, &mut stats) {
            Some(record) => {
                stats.new += 1;
                records.push(record);
            }
            None => stats.skipped += 1,
        }
    }

    ParsedExport {
        channel: Some(channel),
        records,
        stats,
    }
}

/// Read and parse one export file. Unreadable or malformed JSON is counted
/// as a file error rather than aborting the batch.
pub fn parse_export(path: &Path) -> ParsedExport {
    let decoded = fs::read_to_string(path)
        .map_err(|err| err.to_string())
        .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(|err| err.to_string()));
    match decoded {
        Ok(data) => parse_export_value(path, &data),
        Err(err) => {
            let mut stats = ImportStats::for_file(path);
            warn::emit("unreadable_export", "import", &stats.file, &err);
            stats.errors += 1;
            ParsedExport {
                channel: None,
                records: Vec::new(),
                stats,
            }
        }
    }
}

/// Load every export under `input`, merged by message id and ordered by
/// creation time.
pub fn load_records(input: &Path) -> Result<LoadedRecords> {
    let files = collect_json_files(input)?;
    let mut by_id: BTreeMap<u64, MessageRecord> = BTreeMap::new();
    let mut loaded = LoadedRecords::default();

    for file in files {
        let mut parsed = parse_export(&file);
        for record in parsed.records {
            let Some(id) = record.message_id else {
                continue;
            };
            if by_id.insert(id, record).is_some() {
                parsed.stats.new -= 1;
                parsed.stats.updated += 1;
            }
        }
        loaded.totals.absorb(&parsed.stats);
        loaded.files.push(parsed.stats);
        if let Some(channel) = parsed.channel
            && !loaded.channels.contains(&channel)
        {
            loaded.channels.push(channel);
        }
    }

    loaded.records = by_id.into_values().collect();
    loaded
        .records
        .sort_by(|a, b| (a.created_at, a.message_id).cmp(&(b.created_at, b.message_id)));
    loaded.totals.file = format!("{} file(s)", loaded.files.len());
    Ok(loaded)
}
