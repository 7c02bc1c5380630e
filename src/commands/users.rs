use anyhow::Result;
use chrono::NaiveDate;
use std::path::PathBuf;

use crate::commands::{CommandReport, reference_now};
use crate::digest::import::load_records;
use crate::digest::query::{find_users, recent_active_users, users_across_servers};

#[derive(Debug, Clone)]
pub struct UsersOptions {
    pub input: PathBuf,
    pub min_servers: usize,
    pub find: Option<String>,
    pub server: Option<u64>,
    pub days: u32,
    pub limit: usize,
    pub as_of: Option<NaiveDate>,
}

/// `--find` searches names, `--server` ranks recent posters, otherwise users
/// seen in at least `min_servers` servers.
pub fn run(opts: &UsersOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("users");
    let loaded = load_records(&opts.input)?;

    if let Some(needle) = opts.find.as_deref() {
        let found = find_users(&loaded.records, needle);
        report.detail(format!("find={}", needle.trim()));
        report.detail(format!("matching_users={}", found.len()));
        for user in found {
            report.detail(format!(
                "user={} id={} messages={} [{}]",
                user.username,
                user.author_id,
                user.messages,
                user.servers.join(", ")
            ));
        }
        return Ok(report);
    }

    if let Some(server_id) = opts.server {
        let now = reference_now(opts.as_of);
        let users = recent_active_users(&loaded.records, server_id, opts.days, now, opts.limit);
        report.detail(format!("server={server_id} days={}", opts.days));
        report.detail(format!("active_users={}", users.len()));
        for user in users {
            report.detail(format!(
                "user={} messages={} channels={} last_active={}",
                user.username,
                user.message_count,
                user.channels_used,
                user.last_active.format("%Y-%m-%d %H:%M")
            ));
        }
        return Ok(report);
    }

    let users = users_across_servers(&loaded.records, opts.min_servers.max(1));
    report.detail(format!("min_servers={}", opts.min_servers));
    report.detail(format!("matching_users={}", users.len()));
    for user in users {
        report.detail(format!(
            "user={} servers={} [{}]",
            user.username,
            user.server_count,
            user.servers.join(", ")
        ));
    }
    Ok(report)
}
