use crate::digest::record::{ChatMessage, MessageRecord};
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const TOP_USERS: usize = 10;
const TOP_CHANNELS: usize = 5;

/// Start of a trailing `days` window ending at `now`. `None` when the window
/// reaches past the representable calendar, i.e. no lower bound.
pub fn window_start(now: NaiveDateTime, days: u32) -> Option<NaiveDateTime> {
    Duration::try_days(i64::from(days)).and_then(|span| now.checked_sub_signed(span))
}

fn in_window(record: &MessageRecord, cutoff: Option<NaiveDateTime>) -> bool {
    record
        .created_at
        .is_some_and(|ts| cutoff.is_none_or(|cutoff| ts > cutoff))
}

/// Record filter applied in input order. Channel matches id or name, author
/// matches display name or username (case-insensitive), `since_days` is
/// relative to the `now` passed to [`MessageQuery::apply`].
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub server_id: Option<u64>,
    pub channel: Option<String>,
    pub author: Option<String>,
    pub search: Option<String>,
    pub since_days: Option<u32>,
    pub limit: Option<usize>,
}

fn matches_channel(record: &MessageRecord, wanted: &str) -> bool {
    let wanted = wanted.trim().trim_start_matches('#');
    if let Ok(id) = wanted.parse::<u64>()
        && (record.channel_id == Some(id) || record.thread_id == Some(id))
    {
        return true;
    }
    record
        .channel_name
        .as_deref()
        .is_some_and(|name| name.eq_ignore_ascii_case(wanted))
}

fn matches_author(record: &MessageRecord, wanted: &str) -> bool {
    let wanted = wanted.trim();
    [record.author.as_deref(), record.username.as_deref()]
        .into_iter()
        .flatten()
        .any(|name| name.eq_ignore_ascii_case(wanted))
}

impl MessageQuery {
    pub fn is_empty(&self) -> bool {
        self.server_id.is_none()
            && self.channel.is_none()
            && self.author.is_none()
            && self.search.is_none()
            && self.since_days.is_none()
            && self.limit.is_none()
    }

    fn matches(&self, record: &MessageRecord, cutoff: Option<NaiveDateTime>, needle: Option<&str>) -> bool {
        if let Some(server_id) = self.server_id
            && record.server_id != Some(server_id)
        {
            return false;
        }
        if let Some(channel) = self.channel.as_deref()
            && !matches_channel(record, channel)
        {
            return false;
        }
        if let Some(author) = self.author.as_deref()
            && !matches_author(record, author)
        {
            return false;
        }
        if self.since_days.is_some() && !in_window(record, cutoff) {
            return false;
        }
        if let Some(needle) = needle
            && !record.content().to_lowercase().contains(needle)
        {
            return false;
        }
        true
    }

    /// Matching records in input order. With `limit`, only the last N
    /// matches are kept, still in chronological order.
    pub fn apply(&self, records: &[MessageRecord], now: NaiveDateTime) -> Vec<MessageRecord> {
        let cutoff = self.since_days.and_then(|days| window_start(now, days));
        let needle = self
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut out: Vec<MessageRecord> = records
            .iter()
            .filter(|r| self.matches(r, cutoff, needle.as_deref()))
            .cloned()
            .collect();
        if let Some(limit) = self.limit
            && out.len() > limit
        {
            out.drain(..out.len() - limit);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopUser {
    pub username: String,
    pub message_count: usize,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopChannel {
    pub channel: String,
    pub messages: usize,
}

/// Activity for one server over a trailing window; the input to the weekly
/// digest prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSummary {
    pub server_id: u64,
    pub server_name: String,
    pub days: u32,
    pub total_messages: usize,
    pub active_users: usize,
    /// Authors whose first message in this server falls inside the window.
    pub new_users: usize,
    pub active_channels: usize,
    pub thread_messages: usize,
    pub top_users: Vec<TopUser>,
    pub top_channels: Vec<TopChannel>,
}

#[derive(Default)]
struct UserTally {
    name: String,
    count: usize,
    channels: BTreeSet<String>,
}

/// Summaries for every server (or just `server_id`) with activity in the
/// last `days` days, busiest first.
pub fn server_summaries(
    records: &[MessageRecord],
    server_id: Option<u64>,
    days: u32,
    now: NaiveDateTime,
) -> Vec<ServerSummary> {
    let cutoff = window_start(now, days);
    let mut servers: BTreeMap<u64, Vec<&MessageRecord>> = BTreeMap::new();
    let mut first_seen: BTreeMap<(u64, u64), NaiveDateTime> = BTreeMap::new();
    for record in records {
        let Some(sid) = record.server_id else {
            continue;
        };
        if server_id.is_some_and(|wanted| wanted != sid) {
            continue;
        }
        if let (Some(uid), Some(ts)) = (record.author_id, record.created_at) {
            first_seen
                .entry((sid, uid))
                .and_modify(|first| *first = (*first).min(ts))
                .or_insert(ts);
        }
        if !in_window(record, cutoff) {
            continue;
        }
        servers.entry(sid).or_default().push(record);
    }

    let mut out: Vec<ServerSummary> = servers
        .into_iter()
        .map(|(sid, rows)| {
            let mut summary = summarize_server(sid, &rows, days);
            let authors: BTreeSet<u64> = rows.iter().filter_map(|r| r.author_id).collect();
            summary.new_users = authors
                .into_iter()
                .filter(|uid| {
                    first_seen
                        .get(&(sid, *uid))
                        .is_some_and(|first| cutoff.is_none_or(|cutoff| *first > cutoff))
                })
                .count();
            summary
        })
        .collect();
    out.sort_by(|a, b| {
        b.total_messages
            .cmp(&a.total_messages)
            .then(a.server_id.cmp(&b.server_id))
    });
    out
}

pub fn server_summary(
    records: &[MessageRecord],
    server_id: u64,
    days: u32,
    now: NaiveDateTime,
) -> Option<ServerSummary> {
    server_summaries(records, Some(server_id), days, now)
        .into_iter()
        .next()
}

fn summarize_server(server_id: u64, rows: &[&MessageRecord], days: u32) -> ServerSummary {
    let server_name = rows
        .iter()
        .rev()
        .find_map(|r| r.server_name.clone())
        .unwrap_or_else(|| "Unknown Server".to_string());

    let mut users: BTreeMap<u64, UserTally> = BTreeMap::new();
    let mut channels: BTreeMap<String, usize> = BTreeMap::new();
    let mut channel_ids = BTreeSet::new();
    let mut thread_messages = 0usize;

    for record in rows {
        let channel_name = record
            .channel_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        if let Some(cid) = record.channel_id {
            channel_ids.insert(cid);
        }
        if record.thread_id.is_some() {
            thread_messages += 1;
        } else {
            *channels.entry(channel_name.clone()).or_insert(0) += 1;
        }
        if let Some(uid) = record.author_id {
            let tally = users.entry(uid).or_default();
            tally.name = record.author().to_string();
            tally.count += 1;
            tally.channels.insert(channel_name);
        }
    }

    let active_users = users.len();
    let mut top_users: Vec<TopUser> = users
        .into_values()
        .map(|t| TopUser {
            username: t.name,
            message_count: t.count,
            channels: t.channels.into_iter().collect(),
        })
        .collect();
    top_users.sort_by(|a, b| {
        b.message_count
            .cmp(&a.message_count)
            .then_with(|| a.username.cmp(&b.username))
    });
    top_users.truncate(TOP_USERS);

    let mut top_channels: Vec<TopChannel> = channels
        .into_iter()
        .map(|(channel, messages)| TopChannel { channel, messages })
        .collect();
    top_channels.sort_by(|a, b| {
        b.messages
            .cmp(&a.messages)
            .then_with(|| a.channel.cmp(&b.channel))
    });
    top_channels.truncate(TOP_CHANNELS);

    ServerSummary {
        server_id,
        server_name,
        days,
        total_messages: rows.len(),
        active_users,
        new_users: 0,
        active_channels: channel_ids.len(),
        thread_messages,
        top_users,
        top_channels,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossServerUser {
    pub author_id: u64,
    pub username: String,
    pub server_count: usize,
    pub servers: Vec<String>,
}

/// Users who posted in at least `min_servers` distinct servers, most
/// widespread first.
pub fn users_across_servers(records: &[MessageRecord], min_servers: usize) -> Vec<CrossServerUser> {
    let mut seen: BTreeMap<u64, (String, BTreeSet<String>)> = BTreeMap::new();
    for record in records {
        let (Some(uid), Some(sid)) = (record.author_id, record.server_id) else {
            continue;
        };
        let server = record
            .server_name
            .clone()
            .unwrap_or_else(|| sid.to_string());
        let entry = seen.entry(uid).or_default();
        entry.0 = record.author().to_string();
        entry.1.insert(server);
    }

    let mut out: Vec<CrossServerUser> = seen
        .into_iter()
        .filter(|(_, (_, servers))| servers.len() >= min_servers)
        .map(|(author_id, (username, servers))| CrossServerUser {
            author_id,
            username,
            server_count: servers.len(),
            servers: servers.into_iter().collect(),
        })
        .collect();
    out.sort_by(|a, b| {
        b.server_count
            .cmp(&a.server_count)
            .then(a.author_id.cmp(&b.author_id))
    });
    out
}

/// One user's activity in a server over a trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentUser {
    pub author_id: u64,
    pub username: String,
    pub message_count: usize,
    pub last_active: NaiveDateTime,
    pub channels_used: usize,
}

/// Most active posters in `server_id` over the last `days` days, at most
/// `limit` of them.
pub fn recent_active_users(
    records: &[MessageRecord],
    server_id: u64,
    days: u32,
    now: NaiveDateTime,
    limit: usize,
) -> Vec<RecentUser> {
    let cutoff = window_start(now, days);
    let mut tallies: BTreeMap<u64, (String, usize, NaiveDateTime, BTreeSet<u64>)> = BTreeMap::new();
    for record in records {
        if record.server_id != Some(server_id) || !in_window(record, cutoff) {
            continue;
        }
        let (Some(uid), Some(ts)) = (record.author_id, record.created_at) else {
            continue;
        };
        let entry = tallies
            .entry(uid)
            .or_insert_with(|| (String::new(), 0, ts, BTreeSet::new()));
        entry.0 = record.author().to_string();
        entry.1 += 1;
        entry.2 = entry.2.max(ts);
        if let Some(cid) = record.thread_id.or(record.channel_id) {
            entry.3.insert(cid);
        }
    }

    let mut out: Vec<RecentUser> = tallies
        .into_iter()
        .map(|(author_id, (username, message_count, last_active, channels))| RecentUser {
            author_id,
            username,
            message_count,
            last_active,
            channels_used: channels.len(),
        })
        .collect();
    out.sort_by(|a, b| {
        b.message_count
            .cmp(&a.message_count)
            .then(a.author_id.cmp(&b.author_id))
    });
    out.truncate(limit);
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnownUser {
    pub author_id: u64,
    pub username: String,
    pub messages: usize,
    pub servers: Vec<String>,
}

/// Users whose display name or username contains `needle`
/// (case-insensitive), sorted by name.
pub fn find_users(records: &[MessageRecord], needle: &str) -> Vec<KnownUser> {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    let mut seen: BTreeMap<u64, (String, usize, BTreeSet<String>)> = BTreeMap::new();
    for record in records {
        let Some(uid) = record.author_id else {
            continue;
        };
        let matched = [record.author.as_deref(), record.username.as_deref()]
            .into_iter()
            .flatten()
            .any(|name| name.to_lowercase().contains(&needle));
        if !matched {
            continue;
        }
        let entry = seen.entry(uid).or_default();
        entry.0 = record.author().to_string();
        entry.1 += 1;
        if let Some(server) = record.server_name.clone() {
            entry.2.insert(server);
        }
    }

    let mut out: Vec<KnownUser> = seen
        .into_iter()
        .map(|(author_id, (username, messages, servers))| KnownUser {
            author_id,
            username,
            messages,
            servers: servers.into_iter().collect(),
        })
        .collect();
    out.sort_by(|a, b| {
        a.username
            .to_lowercase()
            .cmp(&b.username.to_lowercase())
            .then(a.author_id.cmp(&b.author_id))
    });
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub server_id: u64,
    pub server_name: String,
    pub channels: usize,
    pub messages: usize,
}

/// Every server present in `records`, sorted by name.
pub fn all_servers(records: &[MessageRecord]) -> Vec<ServerInfo> {
    let mut seen: BTreeMap<u64, (Option<String>, BTreeSet<u64>, usize)> = BTreeMap::new();
    for record in records {
        let Some(sid) = record.server_id else {
            continue;
        };
        let entry = seen.entry(sid).or_default();
        if record.server_name.is_some() {
            entry.0 = record.server_name.clone();
        }
        if let Some(cid) = record.channel_id {
            entry.1.insert(cid);
        }
        entry.2 += 1;
    }

    let mut out: Vec<ServerInfo> = seen
        .into_iter()
        .map(|(server_id, (name, channels, messages))| ServerInfo {
            server_id,
            server_name: name.unwrap_or_else(|| "Unknown Server".to_string()),
            channels: channels.len(),
            messages,
        })
        .collect();
    out.sort_by(|a, b| {
        a.server_name
            .cmp(&b.server_name)
            .then(a.server_id.cmp(&b.server_id))
    });
    out
}
