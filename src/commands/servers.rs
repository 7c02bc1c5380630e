use anyhow::Result;
use std::path::Path;

use crate::commands::CommandReport;
use crate::digest::import::load_records;
use crate::digest::query::all_servers;

pub fn run(input: &Path) -> Result<CommandReport> {
    let mut report = CommandReport::new("servers");
    let loaded = load_records(input)?;

    let servers = all_servers(&loaded.records);
    report.detail(format!("servers={}", servers.len()));
    for server in servers {
        report.detail(format!(
            "server={} name={} channels={} messages={}",
            server.server_id, server.server_name, server.channels, server.messages
        ));
    }
    Ok(report)
}
