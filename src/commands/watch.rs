use anyhow::Result;
use std::time::Duration;

use crate::commands::CommandReport;
use crate::commands::sync::{self, SyncOptions};
use crate::convo::pipeline::{self, PipelineOptions};

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub once: bool,
    pub interval_secs: Option<u64>,
}

pub fn run(opts: &WatchOptions) -> Result<CommandReport> {
    if opts.once {
        let mut report = sync::run(&SyncOptions::default())?;
        report.command = "watch".to_string();
        return Ok(report);
    }

    let mut report = CommandReport::new("watch");
    if opts.interval_secs == Some(0) {
        report.issue("invalid --interval-secs: must be greater than zero");
        return Ok(report);
    }

    tracing::info!(interval_secs = ?opts.interval_secs, "starting sync loop");
    pipeline::run_daemon(
        opts.interval_secs.map(Duration::from_secs),
        PipelineOptions {
            embed: true,
            ..PipelineOptions::default()
        },
    )?;
    Ok(report)
}
