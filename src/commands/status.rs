use anyhow::Result;
use std::env;

use crate::commands::{CommandReport, load_environment, report_summary};
use crate::convo::{config, lock, paths};
use crate::convo::qmd::QmdCli;
use crate::convo::state;

fn configured_env_keys() -> Vec<&'static str> {
    paths::ENV_KEYS
        .iter()
        .chain(config::ENV_KEYS)
        .copied()
        .filter(|key| env::var_os(key).is_some())
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let (paths, cfg) = load_environment()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("version={}", env!("CARGO_PKG_VERSION")));
    report.detail(format!("convo_home={}", paths.convo_home.display()));
    report.detail(format!("projects_dir={}", paths.projects_dir.display()));
    report.detail(format!("convert_dir={}", paths.convert_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("config_file={}", paths.config_file.display()));
    report.detail(format!("lock_file={}", lock::lock_path(&paths).display()));
    report.detail(format!("interval_secs={}", cfg.schedule.interval_secs));
    report.detail(format!("prune_stale={}", cfg.index.prune_stale));

    match QmdCli::new(
        &paths.qmd_bin,
        &cfg.index.collection_prefix,
        &cfg.index.collection_suffix,
    ) {
        Ok(cli) => report.detail(format!("qmd_bin={}", cli.bin().display())),
        Err(err) => report.issue(format!("{err:#}")),
    }

    if !paths.projects_dir.exists() {
        report.issue(format!(
            "missing session log root {} (set CLAUDE_PROJECTS_DIR)",
            paths.projects_dir.display()
        ));
    }

    let keys = configured_env_keys();
    report.detail(format!(
        "env.configured={}",
        if keys.is_empty() { "none".to_string() } else { keys.join(",") }
    ));

    match state::load(&paths) {
        Ok(saved) => match saved.last_run {
            Some(summary) => {
                report.detail(format!(
                    "last_run.finished_at_epoch_secs={}",
                    summary.finished_at_epoch_secs
                ));
                report.detail(format!(
                    "last_run.collections.created={}",
                    summary.collections_created
                ));
                report.detail(format!(
                    "last_run.collections.recreated={}",
                    summary.collections_recreated
                ));
                report.detail(format!(
                    "last_run.collections.failed={}",
                    summary.collections_failed
                ));
                report_summary(&mut report, &summary);
            }
            None => report.detail("last_run=never"),
        },
        Err(err) => report.issue(format!("run state unreadable: {err:#}")),
    }

    Ok(report)
}
