use anyhow::Result;

use crate::commands::{CommandReport, load_environment, report_outcome, report_plan, report_summary};
use crate::convo::pipeline::{self, PipelineOptions, SyncRun};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub prune_stale: bool,
    pub no_embed: bool,
}

pub fn run(opts: &SyncOptions) -> Result<CommandReport> {
    let (paths, cfg) = load_environment()?;
    let mut report = CommandReport::new("sync");

    let pipeline_opts = PipelineOptions {
        dry_run: opts.dry_run,
        prune_stale: opts.prune_stale || cfg.index.prune_stale,
        embed: !opts.no_embed,
    };
    let index = pipeline::open_index(&paths, &cfg);

    let outcome = match pipeline::run_locked(&paths, &cfg, index.as_ref(), pipeline_opts)? {
        SyncRun::Completed(outcome) => outcome,
        SyncRun::Locked(path) => {
            report.detail(format!("skipped: another run holds {path}"));
            return Ok(report);
        }
    };

    report.detail(format!("dry_run={}", outcome.dry_run));
    report.detail(format!("convert_dir={}", paths.convert_dir.display()));
    for conversion in &outcome.convert.conversions {
        for session in &conversion.sessions {
            if outcome.dry_run {
                report.detail(format!("would_write={}", session.document.display()));
            }
        }
    }
    report_summary(&mut report, &outcome.summary);

    if let Some(err) = &outcome.reconcile.list_error {
        report.detail(format!("index_error={err}"));
    }
    if outcome.dry_run {
        report_plan(&mut report, &outcome.reconcile.plan);
    } else if let Some(applied) = &outcome.reconcile.outcome {
        report_outcome(&mut report, applied);
    }
    if let Some(err) = &outcome.embed_error {
        report.detail(format!("embed_error={err}"));
    }

    Ok(report)
}
