use anyhow::Result;

use crate::commands::{CommandReport, load_environment, report_outcome, report_plan};
use crate::convo::{lock, pipeline};

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub dry_run: bool,
    pub prune_stale: bool,
}

pub fn run(opts: &ReconcileOptions) -> Result<CommandReport> {
    let (paths, cfg) = load_environment()?;
    let mut report = CommandReport::new("reconcile");
    let index = pipeline::open_index(&paths, &cfg);
    let prune = opts.prune_stale || cfg.index.prune_stale;

    let guard = if opts.dry_run {
        None
    } else {
        match lock::acquire_unless_held(&paths)? {
            Some(guard) => Some(guard),
            None => {
                let held = lock::lock_path(&paths);
                report.detail(format!("skipped: another run holds {}", held.display()));
                return Ok(report);
            }
        }
    };

    let stage =
        pipeline::reconcile_all(&paths, &cfg, index.as_ref(), &[], opts.dry_run, prune)?;
    drop(guard);

    report.detail(format!("dry_run={}", opts.dry_run));
    if let Some(err) = &stage.list_error {
        report.issue(format!("collection listing failed: {err}"));
    }
    report_plan(&mut report, &stage.plan);
    if let Some(outcome) = &stage.outcome {
        report_outcome(&mut report, outcome);
    }

    Ok(report)
}
