use anyhow::Result;

use crate::commands::{CommandReport, load_environment};
use crate::convo::{lock, pipeline};
use crate::convo::transcript::ConvertAction;

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub dry_run: bool,
}

pub fn run(opts: &ConvertOptions) -> Result<CommandReport> {
    let (paths, cfg) = load_environment()?;
    let mut report = CommandReport::new("convert");

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

    let stage = pipeline::convert_all(&paths, &cfg, opts.dry_run)?;
    drop(guard);
    report.detail(format!("dry_run={}", opts.dry_run));
    report.detail(format!("convert_dir={}", paths.convert_dir.display()));

    for conversion in &stage.conversions {
        report.detail(format!(
            "project={} written={} unchanged={} planned={} skipped={}",
            conversion.identity,
            conversion.count(ConvertAction::Written),
            conversion.count(ConvertAction::Unchanged),
            conversion.count(ConvertAction::WouldWrite),
            conversion.skipped.len()
        ));
        for session in &conversion.sessions {
            if opts.dry_run {
                report.detail(format!("would_write={}", session.document.display()));
            }
            if session.parse_errors > 0 {
                report.detail(format!(
                    "partial={} parse_errors={}",
                    session.source.display(),
                    session.parse_errors
                ));
            }
        }
    }
    report.detail(format!("groups.excluded={}", stage.excluded_count()));
    for skipped in &stage.skipped_groups {
        report.detail(format!(
            "skipped_group={} reason={}",
            skipped.group_dir.display(),
            skipped.reason.label()
        ));
    }

    Ok(report)
}
