pub mod convert;
pub mod reconcile;
pub mod search;
pub mod status;
pub mod sync;
pub mod watch;

use anyhow::Result;
use serde::Serialize;

use crate::convo::config::{ConvoConfig, load_config};
use crate::convo::paths::{IndexPaths, resolve_paths};
use crate::convo::reconcile::{ReconcileOutcome, ReconcilePlan};
use crate::convo::state::RunSummary;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

pub fn load_environment() -> Result<(IndexPaths, ConvoConfig)> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    Ok((paths, cfg))
}

pub fn report_plan(report: &mut CommandReport, plan: &ReconcilePlan) {
    for op in &plan.ops {
        report.detail(format!("plan.{}={}", op.label(), op.name()));
    }
    for name in &plan.stale {
        report.detail(format!("stale={name}"));
    }
    for collision in &plan.collisions {
        report.detail(format!(
            "collision={} kept={} dropped={}",
            collision.name,
            collision.kept.display(),
            collision.dropped.display()
        ));
    }
}

pub fn report_outcome(report: &mut CommandReport, outcome: &ReconcileOutcome) {
    report.detail(format!("collections.created={}", outcome.created));
    report.detail(format!("collections.recreated={}", outcome.recreated));
    report.detail(format!("collections.pruned={}", outcome.pruned));
    report.detail(format!("collections.stale={}", outcome.stale.len()));
    if outcome.context_failed > 0 {
        report.detail(format!("contexts.failed={}", outcome.context_failed));
    }
    report.detail(format!("collections.failed={}", outcome.failed));
    for failure in &outcome.failures {
        report.detail(format!("failure={failure}"));
    }
}

pub fn report_summary(report: &mut CommandReport, summary: &RunSummary) {
    report.detail(format!("projects.processed={}", summary.projects_processed));
    report.detail(format!("projects.skipped={}", summary.projects_skipped));
    report.detail(format!("sessions.converted={}", summary.sessions_converted));
    report.detail(format!("sessions.unchanged={}", summary.sessions_unchanged));
    report.detail(format!("sessions.skipped={}", summary.sessions_skipped));
    if let Some(ok) = summary.embed_ok {
        report.detail(format!("embed.ok={ok}"));
    }
}
