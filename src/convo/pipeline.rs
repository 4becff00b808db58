use crate::convo::audit;
use crate::convo::config::{ConvoConfig, load_config};
use crate::convo::lock;
use crate::convo::paths::{IndexPaths, resolve_paths};
use crate::convo::qmd::{QmdCli, SearchIndex, UnavailableIndex};
use crate::convo::reconcile::{self, ProjectDir, ReconcileOutcome, ReconcilePlan};
use crate::convo::resolver::{self, SkipReason, SkippedGroup};
use crate::convo::state::{self, IndexState, RunSummary};
use crate::convo::transcript::{self, ConvertAction, ProjectConversion};
use crate::convo::util::now_epoch_secs;
use crate::convo::warn::{self, WarnEvent};
use anyhow::Result;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub dry_run: bool,
    pub prune_stale: bool,
    pub embed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConvertStage {
    pub conversions: Vec<ProjectConversion>,
    pub skipped_groups: Vec<SkippedGroup>,
}

impl ConvertStage {
    pub fn sessions(&self, action: ConvertAction) -> usize {
        self.conversions.iter().map(|c| c.count(action)).sum()
    }

    pub fn skipped_sessions(&self) -> usize {
        self.conversions.iter().map(|c| c.skipped.len()).sum()
    }

    pub fn excluded_count(&self) -> usize {
        self.skipped_groups
            .iter()
            .filter(|s| matches!(s.reason, SkipReason::Excluded { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileStage {
    pub plan: ReconcilePlan,
    /// `None` for dry runs and when the collection listing could not be obtained.
    pub outcome: Option<ReconcileOutcome>,
    pub list_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub dry_run: bool,
    pub convert: ConvertStage,
    pub reconcile: ReconcileStage,
    pub embed_error: Option<String>,
    pub summary: RunSummary,
}

#[derive(Debug)]
pub enum SyncRun {
    Completed(Box<PipelineOutcome>),
    Locked(String),
}

/// The qmd CLI, or a stand-in that reports why it is missing.
pub fn open_index(paths: &IndexPaths, cfg: &ConvoConfig) -> Box<dyn SearchIndex> {
    match QmdCli::new(
        &paths.qmd_bin,
        &cfg.index.collection_prefix,
        &cfg.index.collection_suffix,
    ) {
        Ok(cli) => Box::new(cli),
        Err(err) => Box::new(UnavailableIndex {
            reason: format!("{err:#}"),
        }),
    }
}

/// Resolve every log group and convert its sessions. Only directory creation failures escape.
pub fn convert_all(paths: &IndexPaths, cfg: &ConvoConfig, dry_run: bool) -> Result<ConvertStage> {
    let resolution = resolver::resolve_projects(&paths.projects_dir, &cfg.resolver)?;
    let mut out = ConvertStage {
        skipped_groups: resolution.skipped,
        ..ConvertStage::default()
    };

    for group in &resolution.groups {
        let conversion =
            transcript::convert_project(group, &paths.convert_dir, &cfg.transcript, dry_run)?;
        tracing::info!(
            project = %conversion.identity,
            written = conversion.count(ConvertAction::Written),
            unchanged = conversion.count(ConvertAction::Unchanged),
            planned = conversion.count(ConvertAction::WouldWrite),
            skipped = conversion.skipped.len(),
            "project converted"
        );
        out.conversions.push(conversion);
    }

    Ok(out)
}

/// On-disk project directories, plus (for dry runs) directories the conversion would populate.
fn desired_dirs(paths: &IndexPaths, planned: &[ProjectConversion]) -> Result<Vec<ProjectDir>> {
    let mut by_project = BTreeMap::new();
    for dir in reconcile::project_dirs(&paths.convert_dir)? {
        by_project.insert(dir.project.clone(), dir);
    }
    for conversion in planned {
        let pending = conversion.count(ConvertAction::WouldWrite);
        if pending == 0 {
            continue;
        }
        by_project
            .entry(conversion.identity.clone())
            .or_insert_with(|| ProjectDir {
                project: conversion.identity.clone(),
                path: conversion.output_dir.clone(),
                documents: pending,
            });
    }
    Ok(by_project.into_values().collect())
}

pub fn reconcile_all(
    paths: &IndexPaths,
    cfg: &ConvoConfig,
    index: &dyn SearchIndex,
    planned: &[ProjectConversion],
    dry_run: bool,
    prune: bool,
) -> Result<ReconcileStage> {
    let desired = desired_dirs(paths, planned)?;
    let mut out = ReconcileStage::default();

    let existing = match index.list_collections() {
        Ok(existing) => existing,
        Err(err) => {
            warn::emit(WarnEvent {
                code: "COLLECTION_LIST_FAILED",
                stage: "reconcile",
                action: "list-collections",
                subject: "qmd",
                path: &paths.qmd_bin.display().to_string(),
                reason: if dry_run { "plan-against-empty-index" } else { "skip-reconcile" },
                err: &format!("{err:#}"),
            });
            out.list_error = Some(format!("{err:#}"));
            if !dry_run {
                return Ok(out);
            }
            Default::default()
        }
    };

    out.plan = reconcile::plan(&desired, &existing, &cfg.index, prune);
    if !out.plan.stale.is_empty() {
        tracing::info!(
            stale = ?out.plan.stale,
            pruning = prune,
            "collections without a backing directory"
        );
    }
    if !dry_run {
        out.outcome = Some(reconcile::apply(index, &out.plan, &cfg.index));
    }
    Ok(out)
}

fn embed(index: &dyn SearchIndex, cfg: &ConvoConfig) -> Option<String> {
    let timeout = Duration::from_secs(cfg.index.embed_timeout_secs);
    match index.generate_embeddings(timeout) {
        Ok(()) => None,
        Err(err) => {
            warn::emit(WarnEvent {
                code: "EMBED_FAILED",
                stage: "embed",
                action: "qmd-embed",
                subject: "all",
                path: "",
                reason: "failed-or-timed-out",
                err: &format!("{err:#}"),
            });
            Some(format!("{err:#}"))
        }
    }
}

/// One full pass. Safe to repeat; stale state never accumulates.
pub fn run_once(
    paths: &IndexPaths,
    cfg: &ConvoConfig,
    index: &dyn SearchIndex,
    opts: PipelineOptions,
) -> Result<PipelineOutcome> {
    let started_at_epoch_secs = now_epoch_secs()?;
    let convert = convert_all(paths, cfg, opts.dry_run)?;
    let reconcile = reconcile_all(
        paths,
        cfg,
        index,
        &convert.conversions,
        opts.dry_run,
        opts.prune_stale,
    )?;

    let embed_error = if opts.dry_run || !opts.embed {
        None
    } else {
        embed(index, cfg)
    };

    let outcome = reconcile.outcome.clone().unwrap_or_default();
    let summary = RunSummary {
        started_at_epoch_secs,
        finished_at_epoch_secs: now_epoch_secs()?,
        projects_processed: convert.conversions.len(),
        projects_skipped: convert.skipped_groups.len(),
        sessions_converted: convert.sessions(ConvertAction::Written)
            + convert.sessions(ConvertAction::WouldWrite),
        sessions_unchanged: convert.sessions(ConvertAction::Unchanged),
        sessions_skipped: convert.skipped_sessions(),
        collections_created: outcome.created,
        collections_recreated: outcome.recreated,
        collections_pruned: outcome.pruned,
        collections_failed: outcome.failed + usize::from(reconcile.list_error.is_some()),
        embed_ok: (!opts.dry_run && opts.embed).then_some(embed_error.is_none()),
    };

    Ok(PipelineOutcome {
        dry_run: opts.dry_run,
        convert,
        reconcile,
        embed_error,
        summary,
    })
}

fn audit_run(paths: &IndexPaths, outcome: &PipelineOutcome) {
    let s = &outcome.summary;
    let degraded = s.collections_failed > 0 || s.embed_ok == Some(false) || s.sessions_skipped > 0;
    let message = format!(
        "projects={} sessions_converted={} unchanged={} skipped={} created={} recreated={} pruned={} failed={} embed_ok={:?}",
        s.projects_processed,
        s.sessions_converted,
        s.sessions_unchanged,
        s.sessions_skipped,
        s.collections_created,
        s.collections_recreated,
        s.collections_pruned,
        s.collections_failed,
        s.embed_ok
    );
    if let Err(err) = audit::append_event(
        paths,
        "sync",
        if degraded { "degraded" } else { "ok" },
        &message,
    ) {
        tracing::warn!("audit log append failed: {err:#}");
    }
}

/// Run the pipeline under the run lock and persist the summary. Dry runs skip both.
pub fn run_locked(
    paths: &IndexPaths,
    cfg: &ConvoConfig,
    index: &dyn SearchIndex,
    opts: PipelineOptions,
) -> Result<SyncRun> {
    if opts.dry_run {
        return Ok(SyncRun::Completed(Box::new(run_once(paths, cfg, index, opts)?)));
    }

    let Some(guard) = lock::acquire_unless_held(paths)? else {
        return Ok(SyncRun::Locked(lock::lock_path(paths).display().to_string()));
    };

    tracing::debug!(lock = %guard.path().display(), "run lock acquired");

    let outcome = run_once(paths, cfg, index, opts)?;
    audit_run(paths, &outcome);
    let mut state = state::load(paths).unwrap_or_else(|err| {
        tracing::warn!("discarding unreadable run state: {err:#}");
        IndexState::default()
    });
    state.last_run = Some(outcome.summary.clone());
    state::save(paths, &state)?;
    drop(guard);

    Ok(SyncRun::Completed(Box::new(outcome)))
}

fn run_cycle(paths: &IndexPaths, opts: PipelineOptions) -> Result<(SyncRun, u64)> {
    let cfg = load_config(paths)?;
    let index = open_index(paths, &cfg);
    let opts = PipelineOptions {
        prune_stale: opts.prune_stale || cfg.index.prune_stale,
        ..opts
    };
    Ok((
        run_locked(paths, &cfg, index.as_ref(), opts)?,
        cfg.schedule.interval_secs,
    ))
}

/// Built-in scheduler: a full sync every `interval`.
/// A failed cycle is logged and retried next tick.
pub fn run_daemon(interval: Option<Duration>, opts: PipelineOptions) -> Result<()> {
    let paths = resolve_paths()?;
    let mut configured = ConvoConfig::default().schedule.interval_secs;

    loop {
        match run_cycle(&paths, opts) {
            Ok((run, interval_secs)) => {
                configured = interval_secs;
                match run {
                    SyncRun::Completed(outcome) => tracing::info!(
                        projects = outcome.summary.projects_processed,
                        sessions = outcome.summary.sessions_converted,
                        created = outcome.summary.collections_created,
                        recreated = outcome.summary.collections_recreated,
                        "sync cycle completed"
                    ),
                    SyncRun::Locked(path) => {
                        tracing::info!(lock = %path, "sync cycle skipped; another run is active")
                    }
                }
            }
            Err(err) => tracing::error!("sync cycle failed: {err:#}"),
        }

        thread::sleep(interval.unwrap_or(Duration::from_secs(configured)));
    }
}
