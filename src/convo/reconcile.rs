use crate::convo::config::IndexConfig;
use crate::convo::qmd::{SearchIndex, collection_uri};
use crate::convo::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// A project output directory holding at least one transcript document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDir {
    pub project: String,
    pub path: PathBuf,
    pub documents: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CollectionOp {
    Create {
        name: String,
        project: String,
        path: PathBuf,
    },
    /// present -> absent -> present; never an in-place update.
    Replace {
        name: String,
        project: String,
        path: PathBuf,
    },
    Prune {
        name: String,
    },
}

impl CollectionOp {
    pub fn name(&self) -> &str {
        match self {
            Self::Create { name, .. } | Self::Replace { name, .. } | Self::Prune { name } => name,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Replace { .. } => "replace",
            Self::Prune { .. } => "prune",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub ops: Vec<CollectionOp>,
    /// Existing matching collections with no backing directory.
    pub stale: Vec<String>,
    pub collisions: Vec<NameCollision>,
}

/// Two project directories that sanitize to the same collection name.
/// The first directory in sorted order keeps the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameCollision {
    pub name: String,
    pub kept: PathBuf,
    pub dropped: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub created: usize,
    pub recreated: usize,
    pub pruned: usize,
    pub failed: usize,
    pub context_failed: usize,
    pub stale: Vec<String>,
    pub failures: Vec<String>,
}

/// `<prefix><project><suffix>`, with characters outside `[A-Za-z0-9._-]` mapped to `-`.
pub fn collection_name(project: &str, cfg: &IndexConfig) -> String {
    let body: String = project
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    format!("{}{body}{}", cfg.collection_prefix, cfg.collection_suffix)
}

pub fn context_description(project: &str, cfg: &IndexConfig) -> String {
    cfg.context_template.replace("{project}", project)
}

fn count_documents(dir: &Path) -> Result<usize> {
    let mut count = 0usize;
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("md") {
            count += 1;
        }
    }
    Ok(count)
}

/// Project directories under `convert_root` that contain at least one document.
pub fn project_dirs(convert_root: &Path) -> Result<Vec<ProjectDir>> {
    let mut out = Vec::new();
    if !convert_root.exists() {
        return Ok(out);
    }
    for entry in fs::read_dir(convert_root)
        .with_context(|| format!("failed to read {}", convert_root.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(project) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let documents = count_documents(&path)?;
        if documents == 0 {
            continue;
        }
        out.push(ProjectDir {
            project,
            path,
            documents,
        });
    }
    out.sort_by(|a, b| a.project.cmp(&b.project));
    Ok(out)
}

/// Compute the operations that bring `existing` in line with `desired`.
///
/// Stale collections are only scheduled for removal when `prune` is set.
pub fn plan(
    desired: &[ProjectDir],
    existing: &BTreeSet<String>,
    cfg: &IndexConfig,
    prune: bool,
) -> ReconcilePlan {
    let mut out = ReconcilePlan::default();
    let mut wanted: BTreeMap<String, &ProjectDir> = BTreeMap::new();
    for dir in desired.iter().filter(|d| d.documents > 0) {
        match wanted.entry(collection_name(&dir.project, cfg)) {
            Entry::Vacant(slot) => {
                slot.insert(dir);
            }
            Entry::Occupied(slot) => out.collisions.push(NameCollision {
                name: slot.key().clone(),
                kept: slot.get().path.clone(),
                dropped: dir.path.clone(),
            }),
        }
    }

    for (name, dir) in &wanted {
        let op = if existing.contains(name) {
            CollectionOp::Replace {
                name: name.clone(),
                project: dir.project.clone(),
                path: dir.path.clone(),
            }
        } else {
            CollectionOp::Create {
                name: name.clone(),
                project: dir.project.clone(),
                path: dir.path.clone(),
            }
        };
        out.ops.push(op);
    }

    for name in existing.iter().filter(|name| !wanted.contains_key(*name)) {
        out.stale.push(name.clone());
        if prune {
            out.ops.push(CollectionOp::Prune { name: name.clone() });
        }
    }

    out
}

fn record_failure(out: &mut ReconcileOutcome, op: &CollectionOp, step: &str, err: &anyhow::Error) {
    out.failed += 1;
    out.failures
        .push(format!("{} {} step={step}: {err:#}", op.label(), op.name()));
    warn::emit(WarnEvent {
        code: "COLLECTION_OP_FAILED",
        stage: "reconcile",
        action: op.label(),
        subject: op.name(),
        path: "",
        reason: step,
        err: &format!("{err:#}"),
    });
}

fn register(
    index: &dyn SearchIndex,
    name: &str,
    project: &str,
    cfg: &IndexConfig,
    out: &mut ReconcileOutcome,
) {
    let description = context_description(project, cfg);
    if let Err(err) = index.register_context(&collection_uri(name), &description) {
        out.context_failed += 1;
        warn::emit(WarnEvent {
            code: "CONTEXT_REGISTER_FAILED",
            stage: "reconcile",
            action: "context-add",
            subject: name,
            path: "",
            reason: "register-context-failed",
            err: &format!("{err:#}"),
        });
    }
}

/// Execute a plan. Every operation is attempted; failures are counted, never propagated.
pub fn apply(index: &dyn SearchIndex, plan: &ReconcilePlan, cfg: &IndexConfig) -> ReconcileOutcome {
    let mut out = ReconcileOutcome {
        stale: plan.stale.clone(),
        ..ReconcileOutcome::default()
    };

    for collision in &plan.collisions {
        out.failed += 1;
        out.failures.push(format!(
            "collision {}: {} not indexed, name taken by {}",
            collision.name,
            collision.dropped.display(),
            collision.kept.display()
        ));
        warn::emit(WarnEvent {
            code: "COLLECTION_NAME_COLLISION",
            stage: "reconcile",
            action: "skip",
            subject: &collision.name,
            path: &collision.dropped.display().to_string(),
            reason: "name-taken",
            err: &collision.kept.display().to_string(),
        });
    }

    for op in &plan.ops {
        match op {
            CollectionOp::Create {
                name,
                project,
                path,
            } => {
                if let Err(err) = index.add_collection(path, name) {
                    record_failure(&mut out, op, "add", &err);
                    continue;
                }
                register(index, name, project, cfg, &mut out);
                out.created += 1;
                tracing::info!(collection = %name, "collection created");
            }
            CollectionOp::Replace {
                name,
                project,
                path,
            } => {
                if let Err(err) = index.remove_collection(name) {
                    record_failure(&mut out, op, "remove", &err);
                    continue;
                }
                if let Err(err) = index.add_collection(path, name) {
                    record_failure(&mut out, op, "add", &err);
                    continue;
                }
                register(index, name, project, cfg, &mut out);
                out.recreated += 1;
                tracing::info!(collection = %name, "collection recreated");
            }
            CollectionOp::Prune { name } => {
                if let Err(err) = index.remove_collection(name) {
                    record_failure(&mut out, op, "remove", &err);
                    continue;
                }
                out.pruned += 1;
                tracing::info!(collection = %name, "stale collection pruned");
            }
        }
    }

    out
}
