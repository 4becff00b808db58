use crate::convo::paths::IndexPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSummary {
    pub started_at_epoch_secs: u64,
    pub finished_at_epoch_secs: u64,
    pub projects_processed: usize,
    pub projects_skipped: usize,
    pub sessions_converted: usize,
    pub sessions_unchanged: usize,
    pub sessions_skipped: usize,
    pub collections_created: usize,
    pub collections_recreated: usize,
    pub collections_pruned: usize,
    pub collections_failed: usize,
    pub embed_ok: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexState {
    pub schema_version: u32,
    pub last_run: Option<RunSummary>,
}

impl Default for IndexState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_run: None,
        }
    }
}

pub fn state_file_path(paths: &IndexPaths) -> PathBuf {
    paths.state_dir.join("last_run.json")
}

pub fn load(paths: &IndexPaths) -> Result<IndexState> {
    let file = state_file_path(paths);
    if !file.exists() {
        return Ok(IndexState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: IndexState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

pub fn save(paths: &IndexPaths, state: &IndexState) -> Result<PathBuf> {
    let file = state_file_path(paths);
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(state)?;
    fs::write(&file, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(file)
}
