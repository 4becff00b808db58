use crate::convo::paths::IndexPaths;
use crate::error::IndexError;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Substrings marking disposable execution contexts. Any single match excludes the group.
    pub exclude_markers: Vec<String>,
    pub origin_scan_lines: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            exclude_markers: vec![
                "/.claude/worktrees/".to_string(),
                "/worktrees/agent-".to_string(),
                "/subagents/".to_string(),
            ],
            origin_scan_lines: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub title: String,
    pub default_slug: String,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            title: "Conversation".to_string(),
            default_slug: "untitled".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub collection_prefix: String,
    pub collection_suffix: String,
    pub context_template: String,
    pub embed_timeout_secs: u64,
    pub prune_stale: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection_prefix: "claude-".to_string(),
            collection_suffix: "-conversations".to_string(),
            context_template: "Claude Code conversations for project {project}".to_string(),
            embed_timeout_secs: 300,
            prune_stale: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConvoConfig {
    pub resolver: ResolverConfig,
    pub transcript: TranscriptConfig,
    pub index: IndexConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialConvoConfig {
    resolver: Option<ResolverConfig>,
    transcript: Option<TranscriptConfig>,
    index: Option<IndexConfig>,
    schedule: Option<ScheduleConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => parse_bool(v.trim()).unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "true" | "TRUE" | "yes" | "on" => Some(true),
        "0" | "false" | "FALSE" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = parse_csv(&v);
            if out.is_empty() { fallback.to_vec() } else { out }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn validate(cfg: &ConvoConfig) -> Result<()> {
    if cfg.resolver.origin_scan_lines == 0 {
        return Err(anyhow!("invalid origin scan lines: must be >= 1"));
    }
    if cfg.resolver.exclude_markers.iter().any(|m| m.is_empty()) {
        return Err(anyhow!(
            "invalid exclude marker: empty markers would exclude every project"
        ));
    }
    if cfg.transcript.default_slug.trim().is_empty() {
        return Err(anyhow!("invalid default slug: cannot be empty"));
    }
    if cfg.index.collection_prefix.trim().is_empty()
        && cfg.index.collection_suffix.trim().is_empty()
    {
        return Err(anyhow!(
            "invalid collection naming: prefix and suffix cannot both be empty"
        ));
    }
    if cfg.index.embed_timeout_secs == 0 {
        return Err(anyhow!("invalid embed timeout: must be >= 1 second"));
    }
    if cfg.schedule.interval_secs == 0 {
        return Err(anyhow!("invalid schedule interval: must be >= 1 second"));
    }
    Ok(())
}

fn merge_toml(base: &mut ConvoConfig, raw: &str, origin: &Path) -> Result<()> {
    let parsed: PartialConvoConfig = toml::from_str(raw).map_err(|err| {
        IndexError::InvalidConfig(format!("failed to parse {}: {err}", origin.display()))
    })?;
    if let Some(resolver) = parsed.resolver {
        base.resolver = resolver;
    }
    if let Some(transcript) = parsed.transcript {
        base.transcript = transcript;
    }
    if let Some(index) = parsed.index {
        base.index = index;
    }
    if let Some(schedule) = parsed.schedule {
        base.schedule = schedule;
    }
    Ok(())
}

fn merge_file_config(base: &mut ConvoConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| IndexError::InvalidConfig(format!("{}: {err}", path.display())))?;
    merge_toml(base, &raw, path)
}

/// Environment keys that override `config.toml` values.
pub const ENV_KEYS: &[&str] = &[
    "CONVO_EXCLUDE_MARKERS",
    "CONVO_ORIGIN_SCAN_LINES",
    "CONVO_TRANSCRIPT_TITLE",
    "CONVO_DEFAULT_SLUG",
    "CONVO_EMBED_TIMEOUT_SECS",
    "CONVO_PRUNE_STALE",
    "CONVO_INTERVAL_SECS",
];

fn apply_env_overrides(cfg: &mut ConvoConfig) {
    cfg.resolver.exclude_markers =
        env_or_csv("CONVO_EXCLUDE_MARKERS", &cfg.resolver.exclude_markers);
    cfg.resolver.origin_scan_lines = env_or_u64(
        "CONVO_ORIGIN_SCAN_LINES",
        cfg.resolver.origin_scan_lines as u64,
    ) as usize;
    cfg.transcript.title = env_or_string("CONVO_TRANSCRIPT_TITLE", &cfg.transcript.title);
    cfg.transcript.default_slug =
        env_or_string("CONVO_DEFAULT_SLUG", &cfg.transcript.default_slug);
    cfg.index.embed_timeout_secs =
        env_or_u64("CONVO_EMBED_TIMEOUT_SECS", cfg.index.embed_timeout_secs);
    cfg.index.prune_stale = env_or_bool("CONVO_PRUNE_STALE", cfg.index.prune_stale);
    cfg.schedule.interval_secs = env_or_u64("CONVO_INTERVAL_SECS", cfg.schedule.interval_secs);
}

pub fn load_config(paths: &IndexPaths) -> Result<ConvoConfig> {
    let mut cfg = ConvoConfig::default();
    merge_file_config(&mut cfg, &paths.config_file)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
