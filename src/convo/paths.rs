use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub convo_home: PathBuf,
    pub projects_dir: PathBuf,
    pub convert_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub state_dir: PathBuf,
    pub config_file: PathBuf,
    pub qmd_bin: PathBuf,
}

/// Environment keys that relocate the paths below.
pub const ENV_KEYS: &[&str] = &[
    "CONVO_HOME",
    "CLAUDE_PROJECTS_DIR",
    "CONVO_CONVERT_DIR",
    "CONVO_LOGS_DIR",
    "CONVO_CONFIG_PATH",
    "QMD_BIN",
];

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<IndexPaths> {
    let home = required_home_dir()?;
    let convo_home = env_or_default_path("CONVO_HOME", home.join(".claude-convo-index"));

    let projects_dir = env_or_default_path("CLAUDE_PROJECTS_DIR", home.join(".claude/projects"));
    let convert_dir = env_or_default_path("CONVO_CONVERT_DIR", convo_home.join("conversations"));
    let logs_dir = env_or_default_path("CONVO_LOGS_DIR", convo_home.join("logs"));
    let config_file = env_or_default_path("CONVO_CONFIG_PATH", convo_home.join("config.toml"));
    let qmd_bin = env_or_default_path("QMD_BIN", home.join(".bun/bin/qmd"));

    Ok(IndexPaths {
        state_dir: convo_home.join("state"),
        convo_home,
        projects_dir,
        convert_dir,
        logs_dir,
        config_file,
        qmd_bin,
    })
}

#[cfg(test)]
impl IndexPaths {
    pub fn rooted_at(root: &std::path::Path) -> Self {
        let convo_home = root.join("convo");
        Self {
            projects_dir: root.join("projects"),
            convert_dir: convo_home.join("conversations"),
            logs_dir: convo_home.join("logs"),
            state_dir: convo_home.join("state"),
            config_file: convo_home.join("config.toml"),
            qmd_bin: root.join("qmd"),
            convo_home,
        }
    }
}
