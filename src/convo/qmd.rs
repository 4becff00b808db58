use crate::convo::util::run_command_with_optional_timeout;
use crate::error::IndexError;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

/// Collection-level operations the reconciler needs from a search engine.
pub trait SearchIndex {
    fn list_collections(&self) -> Result<BTreeSet<String>>;
    fn add_collection(&self, path: &Path, name: &str) -> Result<()>;
    fn remove_collection(&self, name: &str) -> Result<()>;
    fn register_context(&self, uri: &str, description: &str) -> Result<()>;
    fn generate_embeddings(&self, timeout: Duration) -> Result<()>;
}

pub fn collection_uri(name: &str) -> String {
    format!("qmd://{name}")
}

/// Collection names from `qmd collection list` output that match `<prefix>…<suffix>`.
pub fn parse_collection_list(raw: &str, prefix: &str, suffix: &str) -> BTreeSet<String> {
    let pattern = format!(
        r"^\s*({}[^\s(]+{})\s+\(",
        regex::escape(prefix),
        regex::escape(suffix)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return BTreeSet::new();
    };
    raw.lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn resolve_qmd_bin(bin: &Path) -> Result<PathBuf> {
    if bin.exists() {
        return Ok(bin.to_path_buf());
    }
    which::which("qmd").map_err(|_| {
        IndexError::MissingSearchEngine(format!(
            "{} does not exist and qmd is not on PATH",
            bin.display()
        ))
        .into()
    })
}

#[derive(Debug, Clone)]
pub struct QmdCli {
    bin: PathBuf,
    prefix: String,
    suffix: String,
}

impl QmdCli {
    pub fn new(qmd_bin: &Path, prefix: &str, suffix: &str) -> Result<Self> {
        Ok(Self {
            bin: resolve_qmd_bin(qmd_bin)?,
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args);
        cmd
    }

    fn run(&self, label: &str, mut cmd: Command, timeout: Option<Duration>) -> Result<String> {
        tracing::debug!(command = label, "running qmd");
        let output: Output = run_command_with_optional_timeout(&mut cmd, timeout)
            .with_context(|| format!("failed to run `{} {label}`", self.bin.display()))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).to_string());
        }
        Err(IndexError::SearchEngineFailed {
            command: label.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into())
    }

    pub fn search(&self, query: &str, collection: Option<&str>) -> Result<String> {
        let mut cmd = self.command(["search", query]);
        if let Some(name) = collection {
            cmd.arg("-c").arg(name);
        }
        cmd.arg("--json");
        self.run("search", cmd, None)
    }

    pub fn get_document(&self, path: &str) -> Result<String> {
        self.run("get", self.command(["get", path]), None)
    }
}

impl SearchIndex for QmdCli {
    fn list_collections(&self) -> Result<BTreeSet<String>> {
        let raw = self.run(
            "collection list",
            self.command(["collection", "list"]),
            None,
        )?;
        Ok(parse_collection_list(&raw, &self.prefix, &self.suffix))
    }

    fn add_collection(&self, path: &Path, name: &str) -> Result<()> {
        let mut cmd = self.command(["collection", "add"]);
        cmd.arg(path).arg("--name").arg(name);
        self.run("collection add", cmd, None).map(|_| ())
    }

    fn remove_collection(&self, name: &str) -> Result<()> {
        self.run(
            "collection remove",
            self.command(["collection", "remove", name]),
            None,
        )
        .map(|_| ())
    }

    fn register_context(&self, uri: &str, description: &str) -> Result<()> {
        self.run(
            "context add",
            self.command(["context", "add", uri, description]),
            None,
        )
        .map(|_| ())
    }

    fn generate_embeddings(&self, timeout: Duration) -> Result<()> {
        self.run("embed", self.command(["embed"]), Some(timeout))
            .map(|_| ())
    }
}

/// Stand-in for a search engine that could not be located. Every call fails with the reason.
#[derive(Debug, Clone)]
pub struct UnavailableIndex {
    pub reason: String,
}

impl UnavailableIndex {
    fn fail<T>(&self) -> Result<T> {
        Err(IndexError::MissingSearchEngine(self.reason.clone()).into())
    }
}

impl SearchIndex for UnavailableIndex {
    fn list_collections(&self) -> Result<BTreeSet<String>> {
        self.fail()
    }

    fn add_collection(&self, _path: &Path, _name: &str) -> Result<()> {
        self.fail()
    }

    fn remove_collection(&self, _name: &str) -> Result<()> {
        self.fail()
    }

    fn register_context(&self, _uri: &str, _description: &str) -> Result<()> {
        self.fail()
    }

    fn generate_embeddings(&self, _timeout: Duration) -> Result<()> {
        self.fail()
    }
}
