use crate::convo::config::ResolverConfig;
use crate::convo::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One resolved log group, ready for conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectGroup {
    pub identity: String,
    pub origin: String,
    pub group_dir: PathBuf,
    pub sessions: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoSessions,
    NoOrigin,
    NoIdentity { origin: String },
    Excluded { origin: String, marker: String },
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoSessions => "no-sessions",
            Self::NoOrigin => "no-origin",
            Self::NoIdentity { .. } => "no-identity",
            Self::Excluded { .. } => "excluded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedGroup {
    pub group_dir: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub groups: Vec<ProjectGroup>,
    pub skipped: Vec<SkippedGroup>,
}

#[derive(Debug, Deserialize)]
struct CwdLine {
    cwd: Option<String>,
}

fn is_session_log(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("jsonl")
}

pub fn session_logs(group_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in
        fs::read_dir(group_dir).with_context(|| format!("failed to read {}", group_dir.display()))?
    {
        let path = entry?.path();
        if is_session_log(&path) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// First non-empty `cwd` within the first `max_lines` lines.
/// Unparseable lines, invalid UTF-8 included, are passed over.
pub fn origin_from_log(path: &Path, max_lines: usize) -> Result<Option<String>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    for _ in 0..max_lines {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<CwdLine>(trimmed) else {
            continue;
        };
        if let Some(cwd) = entry.cwd.map(|c| c.trim().to_string())
            && !cwd.is_empty()
        {
            return Ok(Some(cwd));
        }
    }
    Ok(None)
}

fn find_origin(sessions: &[PathBuf], max_lines: usize) -> Option<String> {
    for session in sessions {
        match origin_from_log(session, max_lines) {
            Ok(Some(origin)) => return Some(origin),
            Ok(None) => {}
            Err(err) => warn::emit(WarnEvent {
                code: "SESSION_UNREADABLE",
                stage: "resolve",
                action: "read-origin",
                subject: "session",
                path: &session.display().to_string(),
                reason: "open-or-read-failed",
                err: &format!("{err:#}"),
            }),
        }
    }
    None
}

/// The final path segment of the originating path, ignoring trailing separators.
pub fn project_identity(origin: &str) -> Option<String> {
    let trimmed = origin.trim_end_matches(['/', '\\']);
    let last = trimmed.rsplit(['/', '\\']).next()?;
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}

/// Returns the first marker contained in `origin`. Any single marker is sufficient.
pub fn excluded_by<'a>(origin: &str, markers: &'a [String]) -> Option<&'a str> {
    markers
        .iter()
        .map(String::as_str)
        .find(|marker| !marker.is_empty() && origin.contains(marker))
}

pub fn resolve_group(
    group_dir: &Path,
    cfg: &ResolverConfig,
) -> Result<Result<ProjectGroup, SkipReason>> {
    let sessions = session_logs(group_dir)?;
    if sessions.is_empty() {
        return Ok(Err(SkipReason::NoSessions));
    }

    let Some(origin) = find_origin(&sessions, cfg.origin_scan_lines) else {
        return Ok(Err(SkipReason::NoOrigin));
    };

    if let Some(marker) = excluded_by(&origin, &cfg.exclude_markers) {
        return Ok(Err(SkipReason::Excluded {
            marker: marker.to_string(),
            origin,
        }));
    }

    let Some(identity) = project_identity(&origin) else {
        return Ok(Err(SkipReason::NoIdentity { origin }));
    };

    Ok(Ok(ProjectGroup {
        identity,
        origin,
        group_dir: group_dir.to_path_buf(),
        sessions,
    }))
}

fn log_skip(skipped: &SkippedGroup) {
    let dir = skipped.group_dir.display().to_string();
    match &skipped.reason {
        SkipReason::NoSessions => {
            tracing::debug!(group = %dir, "skipping log group without session logs");
        }
        SkipReason::Excluded { origin, marker } => {
            tracing::info!(
                group = %dir,
                origin = %origin,
                marker = %marker,
                "excluded disposable context"
            );
        }
        SkipReason::NoOrigin => warn::emit(WarnEvent {
            code: "ORIGIN_MISSING",
            stage: "resolve",
            action: "skip-group",
            subject: "group",
            path: &dir,
            reason: "no-cwd-in-leading-records",
            err: "",
        }),
        SkipReason::NoIdentity { origin } => warn::emit(WarnEvent {
            code: "IDENTITY_MISSING",
            stage: "resolve",
            action: "skip-group",
            subject: origin,
            path: &dir,
            reason: "origin-has-no-final-segment",
            err: "",
        }),
    }
}

/// Discover every log group under `projects_dir`, in directory-name order.
///
/// A missing root yields an empty resolution. Groups that cannot be listed are
/// warned about and left out; nothing here writes to disk.
pub fn resolve_projects(projects_dir: &Path, cfg: &ResolverConfig) -> Result<Resolution> {
    let mut out = Resolution::default();
    if !projects_dir.exists() {
        return Ok(out);
    }

    let mut group_dirs = Vec::new();
    for entry in fs::read_dir(projects_dir)
        .with_context(|| format!("failed to read {}", projects_dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            group_dirs.push(path);
        }
    }
    group_dirs.sort();

    for group_dir in group_dirs {
        match resolve_group(&group_dir, cfg) {
            Ok(Ok(group)) => out.groups.push(group),
            Ok(Err(reason)) => {
                let skipped = SkippedGroup { group_dir, reason };
                log_skip(&skipped);
                out.skipped.push(skipped);
            }
            Err(err) => warn::emit(WarnEvent {
                code: "GROUP_UNREADABLE",
                stage: "resolve",
                action: "skip-group",
                subject: "group",
                path: &group_dir.display().to_string(),
                reason: "list-failed",
                err: &format!("{err:#}"),
            }),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_log(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        fs::create_dir_all(dir).expect("mkdir");
        let path = dir.join(name);
        fs::write(&path, format!("{}\n", lines.join("\n"))).expect("write log");
        path
    }

    #[test]
    fn identity_is_final_segment() {
        assert_eq!(project_identity("/home/me/code/app"), Some("app".to_string()));
        assert_eq!(project_identity("/home/me/code/app/"), Some("app".to_string()));
        assert_eq!(project_identity("C:\\work\\tool"), Some("tool".to_string()));
        assert_eq!(project_identity("/"), None);
        assert_eq!(project_identity("/home/.."), None);
    }

    #[test]
    fn any_marker_excludes() {
        let markers = ResolverConfig::default().exclude_markers;
        assert!(excluded_by("/repo/.claude/worktrees/feature-x", &markers).is_some());
        assert!(excluded_by("/tmp/run/subagents/a1", &markers).is_some());
        assert!(excluded_by("/home/me/code/app", &markers).is_none());
    }

    #[test]
    fn origin_skips_blank_and_malformed_lines() {
        let tmp = tempdir().expect("tempdir");
        let log = write_log(
            tmp.path(),
            "s.jsonl",
            &[
                "{\"type\":\"summary\"}",
                "",
                "not json",
                "{\"type\":\"user\",\"cwd\":\"  \"}",
                "{\"type\":\"user\",\"cwd\":\"/home/me/app\"}",
            ],
        );
        assert_eq!(
            origin_from_log(&log, 10).expect("origin"),
            Some("/home/me/app".to_string())
        );
    }

    #[test]
    fn invalid_utf8_line_is_passed_over() {
        let tmp = tempdir().expect("tempdir");
        let log = tmp.path().join("s.jsonl");
        let mut raw = b"{\"type\":\"summary\",\"text\":\"\xff\xfe\"}\n".to_vec();
        raw.extend_from_slice(b"{\"type\":\"user\",\"cwd\":\"/home/me/app\"}\n");
        fs::write(&log, raw).expect("write");

        assert_eq!(
            origin_from_log(&log, 10).expect("origin"),
            Some("/home/me/app".to_string())
        );
        assert_eq!(origin_from_log(&log, 1).expect("origin"), None);
    }

    #[test]
    fn origin_scan_respects_line_limit() {
        let tmp = tempdir().expect("tempdir");
        let log = write_log(
            tmp.path(),
            "s.jsonl",
            &["{}", "{}", "{\"cwd\":\"/home/me/late\"}"],
        );
        assert_eq!(origin_from_log(&log, 2).expect("origin"), None);
        assert_eq!(
            origin_from_log(&log, 3).expect("origin"),
            Some("/home/me/late".to_string())
        );
    }

    #[test]
    fn groups_resolve_and_skip_with_reasons() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("projects");
        write_log(
            &root.join("-home-me-app"),
            "b.jsonl",
            &["{\"cwd\":\"/home/me/app\",\"sessionId\":\"b\"}"],
        );
        write_log(&root.join("-home-me-app"), "a.jsonl", &["{\"sessionId\":\"a\"}"]);
        write_log(
            &root.join("-repo-worktree"),
            "w.jsonl",
            &["{\"cwd\":\"/repo/.claude/worktrees/fix\"}"],
        );
        write_log(&root.join("-no-origin"), "n.jsonl", &["{\"type\":\"user\"}"]);
        fs::create_dir_all(root.join("-empty")).expect("mkdir");
        fs::write(root.join("-empty").join("notes.txt"), "x").expect("write");

        let out = resolve_projects(&root, &ResolverConfig::default()).expect("resolve");

        assert_eq!(out.groups.len(), 1);
        let group = &out.groups[0];
        assert_eq!(group.identity, "app");
        assert_eq!(group.origin, "/home/me/app");
        let names: Vec<_> = group
            .sessions
            .iter()
            .map(|p| p.file_name().and_then(|n| n.to_str()).unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["a.jsonl", "b.jsonl"]);

        let reasons: Vec<_> = out.skipped.iter().map(|s| s.reason.label()).collect();
        assert_eq!(reasons, vec!["no-sessions", "no-origin", "excluded"]);
        assert!(matches!(
            &out.skipped[2].reason,
            SkipReason::Excluded { marker, .. } if marker == "/.claude/worktrees/"
        ));
    }

    #[test]
    fn missing_root_is_empty() {
        let tmp = tempdir().expect("tempdir");
        let out = resolve_projects(&tmp.path().join("absent"), &ResolverConfig::default())
            .expect("resolve");
        assert!(out.groups.is_empty());
        assert!(out.skipped.is_empty());
    }
}
