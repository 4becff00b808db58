use crate::convo::config::TranscriptConfig;
use crate::convo::resolver::ProjectGroup;
use crate::convo::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const ID_PREFIX_CHARS: usize = 8;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogRecord {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<RecordMessage>,
    session_id: Option<String>,
    slug: Option<String>,
    timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RecordMessage {
    content: Option<Value>,
}

/// Header fields taken from the first record of a session log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMeta {
    pub session_id: String,
    pub slug: String,
    pub date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertAction {
    Written,
    Unchanged,
    WouldWrite,
}

#[derive(Debug, Clone)]
pub struct ConvertedSession {
    pub source: PathBuf,
    pub document: PathBuf,
    pub action: ConvertAction,
    pub parse_errors: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectConversion {
    pub identity: String,
    pub output_dir: PathBuf,
    pub sessions: Vec<ConvertedSession>,
    pub skipped: Vec<PathBuf>,
}

impl ProjectConversion {
    pub fn count(&self, action: ConvertAction) -> usize {
        self.sessions.iter().filter(|s| s.action == action).count()
    }
}

fn today() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

fn date_from_timestamp(timestamp: Option<&str>) -> Option<String> {
    let head = timestamp?.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()?;
    Some(head.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("session")
        .to_string()
}

/// Metadata from the first non-blank line only. An unusable first record degrades to fallbacks.
pub fn read_meta(raw: &str, source: &Path, cfg: &TranscriptConfig) -> SessionMeta {
    let first = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| serde_json::from_str::<LogRecord>(line).ok())
        .unwrap_or_default();

    SessionMeta {
        session_id: non_empty(first.session_id).unwrap_or_else(|| file_stem(source)),
        slug: non_empty(first.slug).unwrap_or_else(|| cfg.default_slug.clone()),
        date: date_from_timestamp(first.timestamp.as_deref()).unwrap_or_else(today),
    }
}

fn sanitize_id_prefix(id: &str) -> String {
    id.chars()
        .take(ID_PREFIX_CHARS)
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// `<date>-<first 8 chars of id>.md`.
pub fn document_name(date: &str, session_id: &str) -> String {
    format!("{date}-{}.md", sanitize_id_prefix(session_id))
}

/// Text-typed fragments joined by newlines. Anything else contributes nothing.
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(fragments) => fragments
            .iter()
            .filter(|f| f.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|f| f.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn heading_for(kind: Option<&str>) -> Option<&'static str> {
    match kind {
        Some("user") => Some("User"),
        Some("assistant") => Some("Assistant"),
        _ => None,
    }
}

fn render_header(meta: &SessionMeta, origin: &str, cfg: &TranscriptConfig) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}: {}\n\n", cfg.title, meta.slug));
    out.push_str(&format!("- **Date**: {}\n", meta.date));
    out.push_str(&format!("- **Session ID**: {}\n", meta.session_id));
    out.push_str(&format!("- **Project**: {origin}\n\n"));
    out.push_str("---\n\n");
    out
}

/// Render every user/assistant record. Returns the body and the number of unparseable lines.
pub fn render_body(raw: &str) -> (String, usize) {
    let mut out = String::new();
    let mut errors = 0usize;

    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = match serde_json::from_str::<LogRecord>(trimmed) {
            Ok(record) => record,
            Err(err) => {
                errors += 1;
                out.push_str(&format!("> [parse error] line {}: {err}\n\n", idx + 1));
                continue;
            }
        };
        let Some(heading) = heading_for(record.kind.as_deref()) else {
            continue;
        };
        let text = record
            .message
            .and_then(|m| m.content)
            .map(|c| content_text(&c))
            .unwrap_or_default();
        let text = text.trim_end();
        if text.trim().is_empty() {
            continue;
        }
        out.push_str(&format!("## {heading}\n\n{text}\n\n"));
    }

    (out, errors)
}

pub fn render_document(
    raw: &str,
    source: &Path,
    origin: &str,
    cfg: &TranscriptConfig,
) -> (SessionMeta, String, usize) {
    let meta = read_meta(raw, source, cfg);
    let (body, errors) = render_body(raw);
    let mut doc = render_header(&meta, origin, cfg);
    doc.push_str(&body);
    (meta, doc, errors)
}

fn write_if_changed(dir: &Path, target: &Path, contents: &str) -> Result<ConvertAction> {
    if let Ok(existing) = fs::read(target)
        && existing == contents.as_bytes()
    {
        return Ok(ConvertAction::Unchanged);
    }

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(target)
        .with_context(|| format!("failed to write {}", target.display()))?;
    Ok(ConvertAction::Written)
}

/// Convert one session log into at most one document under `output_dir`.
///
/// `Ok(None)` means the log could not be read; the caller keeps going with siblings.
pub fn convert_session(
    source: &Path,
    origin: &str,
    output_dir: &Path,
    cfg: &TranscriptConfig,
    dry_run: bool,
) -> Result<Option<ConvertedSession>> {
    let raw = match fs::read(source) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            warn::emit(WarnEvent {
                code: "SESSION_UNREADABLE",
                stage: "convert",
                action: "skip-session",
                subject: &file_stem(source),
                path: &source.display().to_string(),
                reason: "read-failed",
                err: &err.to_string(),
            });
            return Ok(None);
        }
    };

    let (meta, doc, parse_errors) = render_document(&raw, source, origin, cfg);
    let document = output_dir.join(document_name(&meta.date, &meta.session_id));

    if parse_errors > 0 {
        warn::emit(WarnEvent {
            code: "SESSION_PARTIAL",
            stage: "convert",
            action: "render-with-markers",
            subject: &meta.session_id,
            path: &source.display().to_string(),
            reason: &format!("{parse_errors}-unparseable-lines"),
            err: "",
        });
    }

    let action = if dry_run {
        ConvertAction::WouldWrite
    } else {
        write_if_changed(output_dir, &document, &doc)?
    };

    Ok(Some(ConvertedSession {
        source: source.to_path_buf(),
        document,
        action,
        parse_errors,
    }))
}

/// Convert every session of a group into `<convert_root>/<identity>/`.
///
/// Failing to create the output directory is fatal. A session whose document
/// cannot be written is warned about and skipped.
pub fn convert_project(
    group: &ProjectGroup,
    convert_root: &Path,
    cfg: &TranscriptConfig,
    dry_run: bool,
) -> Result<ProjectConversion> {
    let output_dir = convert_root.join(&group.identity);
    if !dry_run {
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;
    }

    let mut out = ProjectConversion {
        identity: group.identity.clone(),
        output_dir: output_dir.clone(),
        ..ProjectConversion::default()
    };

    for source in &group.sessions {
        match convert_session(source, &group.origin, &output_dir, cfg, dry_run) {
            Ok(Some(converted)) => {
                tracing::debug!(
                    group = %group.group_dir.display(),
                    source = %converted.source.display(),
                    document = %converted.document.display(),
                    action = ?converted.action,
                    "session converted"
                );
                out.sessions.push(converted);
            }
            Ok(None) => out.skipped.push(source.clone()),
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "DOCUMENT_WRITE_FAILED",
                    stage: "convert",
                    action: "skip-session",
                    subject: &group.identity,
                    path: &source.display().to_string(),
                    reason: "write-failed",
                    err: &format!("{err:#}"),
                });
                out.skipped.push(source.clone());
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn cfg() -> TranscriptConfig {
        TranscriptConfig::default()
    }

    fn group_with(dir: &Path, files: &[(&str, &str)]) -> ProjectGroup {
        fs::create_dir_all(dir).expect("mkdir");
        let mut sessions = Vec::new();
        for (name, body) in files {
            let path = dir.join(name);
            fs::write(&path, body).expect("write log");
            sessions.push(path);
        }
        ProjectGroup {
            identity: "app".to_string(),
            origin: "/home/me/app".to_string(),
            group_dir: dir.to_path_buf(),
            sessions,
        }
    }

    fn valid_log(id: &str) -> String {
        [
            json!({"type":"user","sessionId":id,"slug":"fix-login","timestamp":"2024-03-01T09:15:00Z","cwd":"/home/me/app","message":{"role":"user","content":"Why does login fail?"}}),
            json!({"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Looking now."},{"type":"tool_use","name":"Read","input":{"path":"a.rs"}},{"type":"text","text":"Found it."}]}}),
            json!({"type":"system","message":{"content":"ignored"}}),
        ]
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n")
    }

    #[test]
    fn document_name_uses_date_and_eight_id_chars() {
        assert_eq!(document_name("2024-03-01", "abcdef1234"), "2024-03-01-abcdef12.md");
        assert_eq!(document_name("2024-03-01", "abc"), "2024-03-01-abc.md");
        assert_eq!(document_name("2024-03-01", "ab/cd.ef99"), "2024-03-01-ab_cd_ef.md");
    }

    #[test]
    fn meta_falls_back_to_stem_default_slug_and_today() {
        let meta = read_meta(
            "{\"type\":\"user\",\"slug\":null}\n",
            Path::new("/logs/9f8e7d6c5b4a.jsonl"),
            &cfg(),
        );
        assert_eq!(meta.session_id, "9f8e7d6c5b4a");
        assert_eq!(meta.slug, "untitled");
        assert_eq!(meta.date, today());
    }

    #[test]
    fn meta_reads_only_first_record() {
        let raw = "{\"sessionId\":\"first\"}\n{\"sessionId\":\"second\",\"slug\":\"late\"}\n";
        let meta = read_meta(raw, Path::new("x.jsonl"), &cfg());
        assert_eq!(meta.session_id, "first");
        assert_eq!(meta.slug, "untitled");
    }

    #[test]
    fn invalid_timestamp_falls_back_to_today() {
        assert_eq!(
            date_from_timestamp(Some("2024-03-01T00:00:00Z")),
            Some("2024-03-01".to_string())
        );
        assert_eq!(date_from_timestamp(Some("yesterday")), None);
        assert_eq!(date_from_timestamp(Some("2024-3-1")), None);
        assert_eq!(date_from_timestamp(None), None);
    }

    #[test]
    fn only_text_fragments_survive() {
        let content = json!([
            {"type":"text","text":"one"},
            {"type":"tool_use","name":"Bash","input":{"command":"ls"}},
            {"type":"tool_result","content":"secret"},
            {"type":"text","text":"two"}
        ]);
        assert_eq!(content_text(&content), "one\ntwo");
        assert_eq!(content_text(&json!("plain")), "plain");
        assert_eq!(content_text(&json!(42)), "");
    }

    #[test]
    fn rendered_document_matches_template() {
        let raw = valid_log("abcdef1234");
        let (meta, doc, errors) =
            render_document(&raw, Path::new("s.jsonl"), "/home/me/app", &cfg());
        assert_eq!(errors, 0);
        assert_eq!(meta.date, "2024-03-01");
        let want = "# Conversation: fix-login\n\n\
                    - **Date**: 2024-03-01\n\
                    - **Session ID**: abcdef1234\n\
                    - **Project**: /home/me/app\n\n\
                    ---\n\n\
                    ## User\n\nWhy does login fail?\n\n\
                    ## Assistant\n\nLooking now.\nFound it.\n\n";
        assert_eq!(doc, want);
    }

    #[test]
    fn tool_only_turns_produce_no_heading() {
        let content = json!([{"type":"tool_result","content":"ok"}]);
        let raw = json!({"type":"user","message":{"content":content}}).to_string();
        let (body, errors) = render_body(&raw);
        assert_eq!(errors, 0);
        assert!(body.is_empty());
    }

    #[test]
    fn malformed_line_becomes_inline_marker() {
        let raw = format!("{}\n{{\"type\":\"user\",\n", valid_log("abc"));
        let (body, errors) = render_body(&raw);
        assert_eq!(errors, 1);
        assert!(body.contains("> [parse error] line 4:"));
        assert!(body.contains("## Assistant"));
    }

    #[test]
    fn one_malformed_session_does_not_stop_siblings() {
        let tmp = tempdir().expect("tempdir");
        let header = json!({"sessionId":"22222222bbbb","timestamp":"2024-03-02T00:00:00Z"});
        let broken = format!("{header}\n{{broken json\n");
        let group = group_with(
            &tmp.path().join("logs"),
            &[
                ("s1.jsonl", &*valid_log("11111111aaaa")),
                ("s2.jsonl", &*broken),
                ("s3.jsonl", &*valid_log("33333333cccc")),
            ],
        );
        let root = tmp.path().join("out");
        let out = convert_project(&group, &root, &cfg(), false).expect("convert");

        assert_eq!(out.sessions.len(), 3);
        assert!(out.skipped.is_empty());
        let partial = fs::read_to_string(root.join("app/2024-03-02-22222222.md")).expect("read");
        assert!(partial.contains("[parse error]"));
        assert!(root.join("app/2024-03-01-11111111.md").exists());
        assert!(root.join("app/2024-03-01-33333333.md").exists());
    }

    #[test]
    fn reconversion_is_byte_identical_and_reported_unchanged() {
        let tmp = tempdir().expect("tempdir");
        let group = group_with(&tmp.path().join("logs"), &[("s.jsonl", &*valid_log("abcdef1234"))]);
        let root = tmp.path().join("out");

        let first = convert_project(&group, &root, &cfg(), false).expect("first");
        assert_eq!(first.count(ConvertAction::Written), 1);
        let doc = root.join("app/2024-03-01-abcdef12.md");
        let before = fs::read(&doc).expect("read");

        let second = convert_project(&group, &root, &cfg(), false).expect("second");
        assert_eq!(second.count(ConvertAction::Unchanged), 1);
        assert_eq!(fs::read(&doc).expect("read"), before);
        assert_eq!(fs::read_dir(root.join("app")).expect("ls").count(), 1);
    }

    #[test]
    fn changed_log_overwrites_same_document() {
        let tmp = tempdir().expect("tempdir");
        let logs = tmp.path().join("logs");
        let group = group_with(&logs, &[("s.jsonl", &*valid_log("abcdef1234"))]);
        let root = tmp.path().join("out");
        convert_project(&group, &root, &cfg(), false).expect("first");

        let appended = format!(
            "{}\n{}",
            valid_log("abcdef1234"),
            json!({"type":"user","message":{"content":"One more thing"}})
        );
        fs::write(&group.sessions[0], appended).expect("append");
        let out = convert_project(&group, &root, &cfg(), false).expect("second");

        assert_eq!(out.count(ConvertAction::Written), 1);
        assert_eq!(fs::read_dir(root.join("app")).expect("ls").count(), 1);
        let doc = fs::read_to_string(root.join("app/2024-03-01-abcdef12.md")).expect("read");
        assert!(doc.ends_with("## User\n\nOne more thing\n\n"));
    }

    #[test]
    fn dry_run_reports_names_without_writing() {
        let tmp = tempdir().expect("tempdir");
        let group = group_with(&tmp.path().join("logs"), &[("s.jsonl", &*valid_log("abcdef1234"))]);
        let root = tmp.path().join("out");

        let out = convert_project(&group, &root, &cfg(), true).expect("dry run");
        assert_eq!(out.count(ConvertAction::WouldWrite), 1);
        assert_eq!(out.sessions[0].document, root.join("app/2024-03-01-abcdef12.md"));
        assert!(!root.exists());
    }

    #[test]
    fn unreadable_session_is_skipped() {
        let tmp = tempdir().expect("tempdir");
        let logs = tmp.path().join("logs");
        let mut group = group_with(&logs, &[("s.jsonl", &*valid_log("abcdef1234"))]);
        group.sessions.insert(0, tmp.path().join("logs/missing.jsonl"));
        let out = convert_project(&group, &tmp.path().join("out"), &cfg(), false).expect("convert");
        assert_eq!(out.sessions.len(), 1);
        assert_eq!(out.skipped.len(), 1);
    }

    #[test]
    fn uncreatable_output_dir_is_fatal() {
        let tmp = tempdir().expect("tempdir");
        let group = group_with(&tmp.path().join("logs"), &[("s.jsonl", &*valid_log("abcdef1234"))]);
        let blocker = tmp.path().join("out");
        fs::write(&blocker, "file, not dir").expect("write");
        assert!(convert_project(&group, &blocker, &cfg(), false).is_err());
    }
}
