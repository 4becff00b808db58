use crate::convo::config::ConvoConfig;
use crate::convo::qmd::QmdCli;
use crate::convo::reconcile::collection_name;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SNIPPET_CHARS: usize = 280;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    pub path: String,
    pub score: f64,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub collection: Option<String>,
    pub matches: Vec<SearchMatch>,
}

fn first_str<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| item.get(*key).and_then(Value::as_str))
}

/// Whitespace runs collapse to one space; anything past `SNIPPET_CHARS` becomes `…`.
fn one_line(text: &str) -> String {
    let mut out = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some((cut, _)) = out.char_indices().nth(SNIPPET_CHARS) {
        out.truncate(cut);
        out.push('…');
    }
    out
}

/// Matches from `qmd search --json`, best first. Accepts a bare array or `{ "results": [...] }`.
pub fn parse_matches(raw: &str) -> Vec<SearchMatch> {
    let Ok(v) = serde_json::from_str::<Value>(raw) else {
        return Vec::new();
    };

    let items = v
        .as_array()
        .cloned()
        .or_else(|| v.get("results").and_then(Value::as_array).cloned())
        .unwrap_or_default();

    let mut out: Vec<SearchMatch> = items
        .iter()
        .map(|item| {
            let snippet = one_line(first_str(item, &["snippet", "text", "content"]).unwrap_or(""));
            SearchMatch {
                path: first_str(item, &["path", "file", "source"])
                    .unwrap_or("")
                    .to_string(),
                score: item.get("score").and_then(Value::as_f64).unwrap_or(0.0),
                snippet,
            }
        })
        .collect();

    out.sort_by(|a, b| b.score.total_cmp(&a.score));
    out
}

/// Search every conversation collection, or only `project`'s.
pub fn search(
    cli: &QmdCli,
    cfg: &ConvoConfig,
    query: &str,
    project: Option<&str>,
) -> Result<SearchResult> {
    let collection = project.map(|p| collection_name(p, &cfg.index));
    let raw = cli.search(query, collection.as_deref())?;
    Ok(SearchResult {
        query: query.to_string(),
        collection,
        matches: parse_matches(&raw),
    })
}
