use anyhow::Result;

use crate::commands::{CommandReport, load_environment};
use crate::convo::config::ConvoConfig;
use crate::convo::qmd::QmdCli;
use crate::convo::search;

fn open_cli(report: &mut CommandReport) -> Result<Option<(QmdCli, ConvoConfig)>> {
    let (paths, cfg) = load_environment()?;
    match QmdCli::new(
        &paths.qmd_bin,
        &cfg.index.collection_prefix,
        &cfg.index.collection_suffix,
    ) {
        Ok(cli) => Ok(Some((cli, cfg))),
        Err(err) => {
            report.issue(format!("{err:#}"));
            Ok(None)
        }
    }
}

pub fn run_search(query: &str, project: Option<&str>) -> Result<CommandReport> {
    let mut report = CommandReport::new("search");
    let Some((cli, cfg)) = open_cli(&mut report)? else {
        return Ok(report);
    };

    let result = match search::search(&cli, &cfg, query, project) {
        Ok(result) => result,
        Err(err) => {
            report.issue(format!("search failed: {err:#}"));
            return Ok(report);
        }
    };

    report.detail(format!("query={}", result.query));
    if let Some(collection) = &result.collection {
        report.detail(format!("collection={collection}"));
    }
    report.detail(format!("matches={}", result.matches.len()));
    for m in &result.matches {
        report.detail(format!("{:.3} {} {}", m.score, m.path, m.snippet));
    }
    Ok(report)
}

pub fn run_get(path: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("get");
    let Some((cli, _)) = open_cli(&mut report)? else {
        return Ok(report);
    };

    match cli.get_document(path) {
        Ok(body) => report.detail(body.trim_end().to_string()),
        Err(err) => report.issue(format!("get failed: {err:#}")),
    }
    Ok(report)
}
