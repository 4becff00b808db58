use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Parser, Debug)]
#[command(
    name = "convo-index",
    version,
    about = "Convert Claude session logs into per-project qmd collections"
)]
pub struct Cli {
    /// Print the command report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DryRunArg {
    /// Discover and name everything, but write nothing and mutate no collection
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full pipeline: resolve, convert, reconcile, embed
    Sync {
        #[command(flatten)]
        dry: DryRunArg,
        /// Remove matching collections whose project directory is gone
        #[arg(long)]
        prune_stale: bool,
        /// Skip `qmd embed` after reconciling
        #[arg(long)]
        no_embed: bool,
    },
    /// Convert session logs into documents only
    Convert {
        #[command(flatten)]
        dry: DryRunArg,
    },
    /// Bring collections in line with the existing conversation directories
    Reconcile {
        #[command(flatten)]
        dry: DryRunArg,
        #[arg(long)]
        prune_stale: bool,
    },
    /// Run `sync` on a fixed interval
    Watch {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
        /// Seconds between cycles (defaults to [schedule].interval_secs)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Search converted conversations
    Search {
        query: String,
        /// Restrict to one project's collection
        #[arg(long)]
        project: Option<String>,
    },
    /// Print one indexed document
    Get { path: String },
    /// Show resolved paths, configured env keys and the last run
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}: {}", report.command, if report.ok { "ok" } else { "failed" });
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let report = match cli.command {
        Command::Sync {
            dry,
            prune_stale,
            no_embed,
        } => commands::sync::run(&commands::sync::SyncOptions {
            dry_run: dry.dry_run,
            prune_stale,
            no_embed,
        })?,
        Command::Convert { dry } => commands::convert::run(&commands::convert::ConvertOptions {
            dry_run: dry.dry_run,
        })?,
        Command::Reconcile { dry, prune_stale } => {
            commands::reconcile::run(&commands::reconcile::ReconcileOptions {
                dry_run: dry.dry_run,
                prune_stale,
            })?
        }
        Command::Watch {
            once,
            interval_secs,
        } => commands::watch::run(&commands::watch::WatchOptions {
            once,
            interval_secs,
        })?,
        Command::Search { query, project } => {
            commands::search::run_search(&query, project.as_deref())?
        }
        Command::Get { path } => commands::search::run_get(&path)?,
        Command::Status => commands::status::run()?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
