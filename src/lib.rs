//! # witr
//!
//! Why is this running? Given a PID, a listening port, a name pattern or a
//! service label, `witr` reconstructs the process's full ancestry, works
//! out what launched it (init manager, container runtime, cron,
//! supervisor, shell, IDE), enriches it with socket, file, resource and
//! security signals, and renders a report, JSON, a streaming `ps`-style
//! table, or a live dashboard.
//!
//! ## Layers
//!
//! - [`exec`]: helper-command execution behind a swappable [`exec::Executor`]
//! - [`probe`]: platform fact gathering (`/proc` on Linux; `ps`/`lsof`/
//!   `launchctl` on Darwin; `netstat`/PowerShell on Windows)
//! - [`ancestry`], [`target`], [`source`], [`warnings`]: the analysis engine
//! - [`batch`]: bounded-concurrency fan-out over many processes
//! - [`output`], [`watch`]: renderers over the results

pub mod ancestry;
pub mod batch;
pub mod cli;
pub mod commands;
pub mod error;
pub mod exec;
pub mod git;
pub mod output;
pub mod probe;
pub mod source;
pub mod target;
pub mod types;
pub mod warnings;
pub mod watch;

use std::io;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;

pub use cli::Cli;
use commands::why::RenderOptions;
use error::ProbeError;
use types::AnalysisReport;

/// Analyze a single PID: ancestry, children, source verdict and warnings.
///
/// This is the library's core entry point; every non-batch rendering is a
/// view over the returned report.
pub fn analyze(pid: u32) -> Result<AnalysisReport, ProbeError> {
    let ancestry = ancestry::resolve(pid)?;

    let mut process = ancestry.last().cloned().expect("resolve never returns an empty chain");
    process.file_context = probe::file_context(pid);
    process.resource_context = probe::resource_context(pid);

    let children = ancestry::children(pid);
    let source = source::detect(&ancestry);
    let warnings = warnings::synthesize(&ancestry);

    Ok(AnalysisReport { process, ancestry, children, source, warnings })
}

/// Run one CLI invocation. Returns the process exit code:
/// 0 on success, 1 on an invalid or unmatched selector.
pub fn run(cli: Cli) -> Result<i32> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    match &cli.command {
        Some(cli::Commands::Ps { pattern, sort, watch }) => {
            return commands::ps::execute(pattern, *sort, cli.json, *watch);
        }
        Some(cli::Commands::Completions { shell }) => {
            generate(*shell, &mut Cli::command(), "witr", &mut io::stdout());
            return Ok(0);
        }
        None => {}
    }

    let Some(selector) = cli.selector() else {
        Cli::command().print_help()?;
        return Ok(2);
    };

    let opts = RenderOptions { json: cli.json, short: cli.short, tree: cli.tree, env: cli.env };
    commands::why::execute(selector, opts)
}
