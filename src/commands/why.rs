//! The default command: analyze one target and explain why it is running.

use std::io::IsTerminal;

use anyhow::Result;
use colored::Colorize;
use dialoguer::Select;
use log::debug;

use crate::cli::Selector;
use crate::error::ResolveError;
use crate::output::{json, report};
use crate::target;
use crate::types::{Target, TargetKind};

/// Which rendering of the report was asked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub json: bool,
    pub short: bool,
    pub tree: bool,
    pub env: bool,
}

pub fn execute(selector: Selector, opts: RenderOptions) -> Result<i32> {
    let (target, pids) = match resolve_selector(selector) {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("{} {err}", "Error:".red().bold());
            return Ok(1);
        }
    };

    let pid = match choose_pid(&target, &pids, opts.json) {
        Ok(pid) => pid,
        Err(code) => return Ok(code),
    };

    let analysis = match crate::analyze(pid) {
        Ok(analysis) => analysis,
        Err(err) => {
            eprintln!("{} {err}", "Error:".red().bold());
            return Ok(1);
        }
    };

    if opts.json {
        println!("{}", json::render(&analysis));
    } else if opts.short {
        print!("{}", report::render_short(&analysis));
    } else if opts.tree {
        print!("{}", report::render_tree(&analysis.ancestry));
    } else if opts.env {
        print!("{}", report::render_env(&analysis.process));
    } else {
        print!("{}", report::render(&analysis));
    }

    Ok(0)
}

fn resolve_selector(selector: Selector) -> Result<(Target, Vec<u32>), ResolveError> {
    match selector {
        Selector::One(target) => {
            let pids = target::resolve(&target)?;
            Ok((target, pids))
        }
        Selector::PortThenPid(port) => {
            let port_target = Target::port(port.to_string());
            match target::resolve(&port_target) {
                Ok(pids) => Ok((port_target, pids)),
                Err(ResolveError::NoListener(_)) => {
                    debug!("nothing listening on {port}; retrying as a PID");
                    let pid_target = Target::pid(port.to_string());
                    let pids = target::resolve(&pid_target)?;
                    Ok((pid_target, pids))
                }
                Err(err) => Err(err),
            }
        }
    }
}

/// Narrow a multi-PID resolution down to one.
///
/// Port listeners collapse to the lowest PID (several listeners on one
/// port are almost always the same server). Name matches ask the user on
/// a terminal; otherwise the candidates are listed and the run fails so
/// scripts never get a silently-picked process.
fn choose_pid(target: &Target, pids: &[u32], json: bool) -> Result<u32, i32> {
    match pids {
        [] => Err(1),
        [only] => Ok(*only),
        _ => {
            if target.kind == TargetKind::Port {
                return Ok(pids[0]);
            }
            if !json && std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
                if let Some(pid) = prompt_for_pid(pids) {
                    return Ok(pid);
                }
            }
            eprintln!(
                "{} multiple processes match {:?}: {}",
                "Error:".red().bold(),
                target.value,
                pids.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
            );
            eprintln!("Narrow the selection with --pid <PID>.");
            Err(1)
        }
    }
}

fn prompt_for_pid(pids: &[u32]) -> Option<u32> {
    let items: Vec<String> = pids
        .iter()
        .map(|&pid| match crate::probe::read_process(pid) {
            Ok(p) => format!("{pid}  {}  {}", p.command, p.user),
            Err(_) => pid.to_string(),
        })
        .collect();

    let choice = Select::new()
        .with_prompt("Multiple processes match; pick one")
        .items(&items)
        .default(0)
        .interact()
        .ok()?;

    pids.get(choice).copied()
}
