//! Parent-chain resolution.
//!
//! Walks PPID links from the target up toward init, reading the full record
//! for each hop. A visited set guards against kernels reporting parent
//! cycles (including `pid == ppid`); a missing ancestor truncates the chain
//! rather than failing the whole analysis.

use std::collections::HashSet;

use crate::error::ProbeError;
use crate::probe;
use crate::types::Process;

/// Resolve the ancestry of `pid`, ordered init-first with the target last.
///
/// Termination: `ppid == 0`, `pid == 1`, a PID already on the chain, or a
/// failed read. An empty chain means the target itself is gone.
pub fn resolve(pid: u32) -> Result<Vec<Process>, ProbeError> {
    resolve_with(pid, probe::read_process)
}

/// Same walk with an injectable reader, so the termination rules are
/// testable against synthetic process tables.
pub fn resolve_with<F>(pid: u32, read: F) -> Result<Vec<Process>, ProbeError>
where
    F: Fn(u32) -> Result<Process, ProbeError>,
{
    let mut chain: Vec<Process> = Vec::new();
    let mut visited = HashSet::new();
    let mut current = pid;

    while current > 0 {
        if !visited.insert(current) {
            break;
        }

        let p = match read(current) {
            Ok(p) => p,
            Err(_) => break,
        };

        let next = p.ppid;
        let done = next == 0 || p.pid == 1;
        chain.insert(0, p);
        if done {
            break;
        }
        current = next;
    }

    if chain.is_empty() {
        return Err(ProbeError::NotFound(pid));
    }
    Ok(chain)
}

/// Direct children of `pid`, from a single process-table snapshot.
pub fn children(pid: u32) -> Vec<Process> {
    match probe::list_processes() {
        Ok(processes) => processes.into_iter().filter(|p| p.ppid == pid).collect(),
        Err(_) => Vec::new(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
