//! Bounded fan-out of full process analysis.
//!
//! One worker pool of exactly `concurrency` threads drains a shared job
//! queue and streams summaries into a channel in completion order. A
//! worker's failure is encoded on its own summary; it never disturbs
//! peers, and the channel closes when the last worker finishes.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

use log::debug;

use crate::ancestry;
use crate::source;
use crate::types::{Source, SourceKind};

use super::{detect_npm_script, format_age, ProcessSummary};

pub const DEFAULT_CONCURRENCY: usize = 10;

/// Analyze every PID with at most `concurrency` in flight, streaming
/// summaries as they complete. Output order is unconstrained; consumers
/// sort if they need determinism.
pub fn analyze_async(pids: Vec<u32>, concurrency: usize) -> Receiver<ProcessSummary> {
    analyze_async_with(pids, concurrency, analyze_process)
}

/// Same pipeline with an injectable per-PID analysis, so the pool's
/// bounds are testable without a live process table.
pub fn analyze_async_with<F>(pids: Vec<u32>, concurrency: usize, analyze: F) -> Receiver<ProcessSummary>
where
    F: Fn(u32) -> ProcessSummary + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel();
    let queue: Arc<Mutex<VecDeque<u32>>> = Arc::new(Mutex::new(pids.into()));
    let analyze = Arc::new(analyze);

    let workers = concurrency.max(1);
    debug!("batch fan-out with {workers} workers");

    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let analyze = Arc::clone(&analyze);
        let tx = tx.clone();

        thread::spawn(move || loop {
            let job = queue.lock().unwrap().pop_front();
            let Some(pid) = job else {
                break;
            };
            // A closed receiver just ends the stream early.
            if tx.send(analyze(pid)).is_err() {
                break;
            }
        });
    }

    rx
}

/// Full analysis of one PID, collapsed into a summary row.
pub fn analyze_process(pid: u32) -> ProcessSummary {
    let ancestry = match ancestry::resolve(pid) {
        Ok(chain) => chain,
        Err(err) => {
            return ProcessSummary { pid, error: Some(err.to_string()), ..Default::default() }
        }
    };

    let src = source::detect(&ancestry);
    let target = ancestry.last().expect("resolve never returns an empty chain");

    ProcessSummary {
        pid,
        command: target.command.clone(),
        cmdline: target.cmdline.clone(),
        user: target.user.clone(),
        cpu_percent: target.cpu_percent,
        memory_mb: target.memory_rss_bytes / (1024 * 1024),
        started_at: target.started_at,
        age: format_age(target.started_at),
        source: simplify_source(&src),
        script: detect_npm_script(&target.cmdline, &target.working_dir),
        workdir: target.working_dir.trim().to_string(),
        git_repo: if target.git_repo.is_empty() { "-".to_string() } else { target.git_repo.clone() },
        health: target.health.to_string(),
        error: None,
    }
}

/// Collapse a classified source to a single table-friendly word.
fn simplify_source(source: &Source) -> String {
    match &source.kind {
        SourceKind::Launchd { .. } => "launchd".to_string(),
        SourceKind::Systemd { .. } => "systemd".to_string(),
        SourceKind::Container { .. } => "container".to_string(),
        SourceKind::BsdRc => "rc.d".to_string(),
        SourceKind::Cron => "cron".to_string(),
        SourceKind::Supervisor { name } => {
            if name.is_empty() {
                "supervisor".to_string()
            } else {
                name.clone()
            }
        }
        SourceKind::Ide { name } => name.clone(),
        SourceKind::Shell { .. } => "shell".to_string(),
        SourceKind::Unknown => "-".to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn concurrency_stays_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let rx = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            analyze_async_with((1..=40).collect(), 4, move |pid| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                ProcessSummary { pid, ..Default::default() }
            })
        };

        let results: Vec<ProcessSummary> = rx.iter().collect();
        assert_eq!(results.len(), 40);
        assert!(peak.load(Ordering::SeqCst) <= 4, "peak = {}", peak.load(Ordering::SeqCst));
    }

    #[test]
    fn output_multiset_equals_input() {
        let rx = analyze_async_with(vec![5, 3, 9, 7], 2, |pid| ProcessSummary {
            pid,
            ..Default::default()
        });

        let got: HashSet<u32> = rx.iter().map(|s| s.pid).collect();
        assert_eq!(got, HashSet::from([3, 5, 7, 9]));
    }

    #[test]
    fn stream_closes_when_workers_finish() {
        let rx = analyze_async_with(Vec::new(), 3, |pid| ProcessSummary {
            pid,
            ..Default::default()
        });
        assert!(rx.iter().next().is_none());
    }

    #[test]
    fn per_pid_failures_do_not_stop_peers() {
        let rx = analyze_async_with(vec![1, 2, 3], 2, |pid| {
            if pid == 2 {
                ProcessSummary { pid, error: Some("no such process".to_string()), ..Default::default() }
            } else {
                ProcessSummary { pid, ..Default::default() }
            }
        });

        let results: Vec<ProcessSummary> = rx.iter().collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|s| s.error.is_some()).count(), 1);
    }

    #[test]
    fn zero_concurrency_still_makes_progress() {
        let rx = analyze_async_with(vec![1], 0, |pid| ProcessSummary { pid, ..Default::default() });
        assert_eq!(rx.iter().count(), 1);
    }

    #[test]
    fn source_simplification() {
        let s = |kind| simplify_source(&Source { kind, confidence: 0.9 });
        assert_eq!(s(SourceKind::Launchd { label: "com.x".into(), info: None }), "launchd");
        assert_eq!(s(SourceKind::Supervisor { name: "pm2".into() }), "pm2");
        assert_eq!(s(SourceKind::Ide { name: "npm".into() }), "npm");
        assert_eq!(s(SourceKind::Shell { shell: "zsh".into() }), "shell");
        assert_eq!(s(SourceKind::Unknown), "-");
    }
}
