//! JSON renderings: pretty-printed, two-space indent, stable key sets.

use serde::Serialize;

use crate::batch::ProcessSummary;
use crate::types::AnalysisReport;

/// Serialize a full report. Unknown fields come out as empty strings or
/// zeroes rather than being omitted.
pub fn render(report: &AnalysisReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    pid: u32,
    cpu: f64,
    memory_mb: u64,
    age: &'a str,
    source: &'a str,
    script: &'a str,
    workdir: &'a str,
    repo: &'a str,
    command: &'a str,
    cmdline: &'a str,
    user: &'a str,
    health: &'a str,
}

/// Serialize batch rows; failed analyses are skipped.
pub fn render_batch(rows: &[ProcessSummary]) -> String {
    let out: Vec<SummaryRow> = rows
        .iter()
        .filter(|r| r.error.is_none())
        .map(|r| SummaryRow {
            pid: r.pid,
            cpu: r.cpu_percent,
            memory_mb: r.memory_mb,
            age: &r.age,
            source: &r.source,
            script: &r.script,
            workdir: &r.workdir,
            repo: &r.git_repo,
            command: &r.command,
            cmdline: &r.cmdline,
            user: &r.user,
            health: &r.health,
        })
        .collect();

    serde_json::to_string_pretty(&out).unwrap_or_else(|_| "[]".to_string())
}

// ── Tests ───────────────────────────────────────────────────────────────────
