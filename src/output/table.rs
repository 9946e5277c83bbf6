//! Streaming `ps`-style table for batch results.
//!
//! Without a sort key, rows print as they arrive (header first). A sort
//! key or JSON output buffers everything, sorts once, then emits.

use std::time::Duration;

use colored::Colorize;

use crate::batch::{shorten_path, truncate, ProcessSummary};
use crate::cli::SortKey;

const SCRIPT_WIDTH: usize = 20;
const WORKDIR_WIDTH: usize = 25;

pub struct TableRenderer {
    sort: Option<SortKey>,
    rows: Vec<ProcessSummary>,
    printed_header: bool,
}

impl TableRenderer {
    /// `sort = None` streams; any sort key buffers until [`flush`].
    pub fn new(sort: Option<SortKey>) -> Self {
        TableRenderer { sort, rows: Vec::new(), printed_header: false }
    }

    pub fn print_header(&mut self) {
        let header = format!(
            " {:>7}  {:>5}  {:>6}  {:<8}  {:<12}  {:<20}  {:<25}  {}",
            "PID", "CPU", "MEM", "AGE", "SOURCE", "SCRIPT", "WORKDIR", "REPO"
        );
        println!("{}", header.blue());
        self.printed_header = true;
    }

    /// Buffer (sorting mode) or print (streaming mode) one row. Failed
    /// analyses are counted by the caller and skipped here.
    pub fn add_row(&mut self, summary: ProcessSummary) {
        if summary.error.is_some() {
            return;
        }
        if self.sort.is_some() {
            self.rows.push(summary);
        } else {
            if !self.printed_header {
                self.print_header();
            }
            print_row(&summary);
        }
    }

    /// Sort and print all buffered rows. No-op in streaming mode.
    pub fn flush(&mut self) {
        let Some(sort) = self.sort else {
            return;
        };
        sort_rows(&mut self.rows, sort);
        if !self.printed_header {
            self.print_header();
        }
        for row in &self.rows {
            print_row(row);
        }
    }

    /// Buffered rows, for JSON emission.
    pub fn rows(&self) -> &[ProcessSummary] {
        &self.rows
    }

    pub fn print_footer(&self, total: usize, errors: usize, elapsed: Duration) {
        println!();
        let mut line = format!("Found {total} processes").green().to_string();
        if errors > 0 {
            line.push_str(&format!(" ({})", format!("{errors} errors").yellow()));
        }
        println!("{} ({:.1}s)", line, elapsed.as_secs_f64());
    }
}

/// Stable sort: cpu and mem descending, age oldest-first, pid ascending.
pub fn sort_rows(rows: &mut [ProcessSummary], sort: SortKey) {
    match sort {
        SortKey::Cpu => rows.sort_by(|a, b| {
            b.cpu_percent.partial_cmp(&a.cpu_percent).unwrap_or(std::cmp::Ordering::Equal)
        }),
        SortKey::Mem => rows.sort_by(|a, b| b.memory_mb.cmp(&a.memory_mb)),
        SortKey::Age => rows.sort_by(|a, b| match (a.started_at, b.started_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }),
        SortKey::Pid => rows.sort_by_key(|r| r.pid),
    }
}

fn print_row(row: &ProcessSummary) {
    let cpu = colorize_cpu(row.cpu_percent);
    let mem = colorize_mem(row.memory_mb);
    let workdir = truncate_workdir(&shorten_path(row.workdir.trim()));
    let script = truncate(&row.script, SCRIPT_WIDTH);

    println!(
        " {:>7}  {:>5}  {:>6}  {:<8}  {:<12}  {:<20}  {:<25}  {}",
        row.pid, cpu, mem, row.age, row.source, script, workdir, row.git_repo
    );
}

fn colorize_cpu(cpu: f64) -> String {
    let text = format!("{cpu:.0}%");
    if cpu > 50.0 {
        text.red().to_string()
    } else if cpu > 20.0 {
        text.yellow().to_string()
    } else {
        text
    }
}

fn colorize_mem(mb: u64) -> String {
    let text = format_memory(mb);
    if mb > 1024 {
        text.red().to_string()
    } else if mb > 512 {
        text.yellow().to_string()
    } else {
        text
    }
}

fn format_memory(mb: u64) -> String {
    if mb >= 1024 {
        format!("{:.1}G", mb as f64 / 1024.0)
    } else {
        format!("{mb}M")
    }
}

fn truncate_workdir(workdir: &str) -> String {
    if workdir.len() > WORKDIR_WIDTH {
        format!("...{}", &workdir[workdir.len() - (WORKDIR_WIDTH - 3)..])
    } else {
        workdir.to_string()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Local};

    fn row(pid: u32, cpu: f64, mem: u64, age_mins: i64) -> ProcessSummary {
        ProcessSummary {
            pid,
            cpu_percent: cpu,
            memory_mb: mem,
            started_at: Some(Local::now() - ChronoDuration::minutes(age_mins)),
            ..Default::default()
        }
    }

    #[test]
    fn cpu_sort_is_descending() {
        let mut rows = vec![row(1, 5.0, 0, 0), row(2, 80.0, 0, 0), row(3, 20.0, 0, 0)];
        sort_rows(&mut rows, SortKey::Cpu);
        let pids: Vec<u32> = rows.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![2, 3, 1]);
    }

    #[test]
    fn mem_sort_is_descending() {
        let mut rows = vec![row(1, 0.0, 100, 0), row(2, 0.0, 900, 0)];
        sort_rows(&mut rows, SortKey::Mem);
        assert_eq!(rows[0].pid, 2);
    }

    #[test]
    fn age_sort_is_oldest_first() {
        let mut rows = vec![row(1, 0.0, 0, 5), row(2, 0.0, 0, 500), row(3, 0.0, 0, 50)];
        sort_rows(&mut rows, SortKey::Age);
        let pids: Vec<u32> = rows.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![2, 3, 1]);
    }

    #[test]
    fn unknown_age_sorts_last() {
        let mut rows = vec![ProcessSummary { pid: 1, ..Default::default() }, row(2, 0.0, 0, 5)];
        sort_rows(&mut rows, SortKey::Age);
        assert_eq!(rows[0].pid, 2);
    }

    #[test]
    fn pid_sort_is_total() {
        let mut rows = vec![row(9, 0.0, 0, 0), row(3, 0.0, 0, 0), row(7, 0.0, 0, 0)];
        sort_rows(&mut rows, SortKey::Pid);
        let pids: Vec<u32> = rows.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![3, 7, 9]);
    }

    #[test]
    fn equal_keys_keep_arrival_order() {
        let mut rows = vec![row(5, 10.0, 0, 0), row(1, 10.0, 0, 0), row(9, 10.0, 0, 0)];
        sort_rows(&mut rows, SortKey::Cpu);
        let pids: Vec<u32> = rows.iter().map(|r| r.pid).collect();
        assert_eq!(pids, vec![5, 1, 9], "stable sort preserves ties");
    }

    #[test]
    fn memory_formatting() {
        assert_eq!(format_memory(100), "100M");
        assert_eq!(format_memory(1024), "1.0G");
        assert_eq!(format_memory(2560), "2.5G");
    }

    #[test]
    fn long_workdirs_keep_the_tail() {
        let long = "/home/user/projects/some/deeply/nested/dir";
        let got = truncate_workdir(long);
        assert!(got.starts_with("..."));
        assert_eq!(got.len(), WORKDIR_WIDTH);
        assert!(got.ends_with("nested/dir"));
    }

    #[test]
    fn error_rows_are_dropped() {
        let mut t = TableRenderer::new(Some(SortKey::Pid));
        t.add_row(ProcessSummary { pid: 1, error: Some("gone".to_string()), ..Default::default() });
        t.add_row(row(2, 0.0, 0, 0));
        assert_eq!(t.rows().len(), 1);
    }
}
