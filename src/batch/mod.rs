//! Batch analysis: discover every process matching a pattern, fan the full
//! analysis out across a bounded worker pool, and stream compact summaries
//! to whichever consumer is rendering (table, JSON, dashboard).

mod analyze;
mod discover;
mod npm;

pub use analyze::{analyze_async, analyze_process, DEFAULT_CONCURRENCY};
pub use discover::discover_pids;
pub use npm::detect_npm_script;

use chrono::{DateTime, Duration, Local};

/// Compact per-process projection for table display.
#[derive(Debug, Clone, Default)]
pub struct ProcessSummary {
    pub pid: u32,
    pub command: String,
    pub cmdline: String,
    pub user: String,
    pub cpu_percent: f64,
    pub memory_mb: u64,
    pub started_at: Option<DateTime<Local>>,
    /// Humanized age: "2h 15m", "5d", "<1m", or "-" when unknown.
    pub age: String,
    /// Simplified source name: "launchd", "npm", "shell", "-", ...
    pub source: String,
    /// npm script name or entry file, "-" when none.
    pub script: String,
    pub workdir: String,
    /// Repository directory name, "-" when none.
    pub git_repo: String,
    pub health: String,
    /// When set, every other field is undefined and consumers must skip.
    pub error: Option<String>,
}

/// Humanize a process age the way `ps` users expect.
pub fn format_age(started_at: Option<DateTime<Local>>) -> String {
    let Some(started) = started_at else {
        return "-".to_string();
    };

    let elapsed: Duration = Local::now() - started;
    let days = elapsed.num_days();
    let hours = elapsed.num_hours() % 24;
    let mins = elapsed.num_minutes() % 60;

    if days > 0 {
        format!("{days}d")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else if mins > 0 {
        format!("{mins}m")
    } else {
        "<1m".to_string()
    }
}

/// Replace a home-directory prefix with `~` for display.
pub fn shorten_path(path: &str) -> String {
    if path.is_empty() || path == "unknown" {
        return "-".to_string();
    }
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            if let Some(rest) = path.strip_prefix(&home) {
                return format!("~{rest}");
            }
        }
    }
    path.to_string()
}

/// Truncate a string for a fixed-width column.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len.saturating_sub(3)])
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_buckets() {
        assert_eq!(format_age(None), "-");
        assert_eq!(format_age(Some(Local::now() - Duration::seconds(30))), "<1m");
        assert_eq!(format_age(Some(Local::now() - Duration::minutes(5))), "5m");
        assert_eq!(
            format_age(Some(Local::now() - Duration::minutes(135))),
            "2h 15m"
        );
        assert_eq!(format_age(Some(Local::now() - Duration::days(5))), "5d");
    }

    #[test]
    fn truncate_bounds() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("exactly-ten", 11), "exactly-ten");
        assert_eq!(truncate("a-very-long-script-name", 10), "a-very-...");
    }

    #[test]
    fn shorten_path_empty_is_dash() {
        assert_eq!(shorten_path(""), "-");
        assert_eq!(shorten_path("unknown"), "-");
        assert_eq!(shorten_path("/opt/app"), "/opt/app");
    }
}
