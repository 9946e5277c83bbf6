//! One-shot human report for a single analyzed process.

use std::fmt::Write as _;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::batch::{format_age, shorten_path};
use crate::probe::{self, AddressClass};
use crate::types::{AnalysisReport, Process, SocketState};

/// Render the full report: identity, source, ancestry, ports, children,
/// contexts and warnings.
pub fn render(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let p = &report.process;

    let _ = writeln!(
        out,
        "{} {} ({})",
        "Process:".cyan().bold(),
        p.command.bold(),
        format!("pid {}", p.pid).yellow()
    );

    field(&mut out, "User", &p.user);
    if let Some(started) = p.started_at {
        field(
            &mut out,
            "Started",
            &format!(
                "{} ({} ago)",
                started.format("%Y-%m-%d %H:%M:%S"),
                format_age(p.started_at)
            ),
        );
    }
    field(&mut out, "State", &format!("{} ({})", p.state, p.health));
    if p.working_dir != "unknown" && !p.working_dir.is_empty() {
        field(&mut out, "Workdir", &shorten_path(&p.working_dir));
    }
    field(&mut out, "Command", &p.cmdline);
    if let Some(exe) = &p.exe {
        let marker = if p.exe_deleted { " (deleted)".red().to_string() } else { String::new() };
        field(&mut out, "Exe", &format!("{exe}{marker}"));
    }
    if !p.git_repo.is_empty() {
        let branch =
            if p.git_branch.is_empty() { String::new() } else { format!(" ({})", p.git_branch) };
        field(&mut out, "Git", &format!("{}{}", p.git_repo, branch.green()));
    }
    if !p.service.is_empty() {
        field(&mut out, "Service", &p.service);
    }
    if !p.container.is_empty() {
        field(&mut out, "Container", &p.container);
    }

    if let Some(files) = &p.file_context {
        let limit = if files.file_limit == 0 {
            "unlimited".to_string()
        } else {
            files.file_limit.to_string()
        };
        field(&mut out, "Files", &format!("{} open / {} limit", files.open_files, limit));
        if !files.locked_files.is_empty() {
            field(&mut out, "Locked", &files.locked_files.join(", "));
        }
    }
    if let Some(res) = &p.resource_context {
        if res.prevents_sleep {
            field(&mut out, "Power", "holds a sleep-prevention assertion");
        }
        if !res.thermal_state.is_empty() {
            field(&mut out, "Thermal", &res.thermal_state);
        }
    }

    // ── Source ──
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} {} {} {}",
        "Source:".cyan().bold(),
        report.source.type_name().green(),
        report.source.name().bold(),
        format!("(confidence {:.1})", report.source.confidence).dimmed()
    );
    for (key, value) in report.source.details() {
        field(&mut out, detail_label(key), &value);
    }

    // ── Ancestry ──
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "Ancestry:".cyan().bold());
    out.push_str(&render_tree(&report.ancestry));

    if !report.children.is_empty() {
        let names: Vec<String> = report
            .children
            .iter()
            .map(|c| format!("{} ({})", c.command, c.pid))
            .collect();
        let _ = writeln!(out);
        field(&mut out, "Children", &names.join(", "));
    }

    if !p.listening_ports.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", "Listening:".cyan().bold());
        out.push_str(&render_ports(p));
    }

    let _ = writeln!(out);
    out.push_str(&render_warnings(&report.warnings));

    out
}

fn field(out: &mut String, label: &str, value: &str) {
    let _ = writeln!(out, "  {:<10} {}", format!("{label}:").dimmed(), value);
}

/// Display labels for source detail keys.
fn detail_label(key: &str) -> &'static str {
    match key {
        "type" => "Type",
        "plist" => "Plist",
        "triggers" => "Trigger",
        "keepalive" => "KeepAlive",
        "unit" => "Unit",
        "engine" => "Engine",
        _ => "Detail",
    }
}

/// Indented ancestry tree, init at the root.
pub fn render_tree(chain: &[Process]) -> String {
    let mut out = String::new();
    for (i, p) in chain.iter().enumerate() {
        let mut prefix = "  ".repeat(i + 1);
        if i > 0 {
            prefix.push_str(&"└─ ".magenta().to_string());
        }
        let _ = writeln!(out, "{}{} ({})", prefix, p.command, format!("pid {}", p.pid).dimmed());
    }
    out
}

/// One-line chain: `init (pid 1) → bash (pid 100) → node (pid 500)`.
pub fn render_short(report: &AnalysisReport) -> String {
    let parts: Vec<String> = report
        .ancestry
        .iter()
        .map(|p| format!("{} ({})", p.command, format!("pid {}", p.pid).dimmed()))
        .collect();
    format!("{}\n", parts.join(&" → ".magenta().to_string()))
}

/// Command line plus captured environment, nothing else.
pub fn render_env(process: &Process) -> String {
    let mut out = String::new();
    field(&mut out, "Command", &process.cmdline);
    if process.env.is_empty() {
        let _ = writeln!(out, "  No environment variables found.");
    } else {
        for entry in &process.env {
            let _ = writeln!(out, "  {entry}");
        }
    }
    out
}

pub fn render_warnings(warnings: &[String]) -> String {
    let mut out = String::new();
    if warnings.is_empty() {
        let _ = writeln!(out, "{}", "No warnings.".green());
        return out;
    }
    let _ = writeln!(out, "{}", "Warnings:".yellow().bold());
    for warning in warnings {
        let _ = writeln!(out, "  {} {}", "!".red().bold(), warning);
    }
    out
}

fn render_ports(p: &Process) -> String {
    let mut table = Table::new();
    table.set_header(vec!["PORT", "ADDRESS", "SCOPE"]);

    for (port, addr) in p.listening_ports.iter().zip(&p.bind_addresses) {
        table.add_row(vec![
            Cell::new(port),
            Cell::new(addr),
            Cell::new(scope_label(addr)),
        ]);
    }

    let mut out = table.to_string();
    out.push('\n');

    // Surface non-listening states observed on the same ports.
    for port in &p.listening_ports {
        if let Some(state) = probe::net::socket_state_for_port(*port) {
            if state.state != SocketState::Listen {
                let _ = writeln!(
                    out,
                    "  {} port {} also has a {} socket: {}",
                    "note:".yellow(),
                    port,
                    state.state,
                    state.explanation
                );
                if state.state == SocketState::TimeWait {
                    let _ = writeln!(
                        out,
                        "        {}",
                        probe::net::time_wait_remaining().dimmed()
                    );
                }
                if !state.workaround.is_empty() {
                    let _ = writeln!(out, "        {}", state.workaround.dimmed());
                }
            }
        }
    }

    out
}

fn scope_label(addr: &str) -> &'static str {
    match probe::classify_address(addr) {
        AddressClass::Public => "public",
        AddressClass::Lan => "lan",
        AddressClass::Loopback => "loopback",
        AddressClass::External => "external",
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec;
    use crate::exec::mock::MockExecutor;
    use crate::types::{Source, SourceKind};

    fn sample_report() -> AnalysisReport {
        let target = Process {
            pid: 500,
            ppid: 100,
            command: "node".to_string(),
            cmdline: "node server.js".to_string(),
            user: "bob".to_string(),
            working_dir: "/srv/app".to_string(),
            ..Process::default()
        };
        AnalysisReport {
            process: target.clone(),
            ancestry: vec![
                Process { pid: 1, command: "init".to_string(), ..Process::default() },
                Process { pid: 100, ppid: 1, command: "bash".to_string(), ..Process::default() },
                target,
            ],
            source: Source { kind: SourceKind::Shell { shell: "bash".to_string() }, confidence: 0.5 },
            ..Default::default()
        }
    }

    #[test]
    fn short_rendering_is_one_arrow_line() {
        colored::control::set_override(false);
        let got = render_short(&sample_report());
        assert_eq!(got.trim(), "init (pid 1) → bash (pid 100) → node (pid 500)");
        colored::control::unset_override();
    }

    #[test]
    fn tree_indents_by_depth() {
        colored::control::set_override(false);
        let got = render_tree(&sample_report().ancestry);
        let lines: Vec<&str> = got.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("init"));
        assert!(lines[1].contains("└─ bash"));
        assert!(lines[2].contains("└─ node"));
        assert!(lines[2].starts_with("      "), "deeper entries indent further");
        colored::control::unset_override();
    }

    #[test]
    fn env_rendering_handles_empty() {
        colored::control::set_override(false);
        let mut p = Process { cmdline: "test --flag".to_string(), ..Process::default() };
        assert!(render_env(&p).contains("No environment variables found."));

        p.env = vec!["VAR=val".to_string(), "PATH=/bin".to_string()];
        let got = render_env(&p);
        assert!(got.contains("VAR=val"));
        assert!(got.contains("PATH=/bin"));
        colored::control::unset_override();
    }

    #[test]
    fn warnings_rendering() {
        colored::control::set_override(false);
        assert!(render_warnings(&[]).contains("No warnings."));
        let got = render_warnings(&["Running as root".to_string()]);
        assert!(got.contains("Warnings:"));
        assert!(got.contains("Running as root"));
        colored::control::unset_override();
    }

    #[test]
    fn full_report_mentions_key_sections() {
        colored::control::set_override(false);
        let _guard = exec::test_lock();
        MockExecutor::new().install();

        let mut report = sample_report();
        report.process.listening_ports = vec![8080];
        report.process.bind_addresses = vec!["0.0.0.0".to_string()];
        report.warnings = vec!["Listening on public interface".to_string()];

        let got = render(&report);
        assert!(got.contains("Process:"));
        assert!(got.contains("Source:"));
        assert!(got.contains("Ancestry:"));
        assert!(got.contains("Listening:"));
        assert!(got.contains("8080"));
        assert!(got.contains("public"));
        assert!(got.contains("Listening on public interface"));

        exec::reset_executor();
        colored::control::unset_override();
    }

    #[test]
    fn launchd_details_use_friendly_labels() {
        colored::control::set_override(false);
        let mut report = sample_report();
        report.source = Source {
            kind: SourceKind::Launchd {
                label: "com.test.service".to_string(),
                info: Some(crate::types::LaunchdInfo {
                    label: "com.test.service".to_string(),
                    domain: "system".to_string(),
                    run_at_load: true,
                    ..Default::default()
                }),
            },
            confidence: 0.9,
        };

        let got = render(&report);
        assert!(got.contains("Type:"));
        assert!(got.contains("Launch Daemon"));
        assert!(got.contains("Trigger:"));
        colored::control::unset_override();
    }
}
