//! Source classification: who or what launched a process.
//!
//! An ordered cascade of detectors runs over the ancestry chain
//! (init-first); the first verdict wins. Container evidence outranks
//! everything, init-system managers outrank supervisors' shells, and a
//! plain shell is the weakest positive signal.

pub mod launchd;

use std::fs;
use std::sync::LazyLock;

use crate::types::{Process, Source, SourceKind};

/// Fixed shell set; `/etc/shells` extends it where present.
const SHELLS: &[&str] = &["bash", "zsh", "sh", "fish", "csh", "tcsh", "ksh", "dash"];

/// Supervisor binaries mapped to their canonical names.
const SUPERVISORS: &[(&str, &str)] = &[
    ("pm2", "pm2"),
    ("supervisord", "supervisord"),
    ("gunicorn", "gunicorn"),
    ("uwsgi", "uwsgi"),
    ("runsv", "runit"),
    ("s6-supervise", "s6"),
    ("monit", "monit"),
    ("circusd", "circus"),
    ("tini", "tini"),
];

const CRON_NAMES: &[&str] = &["cron", "crond"];

static KNOWN_SHELLS: LazyLock<Vec<String>> = LazyLock::new(load_shells);

fn load_shells() -> Vec<String> {
    let mut shells: Vec<String> = SHELLS.iter().map(|s| s.to_string()).collect();
    if let Ok(content) = fs::read_to_string("/etc/shells") {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.rsplit('/').next() {
                if !shells.iter().any(|s| s == name) {
                    shells.push(name.to_string());
                }
            }
        }
    }
    shells
}

fn is_shell(command: &str) -> bool {
    let lower = command.to_lowercase();
    KNOWN_SHELLS.iter().any(|s| *s == lower)
}

/// Classify the launching source of the last process in `ancestry`.
pub fn detect(ancestry: &[Process]) -> Source {
    let detectors: &[fn(&[Process]) -> Option<Source>] = &[
        detect_container,
        detect_supervisor,
        detect_launchd,
        detect_systemd,
        detect_bsd_rc,
        detect_cron,
        detect_ide,
        detect_shell,
    ];

    for detector in detectors {
        if let Some(source) = detector(ancestry) {
            return source;
        }
    }
    Source::default()
}

fn detect_container(ancestry: &[Process]) -> Option<Source> {
    ancestry.iter().find(|p| !p.container.is_empty()).map(|p| Source {
        kind: SourceKind::Container { engine: p.container.clone() },
        confidence: 0.9,
    })
}

fn cmdline_basenames(cmdline: &str) -> impl Iterator<Item = String> + '_ {
    cmdline
        .split_whitespace()
        .map(|token| token.rsplit('/').next().unwrap_or(token).to_lowercase())
}

fn detect_supervisor(ancestry: &[Process]) -> Option<Source> {
    for p in ancestry {
        let command = p.command.to_lowercase();
        for (binary, canonical) in SUPERVISORS {
            if command == *binary || cmdline_basenames(&p.cmdline).any(|t| t == *binary) {
                return Some(Source {
                    kind: SourceKind::Supervisor { name: canonical.to_string() },
                    confidence: 0.9,
                });
            }
        }
    }
    None
}

fn detect_launchd(ancestry: &[Process]) -> Option<Source> {
    if !ancestry.iter().any(|p| p.command == "launchd") {
        return None;
    }

    let target = ancestry.last()?;
    let info = launchd::lookup(target.pid);
    let label = info.as_ref().map(|i| i.label.clone()).unwrap_or_default();

    Some(Source { kind: SourceKind::Launchd { label, info }, confidence: 0.9 })
}

fn detect_systemd(ancestry: &[Process]) -> Option<Source> {
    if !ancestry.iter().any(|p| p.command == "systemd") {
        return None;
    }

    // The probe stashes the cgroup-derived unit on the target's record.
    let unit = ancestry.last().map(|p| p.service.clone()).unwrap_or_default();
    Some(Source { kind: SourceKind::Systemd { unit }, confidence: 0.9 })
}

/// FreeBSD rc.d: the target hangs directly off init with no shell between.
#[cfg(target_os = "freebsd")]
fn detect_bsd_rc(ancestry: &[Process]) -> Option<Source> {
    let target = ancestry.last()?;
    if target.ppid != 1 {
        return None;
    }
    if ancestry.iter().any(|p| is_shell(&p.command)) {
        return None;
    }
    Some(Source { kind: SourceKind::BsdRc, confidence: 0.9 })
}

#[cfg(not(target_os = "freebsd"))]
fn detect_bsd_rc(_ancestry: &[Process]) -> Option<Source> {
    None
}

fn detect_cron(ancestry: &[Process]) -> Option<Source> {
    let hit = ancestry.iter().any(|p| CRON_NAMES.contains(&p.command.to_lowercase().as_str()));
    hit.then(|| Source { kind: SourceKind::Cron, confidence: 0.6 })
}

fn detect_ide(ancestry: &[Process]) -> Option<Source> {
    for p in ancestry {
        let command = p.command.to_lowercase();
        let name = match command.as_str() {
            "code" => Some("vscode"),
            "cursor" => Some("cursor"),
            "idea" | "webstorm" => Some("jetbrains"),
            "npm" => Some("npm"),
            "yarn" => Some("yarn"),
            "pnpm" => Some("pnpm"),
            _ if p.cmdline.contains("Visual Studio Code") => Some("vscode"),
            _ => None,
        };
        if let Some(name) = name {
            return Some(Source {
                kind: SourceKind::Ide { name: name.to_string() },
                confidence: 0.3,
            });
        }
    }
    None
}

fn detect_shell(ancestry: &[Process]) -> Option<Source> {
    ancestry.iter().find(|p| is_shell(&p.command)).map(|p| Source {
        kind: SourceKind::Shell { shell: p.command.to_lowercase() },
        confidence: 0.5,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
