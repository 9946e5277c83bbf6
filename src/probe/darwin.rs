//! Darwin probe: facts gathered through `ps`, `lsof`, `launchctl`,
//! `netstat` and `pmset`, all via the process-wide executor.
//!
//! Helper calls run in a fixed order per PID so tests can script them
//! deterministically. A failed identity read means the process is gone;
//! every other failure degrades that one fact.

use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use log::debug;

use crate::error::ProbeError;
use crate::exec;
use crate::git;
use crate::probe;
use crate::probe::net;
use crate::types::{FileContext, ProcState, Process, ResourceContext, Socket};

const LSTART_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

fn parse_lstart(fields: &[&str]) -> Option<DateTime<Local>> {
    if fields.len() < 5 {
        return None;
    }
    let joined = fields[..5].join(" ");
    let naive = NaiveDateTime::parse_from_str(&joined, LSTART_FORMAT).ok()?;
    Local.from_local_datetime(&naive).single()
}

fn resolve_uid(uid: u32) -> String {
    if uid == 0 {
        return "root".to_string();
    }
    let passwd = std::fs::read_to_string("/etc/passwd").unwrap_or_default();
    let uid_str = uid.to_string();
    for line in passwd.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() > 2 && fields[2] == uid_str {
            return fields[0].to_string();
        }
    }
    uid_str
}

fn get_cmdline(pid: u32) -> String {
    match exec::run_text("ps", &["-p", &pid.to_string(), "-o", "args="]) {
        Ok(out) => {
            let trimmed = out.trim().to_string();
            if trimmed.is_empty() {
                "(unknown)".to_string()
            } else {
                trimmed
            }
        }
        Err(_) => "(unknown)".to_string(),
    }
}

fn get_environment(pid: u32, cmdline: &str) -> Vec<String> {
    let Ok(out) = exec::run_text("ps", &["-p", &pid.to_string(), "-E", "-o", "command="]) else {
        return Vec::new();
    };
    let trimmed = out.trim();
    let rest = trimmed.strip_prefix(cmdline).unwrap_or(trimmed);
    rest.split_whitespace()
        .filter(|token| probe::is_env_assignment(token))
        .map(|token| token.to_string())
        .collect()
}

fn get_working_directory(pid: u32) -> String {
    let Ok(out) =
        exec::run_text("lsof", &["-a", "-p", &pid.to_string(), "-d", "cwd", "-F", "n"])
    else {
        return "unknown".to_string();
    };
    for line in out.lines() {
        if let Some(path) = line.strip_prefix('n') {
            if !path.is_empty() {
                return path.to_string();
            }
        }
    }
    "unknown".to_string()
}

fn parse_lsof_listeners(output: &str) -> Vec<(u32, Socket)> {
    let mut sockets = Vec::new();
    let mut current_pid = 0u32;
    for line in output.lines() {
        if let Some(pid) = line.strip_prefix('p') {
            current_pid = pid.trim().parse().unwrap_or(0);
        } else if let Some(name) = line.strip_prefix('n') {
            if current_pid == 0 {
                continue;
            }
            let (address, port) = net::parse_netstat_addr(name.trim());
            if port == 0 && address.is_empty() {
                continue;
            }
            sockets.push((
                current_pid,
                Socket {
                    inode: format!("{current_pid}:{port}"),
                    port,
                    address,
                },
            ));
        }
    }
    sockets
}

pub fn listening_sockets() -> Vec<(u32, Socket)> {
    match exec::run_text("lsof", &["-i", "TCP", "-s", "TCP:LISTEN", "-n", "-P", "-F", "pn"]) {
        Ok(out) => parse_lsof_listeners(&out),
        Err(err) => {
            debug!("lsof listener scan failed ({err}); falling back to netstat");
            netstat_listeners_with_pids().unwrap_or_default()
        }
    }
}

/// `netstat -anv` carries the owning PID in column 9 on Darwin.
fn netstat_listeners_with_pids() -> Option<Vec<(u32, Socket)>> {
    let out = exec::run_text("netstat", &["-anv", "-p", "tcp"]).ok()?;
    let mut sockets = Vec::new();
    for line in out.lines() {
        if !line.contains("LISTEN") {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 || !fields[0].starts_with("tcp") {
            continue;
        }
        let (address, port) = net::parse_netstat_addr(fields[3]);
        if address.is_empty() && port == 0 {
            continue;
        }
        let Ok(pid) = fields[8].parse::<u32>() else {
            continue;
        };
        sockets.push((pid, Socket { inode: format!("{pid}:{port}"), port, address }));
    }
    Some(sockets)
}

/// PIDs listening on `port`, sorted ascending.
pub fn pids_on_port(port: u16) -> Vec<u32> {
    let direct = exec::run_text(
        "lsof",
        &["-i", &format!("TCP:{port}"), "-s", "TCP:LISTEN", "-n", "-P", "-t"],
    );
    let mut pids: Vec<u32> = match direct {
        Ok(out) => out.lines().filter_map(|l| l.trim().parse().ok()).collect(),
        Err(err) => {
            debug!("lsof port lookup failed ({err}); falling back to netstat");
            netstat_listeners_with_pids()
                .unwrap_or_default()
                .into_iter()
                .filter(|(_, s)| s.port == port)
                .map(|(pid, _)| pid)
                .collect()
        }
    };
    pids.sort_unstable();
    pids.dedup();
    pids
}

fn detect_exe(pid: u32) -> (Option<String>, bool) {
    let Ok(out) =
        exec::run_text("lsof", &["-a", "-p", &pid.to_string(), "-d", "txt", "-F", "n"])
    else {
        return (None, false);
    };
    for line in out.lines() {
        if let Some(path) = line.strip_prefix('n') {
            if !path.is_empty() {
                let deleted = !Path::new(path).exists();
                return (Some(path.to_string()), deleted);
            }
        }
    }
    (None, false)
}

fn cpu_and_rss(pid: u32) -> (f64, u64) {
    let Ok(out) = exec::run_text("ps", &["-p", &pid.to_string(), "-o", "pcpu=,rss="]) else {
        return (0.0, 0);
    };
    let fields: Vec<&str> = out.split_whitespace().collect();
    if fields.len() < 2 {
        return (0.0, 0);
    }
    let cpu = fields[0].parse().unwrap_or(0.0);
    let rss_kb: u64 = fields[1].parse().unwrap_or(0);
    (cpu, rss_kb * 1024)
}

pub fn read_process(pid: u32) -> Result<Process, ProbeError> {
    let identity = exec::run_text(
        "ps",
        &["-p", &pid.to_string(), "-o", "pid=,ppid=,uid=,lstart=,state=,ucomm="],
    )
    .map_err(|_| ProbeError::NotFound(pid))?;

    let line = identity.lines().next().unwrap_or("").trim();
    let fields: Vec<&str> = line.split_whitespace().collect();
    // pid ppid uid + 5 lstart fields + state + ucomm
    if fields.len() < 10 {
        return Err(ProbeError::NotFound(pid));
    }

    let ppid: u32 = fields[1].parse().map_err(|_| ProbeError::NotFound(pid))?;
    let uid: u32 = fields[2].parse().unwrap_or(u32::MAX);
    let started_at = parse_lstart(&fields[3..8]);
    let state_char = fields[8].chars().next().unwrap_or('?');
    let comm = fields[9..].join(" ");

    let cmdline = get_cmdline(pid);

    let mut p = Process {
        pid,
        ppid,
        command: probe::derive_display_command(&comm, &cmdline),
        user: if uid == u32::MAX { "unknown".to_string() } else { resolve_uid(uid) },
        started_at,
        state: ProcState::from_code(state_char),
        ..Process::default()
    };
    p.cmdline = cmdline;

    p.env = get_environment(pid, &p.cmdline);
    p.working_dir = get_working_directory(pid);

    for (owner, socket) in listening_sockets() {
        if owner == pid {
            p.add_listener(socket.port, socket.address);
        }
    }

    if let Some((_, label)) = crate::source::launchd::service_label(pid) {
        p.service = label;
    }

    let (cpu, rss) = cpu_and_rss(pid);
    p.cpu_percent = cpu;
    p.memory_rss_bytes = rss;
    if rss > 0 {
        if let Some(total) = total_memory_bytes() {
            p.memory_percent = rss as f64 / total as f64 * 100.0;
        }
    }

    let (exe, deleted) = detect_exe(pid);
    p.exe = exe;
    p.exe_deleted = deleted;

    if p.working_dir != "unknown" {
        if let Some(ctx) = git::detect(&p.working_dir) {
            p.git_repo = ctx.repo;
            p.git_branch = ctx.branch;
        }
    }

    p.health = probe::classify_health(p.state, p.cpu_percent, p.memory_rss_bytes);

    Ok(p)
}

/// Identity-only snapshot from a single `ps` sweep.
pub fn list_processes() -> Result<Vec<Process>, ProbeError> {
    let out = exec::run_text("ps", &["-axo", "pid=,ppid=,comm="])
        .map_err(|e| ProbeError::Enumeration(format!("ps unavailable: {e}")))?;

    let mut processes = Vec::new();
    for line in out.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut tokens = trimmed.split_whitespace();
        let (Some(pid), Some(ppid)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        let (Ok(pid), Ok(ppid)) = (pid.parse::<u32>(), ppid.parse::<u32>()) else {
            continue;
        };
        let comm: String = tokens.collect::<Vec<&str>>().join(" ");
        if comm.is_empty() {
            continue;
        }
        let name = comm.rsplit('/').next().unwrap_or(&comm).to_string();
        processes.push(Process { pid, ppid, command: name, ..Process::default() });
    }
    Ok(processes)
}

const DARWIN_DEFAULT_FILE_LIMIT: u64 = 256;

fn parse_maxfiles(out: &str) -> u64 {
    // "maxfiles    <soft>    <hard>"
    let fields: Vec<&str> = out.split_whitespace().collect();
    match fields.get(1) {
        Some(&"unlimited") => 0,
        Some(soft) => soft.parse().unwrap_or(DARWIN_DEFAULT_FILE_LIMIT),
        None => DARWIN_DEFAULT_FILE_LIMIT,
    }
}

struct FdStream {
    open_files: usize,
    locked_files: Vec<String>,
    watched_dirs: Vec<String>,
}

/// Walk an `lsof -F ftln` stream: per descriptor, `f` opens the record and
/// `t`/`l`/`n` describe it.
fn parse_fd_stream(output: &str) -> FdStream {
    let mut open_files = 0;
    let mut locked_files = Vec::new();
    let mut watched_dirs = Vec::new();

    let mut is_dir = false;
    let mut lock_char = ' ';

    for line in output.lines() {
        match line.chars().next() {
            Some('f') => {
                open_files += 1;
                is_dir = false;
                lock_char = ' ';
            }
            Some('t') => is_dir = line[1..].trim() == "DIR",
            Some('l') => lock_char = line[1..].chars().next().unwrap_or(' '),
            Some('n') => {
                let path = line[1..].to_string();
                if path.is_empty() {
                    continue;
                }
                if matches!(lock_char, 'r' | 'R' | 'w' | 'W' | 'u' | 'U') {
                    locked_files.push(path.clone());
                }
                if is_dir && !watched_dirs.contains(&path) {
                    watched_dirs.push(path);
                }
            }
            _ => {}
        }
    }

    FdStream { open_files, locked_files, watched_dirs }
}

pub fn file_context(pid: u32) -> Option<FileContext> {
    let out = exec::run_text("lsof", &["-p", &pid.to_string(), "-F", "ftln"]).ok()?;
    let stream = parse_fd_stream(&out);

    let file_limit = match exec::run_text("launchctl", &["limit", "maxfiles"]) {
        Ok(out) => parse_maxfiles(&out),
        Err(_) => DARWIN_DEFAULT_FILE_LIMIT,
    };

    Some(FileContext {
        open_files: stream.open_files,
        file_limit,
        locked_files: stream.locked_files,
        watched_dirs: stream.watched_dirs,
    })
}

fn prevents_sleep(pid: u32) -> bool {
    let Ok(out) = exec::run_text("pmset", &["-g", "assertions"]) else {
        return false;
    };
    let marker = format!("pid {pid}(");
    out.lines()
        .any(|line| line.contains(&marker) && line.contains("Prevent") && line.contains("Sleep"))
}

fn thermal_state() -> String {
    let Ok(out) = exec::run_text("pmset", &["-g", "therm"]) else {
        return String::new();
    };

    for line in out.lines() {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix("CPU_Speed_Limit") {
            let Some(limit) = value.trim_start_matches([' ', '=']).trim().parse::<u32>().ok()
            else {
                continue;
            };
            return match limit {
                0..=50 => "Heavy throttling".to_string(),
                51..=70 => "Moderate throttling".to_string(),
                71..=99 => "Light throttling".to_string(),
                _ => String::new(),
            };
        }
        if let Some(value) = trimmed.strip_prefix("Thermal_Level") {
            if let Ok(level) = value.trim_start_matches([' ', '=']).trim().parse::<u32>() {
                if level >= 1 {
                    return "Moderate thermal pressure".to_string();
                }
            }
        }
    }
    String::new()
}

pub fn resource_context(pid: u32) -> Option<ResourceContext> {
    let sleeps = prevents_sleep(pid);
    let thermal = thermal_state();

    let (cpu, mem) = match exec::run_text("ps", &["-p", &pid.to_string(), "-o", "%cpu=,rss="]) {
        Ok(out) => {
            let fields: Vec<&str> = out.split_whitespace().collect();
            let cpu = fields.first().and_then(|f| f.parse().ok()).unwrap_or(0.0);
            let rss_kb: u64 = fields.get(1).and_then(|f| f.parse().ok()).unwrap_or(0);
            (cpu, rss_kb * 1024)
        }
        Err(_) => (0.0, 0),
    };

    Some(ResourceContext {
        prevents_sleep: sleeps,
        thermal_state: thermal,
        cpu_percent: cpu,
        memory_bytes: mem,
    })
}

fn total_memory_bytes() -> Option<u64> {
    let out = exec::run_text("sysctl", &["-n", "hw.memsize"]).ok()?;
    out.trim().parse().ok()
}

pub fn boot_time() -> Option<DateTime<Local>> {
    let out = exec::run_text("sysctl", &["-n", "kern.boottime"]).ok()?;
    // "{ sec = 1700000000, usec = 0 } Mon Nov 13 ..."
    let sec_idx = out.find("sec =")?;
    let rest = &out[sec_idx + 5..];
    let end = rest.find(',')?;
    let secs: i64 = rest[..end].trim().parse().ok()?;
    Local.timestamp_opt(secs, 0).single()
}

// ── Tests ───────────────────────────────────────────────────────────────────
