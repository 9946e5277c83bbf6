//! Linux probe: native `/proc` readers.
//!
//! Identity comes from `/proc/<pid>/stat` (comm is parenthesized and may
//! contain spaces, so the parse anchors on the last `)`), sockets from the
//! hex tables in `/proc/net/tcp{,6}`, container membership from the cgroup
//! path, and users from `/etc/passwd`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Local, TimeZone};
use log::debug;

use crate::error::ProbeError;
use crate::exec;
use crate::git;
use crate::probe;
use crate::types::{FileContext, ProcState, Process, ResourceContext, Socket};

/// Container engine tokens probed in the cgroup path, in match order.
const CONTAINER_TOKENS: &[&str] =
    &["docker", "podman", "containerd", "libpod", "kubepods", "colima"];

struct StatFields {
    comm: String,
    state: char,
    ppid: u32,
    utime: u64,
    stime: u64,
    starttime: u64,
}

/// Parse `/proc/<pid>/stat`: `pid (comm) state ppid ...`.
///
/// comm can contain spaces and parentheses; anchor on the LAST `)`.
fn parse_stat(content: &str) -> Option<StatFields> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let comm = content[open + 1..close].to_string();

    let rest = content.get(close + 2..)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // rest[0]=state, [1]=ppid, [11]=utime, [12]=stime, [19]=starttime
    if fields.len() < 20 {
        return None;
    }

    Some(StatFields {
        comm,
        state: fields[0].chars().next()?,
        ppid: fields[1].parse().ok()?,
        utime: fields[11].parse().ok()?,
        stime: fields[12].parse().ok()?,
        starttime: fields[19].parse().ok()?,
    })
}

fn clock_ticks_per_sec() -> u64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

fn proc_path(pid: u32, leaf: &str) -> String {
    format!("/proc/{pid}/{leaf}")
}

fn read_uid(pid: u32) -> Option<u32> {
    let status = fs::read_to_string(proc_path(pid, "status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            return rest.split_whitespace().next()?.parse().ok();
        }
    }
    None
}

fn resolve_user(uid: u32, passwd: &str) -> String {
    if uid == 0 {
        return "root".to_string();
    }
    let uid_str = uid.to_string();
    for line in passwd.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() > 2 && fields[2] == uid_str {
            return fields[0].to_string();
        }
    }
    uid_str
}

fn read_user(pid: u32) -> String {
    let Some(uid) = read_uid(pid) else {
        return "unknown".to_string();
    };
    let passwd = fs::read_to_string("/etc/passwd").unwrap_or_default();
    resolve_user(uid, &passwd)
}

fn read_cmdline(pid: u32) -> String {
    let raw = fs::read(proc_path(pid, "cmdline")).unwrap_or_default();
    let joined = raw
        .split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        "(unknown)".to_string()
    } else {
        joined
    }
}

fn read_environ(pid: u32) -> Vec<String> {
    let raw = fs::read(proc_path(pid, "environ")).unwrap_or_default();
    raw.split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .filter(|token| probe::is_env_assignment(token))
        .collect()
}

fn container_from_cgroup(content: &str) -> String {
    for token in CONTAINER_TOKENS {
        if content.contains(token) {
            return token.to_string();
        }
    }
    String::new()
}

fn systemd_unit_from_cgroup(content: &str) -> String {
    for line in content.lines() {
        if let Some(path) = line.rsplit(':').next() {
            if let Some(unit) = path.rsplit('/').next() {
                if unit.ends_with(".service") {
                    return unit.to_string();
                }
            }
        }
    }
    String::new()
}

/// Parse one `ADDR:PORT` column of `/proc/net/tcp{,6}`.
///
/// IPv4 addresses are four little-endian bytes; IPv6 addresses are four
/// 4-byte little-endian groups, each reversed within the group. Truncated
/// input yields `("", 0)`.
pub fn parse_addr(raw: &str, ipv6: bool) -> (String, u16) {
    let Some((addr_hex, port_hex)) = raw.split_once(':') else {
        return (String::new(), 0);
    };
    let Ok(port) = u16::from_str_radix(port_hex, 16) else {
        return (String::new(), 0);
    };

    let mut bytes = Vec::with_capacity(addr_hex.len() / 2);
    let mut chars = addr_hex.as_bytes().chunks_exact(2);
    for pair in &mut chars {
        let Ok(b) = u8::from_str_radix(std::str::from_utf8(pair).unwrap_or("zz"), 16) else {
            return (String::new(), 0);
        };
        bytes.push(b);
    }

    if ipv6 {
        if bytes.len() != 16 {
            return (String::new(), 0);
        }
        let mut octets = [0u8; 16];
        for group in 0..4 {
            for i in 0..4 {
                octets[group * 4 + i] = bytes[group * 4 + 3 - i];
            }
        }
        (std::net::Ipv6Addr::from(octets).to_string(), port)
    } else {
        if bytes.len() != 4 {
            return (String::new(), 0);
        }
        (format!("{}.{}.{}.{}", bytes[3], bytes[2], bytes[1], bytes[0]), port)
    }
}

/// Listening sockets (state `0A`) from one `/proc/net/tcp{,6}` table.
fn parse_proc_net(content: &str, ipv6: bool) -> Vec<Socket> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != "0A" {
                return None;
            }
            let (address, port) = parse_addr(fields[1], ipv6);
            if address.is_empty() {
                return None;
            }
            Some(Socket { inode: fields[9].to_string(), port, address })
        })
        .collect()
}

fn listening_socket_table() -> Vec<Socket> {
    let mut sockets = Vec::new();
    if let Ok(content) = fs::read_to_string("/proc/net/tcp") {
        sockets.extend(parse_proc_net(&content, false));
    }
    if let Ok(content) = fs::read_to_string("/proc/net/tcp6") {
        sockets.extend(parse_proc_net(&content, true));
    }
    sockets
}

fn socket_inodes_of(pid: u32) -> HashSet<String> {
    let mut inodes = HashSet::new();
    let Ok(entries) = fs::read_dir(proc_path(pid, "fd")) else {
        return inodes;
    };
    for entry in entries.flatten() {
        if let Ok(target) = fs::read_link(entry.path()) {
            let s = target.to_string_lossy();
            if let Some(inode) = s.strip_prefix("socket:[").and_then(|s| s.strip_suffix(']')) {
                inodes.insert(inode.to_string());
            }
        }
    }
    inodes
}

fn read_memory(pid: u32) -> (u64, f64) {
    let status = fs::read_to_string(proc_path(pid, "status")).unwrap_or_default();
    let mut rss_bytes = 0u64;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            if let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) {
                rss_bytes = kb * 1024;
            }
        }
    }

    let meminfo = fs::read_to_string("/proc/meminfo").unwrap_or_default();
    let total_bytes = meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0);

    let percent = if total_bytes > 0 {
        rss_bytes as f64 / total_bytes as f64 * 100.0
    } else {
        0.0
    };
    (rss_bytes, percent)
}

pub fn boot_time() -> Option<DateTime<Local>> {
    let stat = fs::read_to_string("/proc/stat").ok()?;
    let btime: i64 = stat
        .lines()
        .find_map(|line| line.strip_prefix("btime "))?
        .trim()
        .parse()
        .ok()?;
    Local.timestamp_opt(btime, 0).single()
}

pub fn read_process(pid: u32) -> Result<Process, ProbeError> {
    let stat_content =
        fs::read_to_string(proc_path(pid, "stat")).map_err(|_| ProbeError::NotFound(pid))?;
    let stat = parse_stat(&stat_content).ok_or(ProbeError::NotFound(pid))?;

    let mut p = Process {
        pid,
        ppid: stat.ppid,
        state: ProcState::from_code(stat.state),
        user: read_user(pid),
        cmdline: read_cmdline(pid),
        ..Process::default()
    };
    p.command = probe::derive_display_command(&stat.comm, &p.cmdline);

    p.working_dir = fs::read_link(proc_path(pid, "cwd"))
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    if let Ok(exe) = fs::read_link(proc_path(pid, "exe")) {
        let exe = exe.to_string_lossy().into_owned();
        p.exe_deleted = exe.contains("(deleted)");
        p.exe = Some(exe.replace(" (deleted)", ""));
    }

    p.env = read_environ(pid);

    // Start time: boot time plus starttime jiffies.
    let ticks = clock_ticks_per_sec();
    if let Some(boot) = boot_time() {
        let offset = chrono::Duration::milliseconds((stat.starttime * 1000 / ticks) as i64);
        p.started_at = Some(boot + offset);
    }

    // CPU%: average utilization since the process started.
    if let Some(started) = p.started_at {
        let elapsed = (Local::now() - started).num_milliseconds() as f64 / 1000.0;
        if elapsed > 0.0 {
            let used = (stat.utime + stat.stime) as f64 / ticks as f64;
            p.cpu_percent = (used / elapsed * 100.0).max(0.0);
        }
    }

    let (rss, mem_percent) = read_memory(pid);
    p.memory_rss_bytes = rss;
    p.memory_percent = mem_percent;

    let own_inodes = socket_inodes_of(pid);
    for socket in listening_socket_table() {
        if own_inodes.contains(&socket.inode) {
            p.add_listener(socket.port, socket.address);
        }
    }

    let cgroup = fs::read_to_string(proc_path(pid, "cgroup")).unwrap_or_default();
    p.container = container_from_cgroup(&cgroup);
    p.service = systemd_unit_from_cgroup(&cgroup);

    if p.working_dir != "unknown" {
        if let Some(ctx) = git::detect(&p.working_dir) {
            p.git_repo = ctx.repo;
            p.git_branch = ctx.branch;
        }
    }

    p.health = probe::classify_health(p.state, p.cpu_percent, p.memory_rss_bytes);

    Ok(p)
}

/// Identity-only snapshot of every process in `/proc`.
pub fn list_processes() -> Result<Vec<Process>, ProbeError> {
    let entries = fs::read_dir("/proc")
        .map_err(|e| ProbeError::Enumeration(format!("cannot read /proc: {e}")))?;

    let mut processes = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Ok(pid) = name.to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(content) = fs::read_to_string(proc_path(pid, "stat")) else {
            continue;
        };
        let Some(stat) = parse_stat(&content) else {
            continue;
        };

        let cmdline = read_cmdline(pid);
        processes.push(Process {
            pid,
            ppid: stat.ppid,
            command: probe::derive_display_command(&stat.comm, &cmdline),
            cmdline,
            state: ProcState::from_code(stat.state),
            ..Process::default()
        });
    }
    Ok(processes)
}

pub fn listening_sockets() -> Vec<(u32, Socket)> {
    let table = listening_socket_table();
    if table.is_empty() {
        return Vec::new();
    }

    // Invert: socket inode -> owning pid, by walking every fd table we can.
    let mut inode_to_pid: HashMap<String, u32> = HashMap::new();
    if let Ok(entries) = fs::read_dir("/proc") {
        for entry in entries.flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            for inode in socket_inodes_of(pid) {
                inode_to_pid.entry(inode).or_insert(pid);
            }
        }
    }

    table
        .into_iter()
        .filter_map(|s| inode_to_pid.get(&s.inode).map(|pid| (*pid, s)))
        .collect()
}

/// PIDs listening on `port`, sorted ascending.
pub fn pids_on_port(port: u16) -> Vec<u32> {
    let mut pids: Vec<u32> = listening_sockets()
        .into_iter()
        .filter(|(_, s)| s.port == port)
        .map(|(pid, _)| pid)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

const DEFAULT_FILE_LIMIT: u64 = 1024;

fn parse_file_limit(limits: &str) -> u64 {
    for line in limits.lines() {
        if !line.starts_with("Max open files") {
            continue;
        }
        // "Max open files  <soft>  <hard>  files"
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return DEFAULT_FILE_LIMIT;
        }
        if fields[3] == "unlimited" {
            return 0;
        }
        return fields[3].parse().unwrap_or(DEFAULT_FILE_LIMIT);
    }
    DEFAULT_FILE_LIMIT
}

fn locked_files_from_proc(pid: u32, locks: &str) -> Vec<String> {
    // "<id>: <type> <mode> <access> <pid> <dev:inode> <start> <end>"
    let pid_str = pid.to_string();
    let mut result = Vec::new();
    for line in locks.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }
        if fields[4] == pid_str && !result.contains(&fields[5].to_string()) {
            result.push(fields[5].to_string());
        }
    }
    result
}

fn locked_files(pid: u32) -> Vec<String> {
    match exec::run_text("lslocks", &["-o", "PATH", "-p", &pid.to_string()]) {
        Ok(output) => output.lines().skip(1).map(|l| l.trim().to_string()).collect(),
        Err(err) if err.is_not_found() => {
            let locks = fs::read_to_string("/proc/locks").unwrap_or_default();
            locked_files_from_proc(pid, &locks)
        }
        Err(err) => {
            debug!("lslocks failed for pid {pid}: {err}");
            Vec::new()
        }
    }
}

fn watched_dirs(pid: u32) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut dirs = Vec::new();
    let Ok(entries) = fs::read_dir(proc_path(pid, "fd")) else {
        return dirs;
    };
    for entry in entries.flatten() {
        let Ok(target) = fs::read_link(entry.path()) else {
            continue;
        };
        if Path::new(&target).is_dir() {
            let s = target.to_string_lossy().into_owned();
            if seen.insert(s.clone()) {
                dirs.push(s);
            }
        }
    }
    dirs
}

pub fn file_context(pid: u32) -> Option<FileContext> {
    let fd_entries = fs::read_dir(proc_path(pid, "fd")).ok()?;
    let open_files = fd_entries.count();

    let limits = fs::read_to_string(proc_path(pid, "limits")).unwrap_or_default();

    Some(FileContext {
        open_files,
        file_limit: parse_file_limit(&limits),
        locked_files: locked_files(pid),
        watched_dirs: watched_dirs(pid),
    })
}

pub fn resource_context(pid: u32) -> Option<ResourceContext> {
    let stat = fs::read_to_string(proc_path(pid, "stat")).ok()?;
    let fields = parse_stat(&stat)?;
    let ticks = clock_ticks_per_sec();

    let cpu_percent = boot_time()
        .map(|boot| {
            let started =
                boot + chrono::Duration::milliseconds((fields.starttime * 1000 / ticks) as i64);
            let elapsed = (Local::now() - started).num_milliseconds() as f64 / 1000.0;
            if elapsed > 0.0 {
                ((fields.utime + fields.stime) as f64 / ticks as f64 / elapsed * 100.0).max(0.0)
            } else {
                0.0
            }
        })
        .unwrap_or(0.0);

    let (rss, _) = read_memory(pid);

    Some(ResourceContext {
        prevents_sleep: false,
        thermal_state: String::new(),
        cpu_percent,
        memory_bytes: rss,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stat_handles_spaces_in_comm() {
        let content = "1234 (tmux: server) S 1 1234 1234 0 -1 4194304 100 0 0 0 5 3 0 0 20 0 1 0 12345 1000000 250 18446744073709551615";
        let stat = parse_stat(content).unwrap();
        assert_eq!(stat.comm, "tmux: server");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 1);
        assert_eq!(stat.utime, 5);
        assert_eq!(stat.stime, 3);
        assert_eq!(stat.starttime, 12345);
    }

    #[test]
    fn parse_stat_rejects_truncated_input() {
        assert!(parse_stat("1234 (x) S 1").is_none());
        assert!(parse_stat("").is_none());
    }

    #[test]
    fn parse_addr_ipv4_loopback() {
        assert_eq!(parse_addr("0100007F:0277", false), ("127.0.0.1".into(), 631));
    }

    #[test]
    fn parse_addr_ipv4_any() {
        assert_eq!(parse_addr("00000000:1F90", false), ("0.0.0.0".into(), 8080));
    }

    #[test]
    fn parse_addr_ipv6_any() {
        let (addr, port) = parse_addr("00000000000000000000000000000000:0050", true);
        assert_eq!(addr, "::");
        assert_eq!(port, 80);
    }

    #[test]
    fn parse_addr_ipv6_loopback() {
        let (addr, port) = parse_addr("00000000000000000000000001000000:1F90", true);
        assert_eq!(addr, "::1");
        assert_eq!(port, 8080);
    }

    #[test]
    fn parse_addr_truncated_is_benign() {
        assert_eq!(parse_addr("0100", false), (String::new(), 0));
        assert_eq!(parse_addr("0100007F", false), (String::new(), 0));
        assert_eq!(parse_addr("zzzz07F:0277", false), (String::new(), 0));
        assert_eq!(parse_addr("0100007F:0277", true), (String::new(), 0));
    }

    #[test]
    fn proc_net_keeps_only_listeners() {
        let content = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n\
  0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000   500        0 12345 1 0000000000000000 100 0 0 10 0\n\
  1: 0100007F:1F90 0501A8C0:D431 01 00000000:00000000 00:00000000 00000000   500        0 12346 1 0000000000000000 100 0 0 10 0\n";
        let sockets = parse_proc_net(content, false);
        assert_eq!(sockets.len(), 1);
        assert_eq!(sockets[0].port, 8080);
        assert_eq!(sockets[0].address, "127.0.0.1");
        assert_eq!(sockets[0].inode, "12345");
    }

    #[test]
    fn container_token_priority() {
        assert_eq!(container_from_cgroup("0::/docker/abc123\n"), "docker");
        assert_eq!(container_from_cgroup("0::/kubepods/pod7/x\n"), "kubepods");
        assert_eq!(container_from_cgroup("0::/user.slice\n"), "");
        // docker wins over later tokens when both appear
        assert_eq!(container_from_cgroup("0::/kubepods/docker/abc\n"), "docker");
    }

    #[test]
    fn systemd_unit_extraction() {
        let cgroup = "0::/system.slice/nginx.service\n";
        assert_eq!(systemd_unit_from_cgroup(cgroup), "nginx.service");
        assert_eq!(systemd_unit_from_cgroup("0::/user.slice/user-1000.slice\n"), "");
    }

    #[test]
    fn resolve_user_prefers_passwd_names() {
        let passwd = "root:x:0:0:root:/root:/bin/bash\nalice:x:1000:1000::/home/alice:/bin/sh\n";
        assert_eq!(resolve_user(0, passwd), "root");
        assert_eq!(resolve_user(1000, passwd), "alice");
        assert_eq!(resolve_user(1001, passwd), "1001");
    }

    #[test]
    fn file_limit_parsing() {
        let limits = "Limit                     Soft Limit           Hard Limit           Units\n\
Max open files            1048576              1048576              files\n";
        assert_eq!(parse_file_limit(limits), 1048576);
        let unlimited = "Max open files            unlimited            unlimited            files\n";
        assert_eq!(parse_file_limit(unlimited), 0);
        assert_eq!(parse_file_limit(""), DEFAULT_FILE_LIMIT);
    }

    #[test]
    fn proc_locks_filtered_by_pid() {
        let locks = "1: POSIX  ADVISORY  WRITE 1234 08:02:120 0 EOF\n\
2: FLOCK  ADVISORY  WRITE 5678 08:02:121 0 EOF\n";
        assert_eq!(locked_files_from_proc(1234, locks), vec!["08:02:120"]);
        assert!(locked_files_from_proc(999, locks).is_empty());
    }
}
