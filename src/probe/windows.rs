//! Windows probe: facts gathered through `tasklist`, `netstat -ano` and
//! PowerShell CIM queries, all via the process-wide executor.
//!
//! The coverage is narrower than the UNIX probes: identity, command line,
//! working set and listening ports. File and resource context are not
//! exposed on this platform.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

use crate::error::ProbeError;
use crate::exec;
use crate::probe;
use crate::types::{FileContext, ProcState, Process, ResourceContext, Socket};

fn cim_query(filter: &str, properties: &str) -> Result<String, ProbeError> {
    let script = format!(
        "Get-CimInstance Win32_Process {filter} | Select-Object {properties} | Format-List"
    );
    exec::run_text("powershell", &["-NoProfile", "-Command", &script])
        .map_err(|e| ProbeError::Enumeration(format!("powershell unavailable: {e}")))
}

/// Parse `Format-List` output: blank-line-separated records of
/// `Key : Value` lines (values may be empty).
fn parse_format_list(output: &str) -> Vec<Vec<(String, String)>> {
    let mut records = Vec::new();
    let mut current: Vec<(String, String)> = Vec::new();

    for line in output.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            current.push((key.trim().to_string(), value.trim().to_string()));
        } else if let Some(last) = current.last_mut() {
            // Wrapped continuation of the previous value.
            last.1.push_str(trimmed.trim_start());
        }
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

fn field<'a>(record: &'a [(String, String)], key: &str) -> Option<&'a str> {
    record.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn parse_creation_date(raw: &str) -> Option<DateTime<Local>> {
    for format in ["%m/%d/%Y %I:%M:%S %p", "%d/%m/%Y %H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Local.from_local_datetime(&naive).single();
        }
    }
    None
}

fn process_from_record(record: &[(String, String)]) -> Option<Process> {
    let pid: u32 = field(record, "ProcessId")?.parse().ok()?;
    let ppid: u32 = field(record, "ParentProcessId").and_then(|v| v.parse().ok()).unwrap_or(0);
    let name = field(record, "Name").unwrap_or("").to_string();
    let cmdline = match field(record, "CommandLine") {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "(unknown)".to_string(),
    };

    let mut p = Process {
        pid,
        ppid,
        command: if name.is_empty() {
            probe::derive_display_command("", &cmdline)
        } else {
            name
        },
        cmdline,
        user: "unknown".to_string(),
        state: ProcState::Running,
        working_dir: "unknown".to_string(),
        ..Process::default()
    };

    if let Some(exe) = field(record, "ExecutablePath") {
        if !exe.is_empty() {
            p.exe = Some(exe.to_string());
        }
    }
    if let Some(raw) = field(record, "CreationDate") {
        p.started_at = parse_creation_date(raw);
    }
    if let Some(ws) = field(record, "WorkingSetSize").and_then(|v| v.parse::<u64>().ok()) {
        p.memory_rss_bytes = ws;
    }

    Some(p)
}

pub fn read_process(pid: u32) -> Result<Process, ProbeError> {
    let output = cim_query(
        &format!("-Filter \"ProcessId={pid}\""),
        "ProcessId,ParentProcessId,Name,CommandLine,ExecutablePath,CreationDate,WorkingSetSize",
    )?;

    let records = parse_format_list(&output);
    let mut p = records
        .iter()
        .find_map(|r| process_from_record(r))
        .ok_or(ProbeError::NotFound(pid))?;

    for (owner, socket) in listening_sockets() {
        if owner == pid {
            p.add_listener(socket.port, socket.address);
        }
    }

    p.health = probe::classify_health(p.state, p.cpu_percent, p.memory_rss_bytes);
    Ok(p)
}

pub fn list_processes() -> Result<Vec<Process>, ProbeError> {
    let output = cim_query("", "ProcessId,ParentProcessId,Name")?;
    Ok(parse_format_list(&output).iter().filter_map(|r| process_from_record(r)).collect())
}

/// Parse `netstat -ano` rows: `TCP <local> <remote> LISTENING <pid>`.
fn parse_netstat_ano(output: &str) -> Vec<(u32, Socket)> {
    let mut sockets = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 || fields[0] != "TCP" || fields[3] != "LISTENING" {
            continue;
        }
        let (address, port) = super::net::parse_netstat_addr(fields[1]);
        if address.is_empty() && port == 0 {
            continue;
        }
        let Ok(pid) = fields[4].parse::<u32>() else {
            continue;
        };
        sockets.push((pid, Socket { inode: format!("{pid}:{port}"), port, address }));
    }
    sockets
}

pub fn listening_sockets() -> Vec<(u32, Socket)> {
    match exec::run_text("netstat", &["-ano"]) {
        Ok(out) => parse_netstat_ano(&out),
        Err(_) => Vec::new(),
    }
}

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

pub fn file_context(_pid: u32) -> Option<FileContext> {
    None
}

pub fn resource_context(_pid: u32) -> Option<ResourceContext> {
    None
}

pub fn boot_time() -> Option<DateTime<Local>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_list_records() {
        let out = "ProcessId       : 123\nParentProcessId : 4\nName            : app.exe\n\n\
ProcessId       : 456\nParentProcessId : 123\nName            : child.exe\n\n";
        let records = parse_format_list(out);
        assert_eq!(records.len(), 2);
        assert_eq!(field(&records[0], "ProcessId"), Some("123"));
        assert_eq!(field(&records[1], "Name"), Some("child.exe"));
    }

    #[test]
    fn netstat_ano_rows() {
        let out = "  TCP    0.0.0.0:135    0.0.0.0:0    LISTENING    948\n\
  TCP    127.0.0.1:8080    0.0.0.0:0    LISTENING    1234\n\
  TCP    10.0.0.5:50000    1.2.3.4:443  ESTABLISHED  1234\n";
        let sockets = parse_netstat_ano(out);
        assert_eq!(sockets.len(), 2);
        assert_eq!(sockets[0].0, 948);
        assert_eq!(sockets[0].1.port, 135);
        assert_eq!(sockets[0].1.address, "0.0.0.0");
        assert_eq!(sockets[1].1.address, "127.0.0.1");
    }

    #[test]
    fn record_to_process() {
        let record = vec![
            ("ProcessId".to_string(), "123".to_string()),
            ("ParentProcessId".to_string(), "4".to_string()),
            ("Name".to_string(), "app.exe".to_string()),
            ("CommandLine".to_string(), "C:\\app.exe --serve".to_string()),
        ];
        let p = process_from_record(&record).unwrap();
        assert_eq!(p.pid, 123);
        assert_eq!(p.ppid, 4);
        assert_eq!(p.command, "app.exe");
        assert_eq!(p.cmdline, "C:\\app.exe --serve");
    }
}
