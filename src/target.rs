//! Target selector resolution.
//!
//! Turns a user-supplied selector (PID, port, name pattern, service label)
//! into concrete PIDs. Ambiguity is preserved: every match is returned,
//! sorted ascending, and the caller decides how to narrow.

use log::debug;

use crate::error::{ProbeError, ResolveError};
use crate::exec;
use crate::probe;
use crate::types::{Target, TargetKind};

/// The tool's own name, excluded from name matches alongside `grep`.
const TOOL_NAME: &str = "witr";

/// Maximum accepted service-label length.
const MAX_LABEL_LEN: usize = 256;

pub fn resolve(target: &Target) -> Result<Vec<u32>, ResolveError> {
    match target.kind {
        TargetKind::Pid => resolve_pid(&target.value),
        TargetKind::Port => resolve_port_value(&target.value),
        TargetKind::Name => resolve_name(&target.value),
        TargetKind::Service => resolve_service(&target.value),
    }
}

fn resolve_pid(value: &str) -> Result<Vec<u32>, ResolveError> {
    let pid: u32 = value
        .parse()
        .map_err(|_| ResolveError::InvalidSelector { what: "pid", value: value.to_string() })?;

    probe::read_process(pid).map_err(|_| ResolveError::NotFound(value.to_string()))?;
    Ok(vec![pid])
}

fn resolve_port_value(value: &str) -> Result<Vec<u32>, ResolveError> {
    let port: u16 = value
        .parse()
        .map_err(|_| ResolveError::InvalidSelector { what: "port", value: value.to_string() })?;
    resolve_port(port)
}

/// All PIDs listening on `port`, sorted ascending.
pub fn resolve_port(port: u16) -> Result<Vec<u32>, ResolveError> {
    let pids = probe::pids_on_port(port);
    if pids.is_empty() {
        return Err(ResolveError::NoListener(port));
    }
    Ok(pids)
}

/// PIDs whose command or arguments contain `pattern` (case-insensitive).
///
/// The analyzer's own PID and parent are excluded, as are `grep` lines and
/// the tool's own invocations. When nothing matches, the pattern is retried
/// as a service label.
pub fn resolve_name(pattern: &str) -> Result<Vec<u32>, ResolveError> {
    if pattern.is_empty() {
        return Err(ResolveError::InvalidSelector { what: "name", value: String::new() });
    }

    let mut pids = discover(pattern)?;
    if pids.is_empty() {
        debug!("no process named {pattern:?}; trying service labels");
        if let Some(pid) = service_pid(pattern) {
            pids.push(pid);
        }
    }

    if pids.is_empty() {
        return Err(ResolveError::NoMatch(pattern.to_string()));
    }
    pids.sort_unstable();
    pids.dedup();
    Ok(pids)
}

fn resolve_service(label: &str) -> Result<Vec<u32>, ResolveError> {
    if !is_valid_service_label(label) {
        return Err(ResolveError::InvalidSelector { what: "service", value: label.to_string() });
    }
    match service_pid(label) {
        Some(pid) => Ok(vec![pid]),
        None => Err(ResolveError::NoMatch(label.to_string())),
    }
}

fn self_and_parent() -> (u32, u32) {
    let self_pid = std::process::id();
    #[cfg(unix)]
    let parent = unsafe { libc::getppid() } as u32;
    #[cfg(not(unix))]
    let parent = 0;
    (self_pid, parent)
}

/// Every PID matching `pattern`, without ambiguity checks. Used both here
/// and by the batch pipeline.
pub fn discover(pattern: &str) -> Result<Vec<u32>, ResolveError> {
    let out = exec::run_text("ps", &["-axo", "pid=,comm=,args="]).map_err(|e| {
        ResolveError::Enumeration(ProbeError::Enumeration(format!(
            "failed to list processes: {e}"
        )))
    })?;

    let pattern_lower = pattern.to_lowercase();
    let (self_pid, parent_pid) = self_and_parent();

    let mut pids = Vec::new();
    for line in out.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 2 {
            continue;
        }
        let Ok(pid) = fields[0].parse::<u32>() else {
            continue;
        };
        if pid == self_pid || pid == parent_pid {
            continue;
        }

        let comm = fields[1].to_lowercase();
        let args = if fields.len() > 2 { fields[2..].join(" ").to_lowercase() } else { String::new() };

        if comm.contains(&pattern_lower)
            && !comm.contains("grep")
            && !comm.contains(TOOL_NAME)
        {
            pids.push(pid);
            continue;
        }

        if args.contains(&pattern_lower) && !args.contains("grep") && !args.contains(TOOL_NAME) {
            pids.push(pid);
        }
    }

    Ok(pids)
}

/// Label charset accepted for service lookups: `[A-Za-z0-9._-]{1,256}`.
pub fn is_valid_service_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

/// Look a label up in the init service manager and extract its PID.
fn service_pid(name: &str) -> Option<u32> {
    if !is_valid_service_label(name) {
        return None;
    }

    let candidates =
        [name.to_string(), format!("com.apple.{name}"), format!("org.{name}")];

    for label in &candidates {
        let Ok(out) = exec::run_text("launchctl", &["print", &format!("system/{label}")]) else {
            continue;
        };
        if let Some(pid) = parse_service_pid(&out) {
            return Some(pid);
        }
    }
    None
}

fn parse_service_pid(output: &str) -> Option<u32> {
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("pid = ") {
            return rest.trim().parse().ok();
        }
    }
    None
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::MockExecutor;

    #[test]
    fn service_label_charset() {
        assert!(is_valid_service_label("com.apple.Safari"));
        assert!(is_valid_service_label("org.nginx"));
        assert!(is_valid_service_label("my-service_123"));
        assert!(is_valid_service_label("a"));
        assert!(!is_valid_service_label(""));
        assert!(!is_valid_service_label("invalid/label"));
        assert!(!is_valid_service_label("has space"));
        assert!(!is_valid_service_label("has@special"));
        assert!(!is_valid_service_label(&"a".repeat(300)));
    }

    #[test]
    fn invalid_pid_values_are_rejected() {
        let _guard = exec::test_lock();
        MockExecutor::new().install();

        assert!(matches!(
            resolve(&Target::pid("abc")),
            Err(ResolveError::InvalidSelector { what: "pid", .. })
        ));
        assert!(matches!(
            resolve(&Target::pid("")),
            Err(ResolveError::InvalidSelector { what: "pid", .. })
        ));
        assert!(matches!(
            resolve(&Target::port("http")),
            Err(ResolveError::InvalidSelector { what: "port", .. })
        ));

        exec::reset_executor();
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn port_resolution_returns_sorted_pids() {
        let _guard = exec::test_lock();
        MockExecutor::new()
            .on("lsof", &["-i", "TCP:8080", "-s", "TCP:LISTEN", "-n", "-P", "-t"], "456\n123\n")
            .install();

        let pids = resolve_port(8080).unwrap();
        assert_eq!(pids, vec![123, 456]);

        exec::reset_executor();
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn port_without_listener_errors() {
        let _guard = exec::test_lock();
        MockExecutor::new()
            .on("lsof", &["-i", "TCP:8080", "-s", "TCP:LISTEN", "-n", "-P", "-t"], "\n")
            .on("netstat", &["-anv", "-p", "tcp"], "tcp4 0 0 *.22 *.* LISTEN 0 0 22 0\n")
            .install();

        assert!(matches!(resolve_port(8080), Err(ResolveError::NoListener(8080))));

        exec::reset_executor();
    }

    #[test]
    fn name_matching_skips_grep_and_self_lines() {
        let _guard = exec::test_lock();
        let self_pid = std::process::id();
        let ps_out = format!(
            " 9001 myapp /usr/bin/myapp --flag\n \
{self_pid} myapp /usr/bin/myapp --self\n \
9002 grep grep myapp\n \
9003 sh /usr/bin/witr myapp\n"
        );
        MockExecutor::new().on("ps", &["-axo", "pid=,comm=,args="], &ps_out).install();

        let pids = resolve_name("myapp").unwrap();
        assert_eq!(pids, vec![9001]);

        exec::reset_executor();
    }

    #[test]
    fn name_falls_back_to_service_label() {
        let _guard = exec::test_lock();
        MockExecutor::new()
            .on("ps", &["-axo", "pid=,comm=,args="], " 10 other /bin/other\n")
            .on(
                "launchctl",
                &["print", "system/myapp"],
                "system/myapp = {\n\tpid = 777\n\tstate = running\n}\n",
            )
            .install();

        let pids = resolve_name("myapp").unwrap();
        assert_eq!(pids, vec![777]);

        exec::reset_executor();
    }

    #[test]
    fn unmatched_name_is_no_match() {
        let _guard = exec::test_lock();
        MockExecutor::new()
            .on("ps", &["-axo", "pid=,comm=,args="], " 10 other /bin/other\n")
            .install();

        assert!(matches!(resolve_name("ghost"), Err(ResolveError::NoMatch(_))));

        exec::reset_executor();
    }

    #[test]
    fn service_pid_parsing() {
        let out = "system/com.test = {\n\tactive count = 1\n\tpid = 4242\n}\n";
        assert_eq!(parse_service_pid(out), Some(4242));
        assert_eq!(parse_service_pid("no pid here"), None);
    }
}
