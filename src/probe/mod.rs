//! Platform-abstracted process fact gathering.
//!
//! Each platform module implements the same capability set: read one
//! process, list the table, enumerate listening sockets, inspect socket
//! states on a port, and gather file/resource context. Dispatch is a
//! compile-time choice; everything above this module is platform-free.
//!
//! Probes degrade: any fact that cannot be read becomes `unknown`/empty on
//! the record rather than failing the read. Only a missing process (or a
//! dead process table) is an error.

#[cfg(any(target_os = "linux", test))]
pub mod linux;

#[cfg(any(target_os = "macos", test))]
pub mod darwin;

#[cfg(target_os = "windows")]
pub mod windows;

pub mod net;

use crate::error::ProbeError;
use crate::types::{FileContext, Health, ProcState, Process, ResourceContext, Socket, SocketInfo};
use chrono::{DateTime, Local};

// ── Platform dispatch ───────────────────────────────────────────────────────

#[cfg(target_os = "linux")]
mod dispatch {
    pub use super::linux::{
        boot_time, file_context, list_processes, listening_sockets, pids_on_port, read_process,
        resource_context,
    };
}

#[cfg(target_os = "macos")]
mod dispatch {
    pub use super::darwin::{
        boot_time, file_context, list_processes, listening_sockets, pids_on_port, read_process,
        resource_context,
    };
}

#[cfg(target_os = "windows")]
mod dispatch {
    pub use super::windows::{
        boot_time, file_context, list_processes, listening_sockets, pids_on_port, read_process,
        resource_context,
    };
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod dispatch {
    use super::*;

    pub fn read_process(pid: u32) -> Result<Process, ProbeError> {
        Err(ProbeError::NotFound(pid))
    }

    pub fn list_processes() -> Result<Vec<Process>, ProbeError> {
        Err(ProbeError::Enumeration("unsupported platform".into()))
    }

    pub fn listening_sockets() -> Vec<(u32, Socket)> {
        Vec::new()
    }

    pub fn pids_on_port(_port: u16) -> Vec<u32> {
        Vec::new()
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
}

/// Gather the full canonical record for one process.
pub fn read_process(pid: u32) -> Result<Process, ProbeError> {
    dispatch::read_process(pid)
}

/// Lightweight snapshot of the whole process table (identity fields only).
pub fn list_processes() -> Result<Vec<Process>, ProbeError> {
    dispatch::list_processes()
}

/// All listening TCP sockets with their owning PIDs.
pub fn listening_sockets() -> Vec<(u32, Socket)> {
    dispatch::listening_sockets()
}

/// Socket states observed on a port, with diagnoses.
pub fn socket_states(port: u16) -> Vec<SocketInfo> {
    net::socket_states(port).unwrap_or_default()
}

/// PIDs currently listening on `port`, sorted ascending.
pub fn pids_on_port(port: u16) -> Vec<u32> {
    dispatch::pids_on_port(port)
}

/// File-descriptor pressure for a process; `None` when FDs can't be listed.
pub fn file_context(pid: u32) -> Option<FileContext> {
    dispatch::file_context(pid)
}

/// Power/thermal context for a process.
pub fn resource_context(pid: u32) -> Option<ResourceContext> {
    dispatch::resource_context(pid)
}

/// When the host booted, if the platform exposes it.
pub fn boot_time() -> Option<DateTime<Local>> {
    dispatch::boot_time()
}

// ── Shared derivations ──────────────────────────────────────────────────────

/// True for a `KEY=VALUE` token whose key is a valid environment name.
pub fn is_env_assignment(token: &str) -> bool {
    let Some((key, _)) = token.split_once('=') else {
        return false;
    };
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split a command line into tokens, honoring single and double quotes.
fn shell_tokens(cmdline: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in cmdline.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Undo platform truncation of the short process name.
///
/// `ps` truncates `ucomm` (15 chars on Darwin). The executable basename
/// from the command line is preferred when it extends the truncated name;
/// otherwise the kernel's name stands.
pub fn derive_display_command(comm: &str, cmdline: &str) -> String {
    let exe_token = shell_tokens(cmdline)
        .into_iter()
        .find(|t| !is_env_assignment(t) && t.contains('/'));

    let Some(token) = exe_token else {
        if comm.is_empty() {
            if let Some(first) = shell_tokens(cmdline).into_iter().find(|t| !is_env_assignment(t)) {
                return first;
            }
        }
        return comm.to_string();
    };

    let basename = token.rsplit('/').next().unwrap_or(&token).to_string();
    if basename.starts_with(comm) && basename.len() > comm.len() {
        basename
    } else {
        comm.to_string()
    }
}

/// Thresholds over which a healthy process is flagged.
const HIGH_CPU_PERCENT: f64 = 80.0;
const HIGH_MEM_BYTES: u64 = 1024 * 1024 * 1024;

/// Fold kernel state and resource usage into a health verdict.
pub fn classify_health(state: ProcState, cpu_percent: f64, rss_bytes: u64) -> Health {
    match state {
        ProcState::Zombie => Health::Zombie,
        ProcState::Stopped => Health::Stopped,
        _ => {
            if cpu_percent > HIGH_CPU_PERCENT {
                Health::HighCpu
            } else if rss_bytes > HIGH_MEM_BYTES {
                Health::HighMem
            } else {
                Health::Healthy
            }
        }
    }
}

/// Where a bound address is reachable from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// The unspecified address: reachable from anywhere.
    Public,
    /// RFC1918 / IPv6 ULA private ranges.
    Lan,
    Loopback,
    /// A specific routable address.
    External,
}

pub fn classify_address(addr: &str) -> AddressClass {
    if addr == "0.0.0.0" || addr == "::" {
        return AddressClass::Public;
    }
    if addr == "127.0.0.1" || addr == "::1" || addr.starts_with("127.") {
        return AddressClass::Loopback;
    }
    if addr.starts_with("10.")
        || addr.starts_with("192.168.")
        || is_rfc1918_172(addr)
        || addr.starts_with("fd")
        || addr.starts_with("fc")
    {
        return AddressClass::Lan;
    }
    AddressClass::External
}

fn is_rfc1918_172(addr: &str) -> bool {
    let Some(rest) = addr.strip_prefix("172.") else {
        return false;
    };
    let Some((octet, _)) = rest.split_once('.') else {
        return false;
    };
    matches!(octet.parse::<u8>(), Ok(n) if (16..=31).contains(&n))
}

/// The warning-level contract: only the unspecified address counts.
pub fn is_public_bind(addresses: &[String]) -> bool {
    addresses.iter().any(|a| a == "0.0.0.0" || a == "::")
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_assignment_shapes() {
        assert!(is_env_assignment("HOME=/root"));
        assert!(is_env_assignment("MY_VAR=1"));
        assert!(is_env_assignment("_X="));
        assert!(!is_env_assignment("HOME"));
        assert!(!is_env_assignment("=value"));
        assert!(!is_env_assignment("1VAR=x"));
        assert!(!is_env_assignment("path/to=x"));
    }

    #[test]
    fn display_command_untruncates() {
        let got = derive_display_command(
            "AccessibilityVis",
            "/System/Library/PrivateFrameworks/AccessibilitySupport.framework/Versions/A/Resources/AccessibilityVisualsAgent.app/Contents/MacOS/AccessibilityVisualsAgent",
        );
        assert_eq!(got, "AccessibilityVisualsAgent");
    }

    #[test]
    fn display_command_keeps_comm_for_interpreters() {
        assert_eq!(derive_display_command("python3", "python3 /tmp/x.py"), "python3");
    }

    #[test]
    fn display_command_handles_quoted_paths() {
        let got = derive_display_command("", "\"/Applications/App Name/MyBinary\" --flag");
        assert_eq!(got, "MyBinary");
    }

    #[test]
    fn display_command_skips_env_assignments() {
        let got = derive_display_command("ng", "FOO=/bar /usr/sbin/nginx-worker -g daemon");
        assert_eq!(got, "nginx-worker");
    }

    #[test]
    fn display_command_without_path_keeps_comm() {
        assert_eq!(derive_display_command("node", "node server.js"), "node");
    }

    #[test]
    fn health_classification_order() {
        assert_eq!(classify_health(ProcState::Zombie, 99.0, 0), Health::Zombie);
        assert_eq!(classify_health(ProcState::Stopped, 0.0, 0), Health::Stopped);
        assert_eq!(classify_health(ProcState::Running, 95.0, 2 << 30), Health::HighCpu);
        assert_eq!(
            classify_health(ProcState::Running, 10.0, 2 * 1024 * 1024 * 1024),
            Health::HighMem
        );
        assert_eq!(classify_health(ProcState::Sleeping, 1.0, 1024), Health::Healthy);
    }

    #[test]
    fn public_bind_contract() {
        let addrs = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(!is_public_bind(&addrs(&["127.0.0.1"])));
        assert!(is_public_bind(&addrs(&["127.0.0.1", "0.0.0.0"])));
        assert!(is_public_bind(&addrs(&["::"])));
        assert!(!is_public_bind(&[]));
        // Routable but specific addresses are not the unspecified bind.
        assert!(!is_public_bind(&addrs(&["203.0.113.7"])));
    }

    #[test]
    fn address_classes() {
        assert_eq!(classify_address("0.0.0.0"), AddressClass::Public);
        assert_eq!(classify_address("::"), AddressClass::Public);
        assert_eq!(classify_address("127.0.0.1"), AddressClass::Loopback);
        assert_eq!(classify_address("10.1.2.3"), AddressClass::Lan);
        assert_eq!(classify_address("172.20.0.1"), AddressClass::Lan);
        assert_eq!(classify_address("172.32.0.1"), AddressClass::External);
        assert_eq!(classify_address("fd00::1"), AddressClass::Lan);
        assert_eq!(classify_address("8.8.8.8"), AddressClass::External);
    }
}
