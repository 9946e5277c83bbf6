use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, SecondsFormat};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Kernel scheduling state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcState {
    Running,
    Sleeping,
    Stopped,
    Zombie,
    Idle,
    #[default]
    Unknown,
}

impl ProcState {
    /// Map the single-letter state from `ps` / `/proc/<pid>/stat`.
    pub fn from_code(c: char) -> Self {
        match c {
            'R' => ProcState::Running,
            'S' | 'D' | 'U' => ProcState::Sleeping,
            'T' | 't' => ProcState::Stopped,
            'Z' => ProcState::Zombie,
            'I' => ProcState::Idle,
            _ => ProcState::Unknown,
        }
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcState::Running => "running",
            ProcState::Sleeping => "sleeping",
            ProcState::Stopped => "stopped",
            ProcState::Zombie => "zombie",
            ProcState::Idle => "idle",
            ProcState::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Health verdict derived from kernel state plus resource usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Health {
    #[default]
    Healthy,
    HighCpu,
    HighMem,
    Zombie,
    Stopped,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Health::Healthy => "healthy",
            Health::HighCpu => "high-cpu",
            Health::HighMem => "high-mem",
            Health::Zombie => "zombie",
            Health::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Open file descriptor pressure and lock info for a process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileContext {
    pub open_files: usize,
    /// Soft limit on open files; 0 means unlimited.
    pub file_limit: u64,
    pub locked_files: Vec<String>,
    pub watched_dirs: Vec<String>,
}

/// Power and thermal signals for a process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceContext {
    pub prevents_sleep: bool,
    pub thermal_state: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

/// The canonical process record produced by the platform probe.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Process {
    pub pid: u32,
    pub ppid: u32,
    /// Short executable name with platform truncation undone where possible.
    pub command: String,
    /// Full command line, or `(unknown)` when unreadable.
    pub cmdline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exe: Option<String>,
    pub exe_deleted: bool,
    pub user: String,
    #[serde(serialize_with = "serialize_started_at")]
    pub started_at: Option<DateTime<Local>>,
    pub state: ProcState,
    pub working_dir: String,
    pub env: Vec<String>,
    /// Sorted, duplicate-free; parallel to `bind_addresses`.
    pub listening_ports: Vec<u16>,
    pub bind_addresses: Vec<String>,
    /// Init-service identity (launchd label, systemd unit); empty if none.
    pub service: String,
    /// Container engine (`docker`, `podman`, ...); empty if none.
    pub container: String,
    pub git_repo: String,
    pub git_branch: String,
    pub health: Health,
    pub cpu_percent: f64,
    pub memory_rss_bytes: u64,
    pub memory_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_context: Option<FileContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_context: Option<ResourceContext>,
}

fn serialize_started_at<S: Serializer>(
    t: &Option<DateTime<Local>>,
    ser: S,
) -> Result<S::Ok, S::Error> {
    match t {
        Some(t) => ser.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Secs, false)),
        None => ser.serialize_str(""),
    }
}

impl Process {
    /// Record a listening socket, keeping ports sorted and duplicate-free
    /// with `bind_addresses` parallel.
    pub fn add_listener(&mut self, port: u16, address: String) {
        match self.listening_ports.binary_search(&port) {
            Ok(_) => {}
            Err(idx) => {
                self.listening_ports.insert(idx, port);
                self.bind_addresses.insert(idx, address);
            }
        }
    }
}

/// A listening TCP endpoint attributed to a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Socket {
    pub inode: String,
    pub port: u16,
    pub address: String,
}

/// TCP connection state, as reported by the kernel or netstat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SocketState {
    Listen,
    Established,
    TimeWait,
    CloseWait,
    FinWait1,
    FinWait2,
    SynSent,
    SynReceived,
    Closing,
    LastAck,
    Unknown,
}

impl SocketState {
    pub fn parse(token: &str) -> Self {
        match token {
            "LISTEN" => SocketState::Listen,
            "ESTABLISHED" => SocketState::Established,
            "TIME_WAIT" => SocketState::TimeWait,
            "CLOSE_WAIT" => SocketState::CloseWait,
            "FIN_WAIT_1" | "FIN_WAIT1" => SocketState::FinWait1,
            "FIN_WAIT_2" | "FIN_WAIT2" => SocketState::FinWait2,
            "SYN_SENT" => SocketState::SynSent,
            "SYN_RCVD" | "SYN_RECEIVED" => SocketState::SynReceived,
            "CLOSING" => SocketState::Closing,
            "LAST_ACK" => SocketState::LastAck,
            _ => SocketState::Unknown,
        }
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SocketState::Listen => "LISTEN",
            SocketState::Established => "ESTABLISHED",
            SocketState::TimeWait => "TIME_WAIT",
            SocketState::CloseWait => "CLOSE_WAIT",
            SocketState::FinWait1 => "FIN_WAIT_1",
            SocketState::FinWait2 => "FIN_WAIT_2",
            SocketState::SynSent => "SYN_SENT",
            SocketState::SynReceived => "SYN_RECEIVED",
            SocketState::Closing => "CLOSING",
            SocketState::LastAck => "LAST_ACK",
            SocketState::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

/// A socket observed on a port, with a human-readable diagnosis.
#[derive(Debug, Clone, Serialize)]
pub struct SocketInfo {
    pub local_addr: String,
    pub port: u16,
    pub state: SocketState,
    pub explanation: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub workaround: String,
}

/// What kind of selector the user gave us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Pid,
    Port,
    Name,
    Service,
}

/// A target selector: the kind plus the raw user-supplied value.
/// Parsing and validation happen at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub kind: TargetKind,
    pub value: String,
}

impl Target {
    pub fn pid(value: impl Into<String>) -> Self {
        Target { kind: TargetKind::Pid, value: value.into() }
    }

    pub fn port(value: impl Into<String>) -> Self {
        Target { kind: TargetKind::Port, value: value.into() }
    }

    pub fn name(value: impl Into<String>) -> Self {
        Target { kind: TargetKind::Name, value: value.into() }
    }

    pub fn service(value: impl Into<String>) -> Self {
        Target { kind: TargetKind::Service, value: value.into() }
    }
}

/// Structured launchd job definition parsed from a plist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LaunchdInfo {
    pub label: String,
    pub program: String,
    pub program_arguments: Vec<String>,
    /// `system`, `gui/<uid>`, `user`, or empty when unknown.
    pub domain: String,
    pub plist_path: String,
    pub run_at_load: bool,
    pub keep_alive: bool,
    pub start_interval: i64,
    pub start_calendar_interval: String,
    pub watch_paths: Vec<String>,
    pub queue_directories: Vec<String>,
}

/// The launching source of a process: who or what is responsible for it.
///
/// Variants carry the payload their detector produced; the wire shape
/// (`type`/`name`/`confidence`/`details`) is derived during serialization.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SourceKind {
    #[default]
    Unknown,
    Shell {
        shell: String,
    },
    Supervisor {
        name: String,
    },
    Cron,
    Launchd {
        label: String,
        info: Option<LaunchdInfo>,
    },
    Systemd {
        unit: String,
    },
    BsdRc,
    Container {
        engine: String,
    },
    Ide {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub kind: SourceKind,
    pub confidence: f64,
}

impl Default for Source {
    fn default() -> Self {
        Source { kind: SourceKind::Unknown, confidence: 0.3 }
    }
}

impl Source {
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            SourceKind::Unknown => "unknown",
            SourceKind::Shell { .. } => "shell",
            SourceKind::Supervisor { .. } => "supervisor",
            SourceKind::Cron => "cron",
            SourceKind::Launchd { .. } => "launchd",
            SourceKind::Systemd { .. } => "systemd",
            SourceKind::BsdRc => "bsd-rc",
            SourceKind::Container { .. } => "container",
            SourceKind::Ide { .. } => "ide",
        }
    }

    /// The human-facing source name (shell binary, supervisor, label...).
    pub fn name(&self) -> String {
        match &self.kind {
            SourceKind::Unknown => String::new(),
            SourceKind::Shell { shell } => shell.clone(),
            SourceKind::Supervisor { name } => name.clone(),
            SourceKind::Cron => "cron".to_string(),
            SourceKind::Launchd { label, .. } => {
                if label.is_empty() {
                    "launchd".to_string()
                } else {
                    label.clone()
                }
            }
            SourceKind::Systemd { unit } => {
                if unit.is_empty() {
                    "systemd".to_string()
                } else {
                    unit.clone()
                }
            }
            SourceKind::BsdRc => "rc.d".to_string(),
            SourceKind::Container { engine } => engine.clone(),
            SourceKind::Ide { name } => name.clone(),
        }
    }

    /// Variant-specific details flattened for display and JSON.
    pub fn details(&self) -> BTreeMap<&'static str, String> {
        let mut d = BTreeMap::new();
        match &self.kind {
            SourceKind::Container { engine } => {
                d.insert("engine", engine.clone());
            }
            SourceKind::Systemd { unit } if !unit.is_empty() => {
                d.insert("unit", unit.clone());
            }
            SourceKind::Launchd { info, .. } => {
                if let Some(info) = info {
                    d.insert("type", info.domain_description().to_string());
                    if !info.plist_path.is_empty() {
                        d.insert("plist", info.plist_path.clone());
                    }
                    let triggers = info.format_triggers();
                    if !triggers.is_empty() {
                        d.insert("triggers", triggers.join("; "));
                    }
                    if info.keep_alive {
                        d.insert("keepalive", "true".to_string());
                    }
                }
            }
            _ => {}
        }
        d
    }
}

impl Serialize for Source {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        let mut s = ser.serialize_struct("Source", 4)?;
        s.serialize_field("type", self.type_name())?;
        s.serialize_field("name", &self.name())?;
        s.serialize_field("confidence", &self.confidence)?;
        s.serialize_field("details", &self.details())?;
        s.end()
    }
}

/// Full analysis of one target process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub process: Process,
    /// Ordered init-first; the last entry is the target itself.
    pub ancestry: Vec<Process>,
    pub children: Vec<Process>,
    pub source: Source,
    pub warnings: Vec<String>,
}

impl AnalysisReport {
    /// The target process as seen in the ancestry chain.
    pub fn target(&self) -> Option<&Process> {
        self.ancestry.last()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
