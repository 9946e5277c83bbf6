//! Socket-state introspection shared across the UNIX probes.
//!
//! `netstat -an -p tcp` is the portable fallback surface: address columns
//! come in `host.port` (BSD) or `host:port` form, IPv6 in brackets, and the
//! wildcard address as `*`. The wildcard never leaks out of this module; it
//! is normalized to `0.0.0.0` / `::` here.

use log::debug;

use crate::error::ExecError;
use crate::exec;
use crate::types::{Socket, SocketInfo, SocketState};

/// Parse a netstat address column into `(address, port)`.
///
/// Accepts `127.0.0.1.8080`, `10.0.0.1:631`, `*.80`, `[::1]:8080` and
/// `[::]:8080`. Unparseable input yields `("", 0)`.
pub fn parse_netstat_addr(raw: &str) -> (String, u16) {
    if raw.is_empty() {
        return (String::new(), 0);
    }

    // Bracketed IPv6: [addr]:port
    if let Some(rest) = raw.strip_prefix('[') {
        let Some((addr, port)) = rest.split_once(']') else {
            return (String::new(), 0);
        };
        let port = port.strip_prefix(':').and_then(|p| p.parse().ok()).unwrap_or(0);
        if addr.is_empty() {
            return (String::new(), 0);
        }
        let addr = if addr == "*" { "::".to_string() } else { addr.to_string() };
        return (addr, port);
    }

    // host:port or host.port; whichever separator appears last wins, so
    // bare IPv6 forms like `::1.8080` still split on the dot.
    let sep = match (raw.rfind(':'), raw.rfind('.')) {
        (Some(c), Some(d)) => Some(c.max(d)),
        (c, d) => c.or(d),
    };
    let Some(sep) = sep else {
        return (String::new(), 0);
    };

    let (host, port) = raw.split_at(sep);
    let Ok(port) = port[1..].parse::<u16>() else {
        return (String::new(), 0);
    };

    let host = if host == "*" || host.is_empty() {
        "0.0.0.0".to_string()
    } else {
        host.to_string()
    };

    (host, port)
}

fn parse_netstat_rows(output: &str) -> Vec<(String, u16, SocketState)> {
    let mut rows = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 || !fields[0].starts_with("tcp") {
            continue;
        }

        let (addr, port) = parse_netstat_addr(fields[3]);
        if port == 0 && addr.is_empty() {
            continue;
        }

        let state = SocketState::parse(fields[fields.len() - 1]);
        rows.push((addr, port, state));
    }
    rows
}

fn run_netstat() -> Result<String, ExecError> {
    exec::run_text("netstat", &["-an", "-p", "tcp"])
}

/// All listening sockets visible to netstat, wildcard addresses normalized.
pub fn listening_sockets_netstat() -> Result<Vec<Socket>, ExecError> {
    let output = run_netstat()?;
    let sockets = output
        .lines()
        .filter(|line| line.contains("LISTEN"))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 || !fields[0].starts_with("tcp") {
                return None;
            }
            let (addr, port) = parse_netstat_addr(fields[3]);
            if addr.is_empty() && port == 0 {
                return None;
            }
            Some(Socket { inode: format!("{addr}:{port}"), port, address: addr })
        })
        .collect();
    Ok(sockets)
}

/// Every socket state currently observed on `port`, with diagnoses attached.
pub fn socket_states(port: u16) -> Result<Vec<SocketInfo>, ExecError> {
    let output = run_netstat()?;
    Ok(parse_netstat_rows(&output)
        .into_iter()
        .filter(|(_, p, _)| *p == port)
        .map(|(addr, port, state)| describe(addr, port, state))
        .collect())
}

/// The single most relevant state on `port`: anything problematic (not
/// LISTEN) wins over a healthy listener when both are present.
pub fn socket_state_for_port(port: u16) -> Option<SocketInfo> {
    let states = socket_states(port).ok()?;
    states
        .iter()
        .find(|s| s.state != SocketState::Listen)
        .or_else(|| states.first())
        .cloned()
}

fn describe(local_addr: String, port: u16, state: SocketState) -> SocketInfo {
    let (explanation, workaround) = match state {
        SocketState::Listen => ("Accepting new connections", ""),
        SocketState::Established => ("Active connection with a remote peer", ""),
        SocketState::TimeWait => (
            "Connection closed recently; the kernel holds the port before reuse",
            "Wait up to 2xMSL, or have the binding process set SO_REUSEADDR",
        ),
        SocketState::CloseWait => (
            "Peer closed the connection but the local process has not",
            "Often a descriptor leak; restart the owning process",
        ),
        SocketState::FinWait1 | SocketState::FinWait2 => {
            ("Local side closed; waiting for the peer to acknowledge", "")
        }
        SocketState::SynSent => ("Connection attempt in flight, no reply yet", ""),
        SocketState::SynReceived => ("Handshake in progress", ""),
        SocketState::Closing => ("Both sides closing simultaneously", ""),
        SocketState::LastAck => ("Waiting for the final close acknowledgment", ""),
        SocketState::Unknown => ("Unrecognized socket state", ""),
    };

    SocketInfo {
        local_addr,
        port,
        state,
        explanation: explanation.to_string(),
        workaround: workaround.to_string(),
    }
}

/// Maximum segment lifetime in milliseconds, from sysctl when available.
pub fn msl_duration_ms() -> u64 {
    match exec::run_text("sysctl", &["-n", "net.inet.tcp.msl"]) {
        Ok(out) => out.trim().parse().unwrap_or(30_000),
        Err(err) => {
            debug!("sysctl net.inet.tcp.msl unavailable: {err}");
            30_000
        }
    }
}

/// Human description of how long a TIME_WAIT socket can linger.
pub fn time_wait_remaining() -> &'static str {
    if cfg!(target_os = "macos") {
        "up to 60s remaining (macOS default)"
    } else {
        "up to 60s remaining (2xMSL)"
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
