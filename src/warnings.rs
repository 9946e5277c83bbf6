//! Warning synthesis: advisories derived from the collected facts.
//!
//! Each rule emits at most one string. The env rules are pure functions of
//! the environment multiset so repeated runs of the same snapshot produce
//! identical output.

use std::collections::{BTreeSet, HashMap};

use chrono::Local;

use crate::probe;
use crate::types::{Health, ProcState, Process};

const SUSPICIOUS_WORKDIRS: &[&str] = &["/tmp", "/var/tmp", "/dev/shm"];

const ANCIENT_DAYS: i64 = 90;

/// How many ancestors sharing one command suggest a respawn cycle.
const RESTART_LOOP_THRESHOLD: usize = 5;

/// Derive advisories from an ancestry chain (init-first, target last).
pub fn synthesize(ancestry: &[Process]) -> Vec<String> {
    let mut warnings = Vec::new();
    let Some(target) = ancestry.last() else {
        return warnings;
    };

    if ancestry
        .iter()
        .any(|p| p.health == Health::Zombie || p.state == ProcState::Zombie)
    {
        warnings.push("Process is a zombie".to_string());
    }

    if target.user == "root" {
        warnings.push("Running as root".to_string());
    }

    if probe::is_public_bind(&target.bind_addresses) {
        warnings.push("Listening on public interface".to_string());
    }

    if SUSPICIOUS_WORKDIRS.iter().any(|d| target.working_dir.starts_with(d)) {
        warnings.push("Suspicious working directory".to_string());
    }

    match target.health {
        Health::Stopped => warnings.push("Process is stopped".to_string()),
        Health::HighCpu => warnings.push("High CPU usage".to_string()),
        Health::HighMem => warnings.push("High memory usage".to_string()),
        _ => {}
    }

    if !target.container.is_empty() {
        warnings.push("Container without healthcheck".to_string());
    }

    if !target.service.is_empty()
        && !target.command.is_empty()
        && !target.service.to_lowercase().contains(&target.command.to_lowercase())
    {
        warnings.push("Service/command name mismatch".to_string());
    }

    if let Some(started) = target.started_at {
        if (Local::now() - started).num_days() > ANCIENT_DAYS {
            warnings.push(format!("Process older than {ANCIENT_DAYS} days"));
        }
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for p in ancestry {
        if !p.command.is_empty() {
            *counts.entry(p.command.as_str()).or_default() += 1;
        }
    }
    if counts.values().any(|&n| n >= RESTART_LOOP_THRESHOLD) {
        warnings.push("Possible restart loop".to_string());
    }

    warnings.extend(env_suspicious_warnings(&target.env));

    warnings
}

/// Library-injection advisories from environment assignments.
///
/// Deterministic over the input multiset: DYLD keys are de-duplicated and
/// emitted in ascending order. Empty values are not injections.
pub fn env_suspicious_warnings(env: &[String]) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut dyld_keys: BTreeSet<&str> = BTreeSet::new();
    let mut ld_preload = false;

    for entry in env {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        if key == "LD_PRELOAD" {
            ld_preload = true;
        } else if key.starts_with("DYLD_") {
            dyld_keys.insert(key);
        }
    }

    if ld_preload {
        warnings.push("Process sets LD_PRELOAD (potential library injection)".to_string());
    }
    if !dyld_keys.is_empty() {
        let keys: Vec<&str> = dyld_keys.into_iter().collect();
        warnings.push(format!(
            "Process sets DYLD_* variables (potential library injection): {}",
            keys.join(", ")
        ));
    }

    warnings
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn target(mutate: impl FnOnce(&mut Process)) -> Vec<Process> {
        let mut p = Process {
            pid: 500,
            ppid: 100,
            command: "myapp".to_string(),
            user: "bob".to_string(),
            working_dir: "/home/bob".to_string(),
            ..Process::default()
        };
        mutate(&mut p);
        vec![
            Process { pid: 100, command: "bash".to_string(), ..Process::default() },
            p,
        ]
    }

    fn has(warnings: &[String], needle: &str) -> bool {
        warnings.iter().any(|w| w.to_lowercase().contains(&needle.to_lowercase()))
    }

    #[test]
    fn zombie_anywhere_in_chain() {
        let w = synthesize(&target(|p| p.health = Health::Zombie));
        assert!(has(&w, "zombie"));

        let mut chain = target(|_| {});
        chain[0].state = ProcState::Zombie;
        assert!(has(&synthesize(&chain), "zombie"));
    }

    #[test]
    fn root_user() {
        let w = synthesize(&target(|p| p.user = "root".to_string()));
        assert!(has(&w, "root"));
    }

    #[test]
    fn public_bind() {
        let w = synthesize(&target(|p| {
            p.bind_addresses = vec!["0.0.0.0".to_string()];
            p.listening_ports = vec![8080];
        }));
        assert!(has(&w, "public"));

        let w = synthesize(&target(|p| {
            p.bind_addresses = vec!["127.0.0.1".to_string()];
        }));
        assert!(!has(&w, "public"));
    }

    #[test]
    fn suspicious_workdirs() {
        for dir in ["/tmp", "/tmp/x", "/var/tmp/y", "/dev/shm/z"] {
            let w = synthesize(&target(|p| p.working_dir = dir.to_string()));
            assert!(has(&w, "suspicious"), "for {dir}");
        }
        let w = synthesize(&target(|p| p.working_dir = "/home/bob/tmp".to_string()));
        assert!(!has(&w, "suspicious"));
    }

    #[test]
    fn health_advisories() {
        assert!(has(&synthesize(&target(|p| p.health = Health::Stopped)), "stopped"));
        assert!(has(&synthesize(&target(|p| p.health = Health::HighCpu)), "CPU"));
        assert!(has(&synthesize(&target(|p| p.health = Health::HighMem)), "memory"));
    }

    #[test]
    fn container_without_healthcheck() {
        let w = synthesize(&target(|p| p.container = "docker".to_string()));
        assert!(has(&w, "healthcheck"));
    }

    #[test]
    fn service_name_mismatch() {
        let w = synthesize(&target(|p| p.service = "other.service".to_string()));
        assert!(has(&w, "mismatch"));

        let w = synthesize(&target(|p| p.service = "com.test.myapp".to_string()));
        assert!(!has(&w, "mismatch"));
    }

    #[test]
    fn ancient_process() {
        let w = synthesize(&target(|p| {
            p.started_at = Some(Local::now() - Duration::days(100));
        }));
        assert!(has(&w, "90"));

        let w = synthesize(&target(|p| {
            p.started_at = Some(Local::now() - Duration::days(10));
        }));
        assert!(!has(&w, "90"));
    }

    #[test]
    fn restart_loop() {
        let mut chain: Vec<Process> = (0..7)
            .map(|i| Process {
                pid: 100 + i,
                command: "app".to_string(),
                ..Process::default()
            })
            .collect();
        chain.last_mut().unwrap().user = "bob".to_string();
        assert!(has(&synthesize(&chain), "restart"));

        assert!(!has(&synthesize(&target(|_| {})), "restart"));
    }

    #[test]
    fn empty_chain_is_silent() {
        assert!(synthesize(&[]).is_empty());
    }

    #[test]
    fn ld_preload_exact_string() {
        let w = synthesize(&target(|p| {
            p.env = vec!["LD_PRELOAD=/tmp/x.so".to_string()];
        }));
        assert!(w.contains(&"Process sets LD_PRELOAD (potential library injection)".to_string()));
    }

    #[test]
    fn dyld_keys_sorted_and_distinct() {
        let env = vec![
            "DYLD_LIBRARY_PATH=/tmp".to_string(),
            "DYLD_INSERT_LIBRARIES=/tmp/inject.dylib".to_string(),
            "DYLD_INSERT_LIBRARIES=/tmp/other.dylib".to_string(),
        ];
        let w = env_suspicious_warnings(&env);
        assert_eq!(
            w,
            vec![
                "Process sets DYLD_* variables (potential library injection): DYLD_INSERT_LIBRARIES, DYLD_LIBRARY_PATH"
            ]
        );
    }

    #[test]
    fn empty_injection_values_ignored() {
        let env = vec!["LD_PRELOAD=".to_string(), "DYLD_INSERT_LIBRARIES=".to_string()];
        assert!(env_suspicious_warnings(&env).is_empty());
    }

    #[test]
    fn env_warnings_are_deterministic() {
        let env = vec![
            "DYLD_B=/x".to_string(),
            "DYLD_A=/y".to_string(),
            "LD_PRELOAD=/z.so".to_string(),
        ];
        let first = env_suspicious_warnings(&env);
        for _ in 0..10 {
            assert_eq!(env_suspicious_warnings(&env), first);
        }

        let mut reversed = env.clone();
        reversed.reverse();
        assert_eq!(env_suspicious_warnings(&reversed), first);
    }
}
