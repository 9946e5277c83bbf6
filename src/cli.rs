use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::types::Target;

#[derive(Parser)]
#[command(name = "witr")]
#[command(version, about = "Why is this running? Trace any process back to whatever started it.")]
pub struct Cli {
    /// PID, port, or name pattern (auto-detected)
    pub query: Option<String>,

    /// Target a specific PID
    #[arg(long, conflicts_with_all = ["port", "name", "service", "query"])]
    pub pid: Option<String>,

    /// Target whatever is listening on a TCP port
    #[arg(long, conflicts_with_all = ["name", "service", "query"])]
    pub port: Option<String>,

    /// Target processes by name pattern
    #[arg(long, conflicts_with_all = ["service", "query"])]
    pub name: Option<String>,

    /// Target an init-service label (launchd/systemd)
    #[arg(long, conflicts_with = "query")]
    pub service: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// One-line ancestry chain
    #[arg(long)]
    pub short: bool,

    /// Indented ancestry tree only
    #[arg(long)]
    pub tree: bool,

    /// Command line and environment only
    #[arg(long)]
    pub env: bool,

    /// Disable colors
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List every process matching a pattern, with source and resource info
    Ps {
        /// Substring to match against command names and arguments
        pattern: String,

        /// Sort buffered output instead of streaming
        #[arg(long, value_enum)]
        sort: Option<SortKey>,

        /// Live dashboard with periodic refresh
        #[arg(long)]
        watch: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortKey {
    Cpu,
    Mem,
    Age,
    Pid,
}

/// How the positional selector should be tried, in order.
#[derive(Debug, PartialEq)]
pub enum Selector {
    /// Explicit selectors and non-ambiguous positional values.
    One(Target),
    /// A small number that could be either a listening port or a PID:
    /// try the port first, fall back to the PID.
    PortThenPid(u16),
}

impl Cli {
    /// The selector this invocation asks for, if any.
    pub fn selector(&self) -> Option<Selector> {
        if let Some(pid) = &self.pid {
            return Some(Selector::One(Target::pid(pid.clone())));
        }
        if let Some(port) = &self.port {
            return Some(Selector::One(Target::port(port.clone())));
        }
        if let Some(name) = &self.name {
            return Some(Selector::One(Target::name(name.clone())));
        }
        if let Some(service) = &self.service {
            return Some(Selector::One(Target::service(service.clone())));
        }

        let query = self.query.as_deref()?;
        if let Ok(port) = query.parse::<u16>() {
            return Some(Selector::PortThenPid(port));
        }
        if query.parse::<u64>().is_ok() {
            // Too large for a port; can only be a PID.
            return Some(Selector::One(Target::pid(query)));
        }
        Some(Selector::One(Target::name(query)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetKind;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("args should parse")
    }

    #[test]
    fn positional_number_tries_port_first() {
        let cli = parse(&["witr", "8080"]);
        assert_eq!(cli.selector(), Some(Selector::PortThenPid(8080)));
    }

    #[test]
    fn large_number_is_a_pid() {
        let cli = parse(&["witr", "70000"]);
        match cli.selector() {
            Some(Selector::One(t)) => {
                assert_eq!(t.kind, TargetKind::Pid);
                assert_eq!(t.value, "70000");
            }
            other => panic!("unexpected selector: {other:?}"),
        }
    }

    #[test]
    fn text_is_a_name_pattern() {
        let cli = parse(&["witr", "node"]);
        match cli.selector() {
            Some(Selector::One(t)) => assert_eq!(t.kind, TargetKind::Name),
            other => panic!("unexpected selector: {other:?}"),
        }
    }

    #[test]
    fn explicit_flags_win() {
        let cli = parse(&["witr", "--pid", "1234"]);
        match cli.selector() {
            Some(Selector::One(t)) => {
                assert_eq!(t.kind, TargetKind::Pid);
                assert_eq!(t.value, "1234");
            }
            other => panic!("unexpected selector: {other:?}"),
        }

        let cli = parse(&["witr", "--service", "com.apple.Safari"]);
        match cli.selector() {
            Some(Selector::One(t)) => assert_eq!(t.kind, TargetKind::Service),
            other => panic!("unexpected selector: {other:?}"),
        }
    }

    #[test]
    fn no_selector_when_nothing_given() {
        let cli = parse(&["witr"]);
        assert!(cli.selector().is_none());
    }

    #[test]
    fn conflicting_selectors_rejected() {
        assert!(Cli::try_parse_from(["witr", "--pid", "1", "--port", "80"]).is_err());
        assert!(Cli::try_parse_from(["witr", "node", "--pid", "1"]).is_err());
    }

    #[test]
    fn ps_subcommand_parses() {
        let cli = parse(&["witr", "ps", "node", "--sort", "cpu"]);
        match cli.command {
            Some(Commands::Ps { ref pattern, sort, watch }) => {
                assert_eq!(pattern, "node");
                assert_eq!(sort, Some(SortKey::Cpu));
                assert!(!watch);
            }
            _ => panic!("expected ps subcommand"),
        }
    }
}
