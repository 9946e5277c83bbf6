//! Error taxonomy for the analysis engine.
//!
//! Inner probe layers degrade unreadable facts to benign defaults; only
//! identity-level failures (no such process, nothing listening, total loss
//! of enumeration) surface as typed errors.

use thiserror::Error;

/// Failure running an external helper command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command not found: {0}")]
    NotFound(String),
    #[error("{program} exited with status {status}")]
    NonZeroExit { program: String, status: i32 },
    #[error("i/o error running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// True when the helper binary itself is missing (triggers fallbacks).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecError::NotFound(_))
    }
}

/// Failure reading platform facts for a process.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no such process: {0}")]
    NotFound(u32),
    #[error("process table unavailable: {0}")]
    Enumeration(String),
}

/// Failure resolving a target selector to PIDs.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid {what}: {value:?}")]
    InvalidSelector { what: &'static str, value: String },
    #[error("no such process: {0}")]
    NotFound(String),
    #[error("nothing is listening on port {0}")]
    NoListener(u16),
    #[error("no process matching {0:?} found")]
    NoMatch(String),
    #[error(transparent)]
    Enumeration(#[from] ProbeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_error_not_found_detection() {
        assert!(ExecError::NotFound("lsof".into()).is_not_found());
        let err = ExecError::NonZeroExit { program: "ps".into(), status: 1 };
        assert!(!err.is_not_found());
    }

    #[test]
    fn resolve_error_messages() {
        let err = ResolveError::NoListener(80);
        assert_eq!(err.to_string(), "nothing is listening on port 80");
        let err = ResolveError::InvalidSelector { what: "pid", value: "abc".into() };
        assert!(err.to_string().contains("abc"));
    }
}
