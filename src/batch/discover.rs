//! Candidate discovery for batch analysis.

use crate::error::ResolveError;
use crate::target;

/// Every PID whose command or arguments contain `pattern`
/// (case-insensitive substring, not a regex).
///
/// The analyzer's own PID and parent are never returned, and `grep` lines
/// and the tool's own invocations are filtered out. Unlike name
/// resolution there is no service fallback and no ambiguity handling:
/// all matches come back.
pub fn discover_pids(pattern: &str) -> Result<Vec<u32>, ResolveError> {
    target::discover(pattern)
}
