//! External helper command execution.
//!
//! Everything the probes learn from `ps`, `lsof`, `netstat`, `launchctl`,
//! `pmset` and friends flows through a single process-wide [`Executor`].
//! Implementations capture stdout and never interpret it; parsing lives in
//! callers. Tests swap in a scripted executor under a serializing lock.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::process::Command;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, RwLock};

use crate::error::ExecError;

pub trait Executor: Send + Sync {
    /// Run `program` with `args`, returning captured stdout on success.
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, ExecError>;

    /// Variant with an overridden environment. The default implementation
    /// ignores the override; `SystemExecutor` honors it.
    fn run_with_env(
        &self,
        program: &str,
        args: &[&str],
        _env: &[(&str, &str)],
    ) -> Result<Vec<u8>, ExecError> {
        self.run(program, args)
    }
}

/// Production executor over `std::process::Command`.
pub struct SystemExecutor;

impl SystemExecutor {
    fn capture(&self, program: &str, cmd: &mut Command) -> Result<Vec<u8>, ExecError> {
        let output = cmd.output().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ExecError::NotFound(program.to_string())
            } else {
                ExecError::Io { program: program.to_string(), source: e }
            }
        })?;

        if !output.status.success() {
            return Err(ExecError::NonZeroExit {
                program: program.to_string(),
                status: output.status.code().unwrap_or(-1),
            });
        }

        Ok(output.stdout)
    }
}

impl Executor for SystemExecutor {
    fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, ExecError> {
        self.capture(program, Command::new(program).args(args))
    }

    fn run_with_env(
        &self,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<Vec<u8>, ExecError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        for (k, v) in env {
            cmd.env(k, v);
        }
        self.capture(program, &mut cmd)
    }
}

static EXECUTOR: LazyLock<RwLock<Arc<dyn Executor>>> =
    LazyLock::new(|| RwLock::new(Arc::new(SystemExecutor)));

/// Run a helper through the installed executor.
pub fn run(program: &str, args: &[&str]) -> Result<Vec<u8>, ExecError> {
    let exec = Arc::clone(&EXECUTOR.read().unwrap());
    exec.run(program, args)
}

/// Like [`run`] but decodes stdout as lossy UTF-8.
pub fn run_text(program: &str, args: &[&str]) -> Result<String, ExecError> {
    run(program, args).map(|out| String::from_utf8_lossy(&out).into_owned())
}

/// Install a replacement executor. Production installs one at startup;
/// tests swap freely while holding [`test_lock`].
pub fn set_executor(executor: Arc<dyn Executor>) {
    *EXECUTOR.write().unwrap() = executor;
}

/// Restore the real system executor.
pub fn reset_executor() {
    set_executor(Arc::new(SystemExecutor));
}

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Serialize tests that swap the process-wide executor.
pub fn test_lock() -> MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted executor for tests: canned stdout keyed by exact invocation.
pub mod mock {
    use super::*;

    type Invocation = (String, Vec<String>);

    #[derive(Default)]
    pub struct MockExecutor {
        replies: HashMap<Invocation, Result<Vec<u8>, String>>,
        calls: Mutex<Vec<Invocation>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Script a successful reply for an exact `program args...` call.
        pub fn on(mut self, program: &str, args: &[&str], stdout: &str) -> Self {
            self.replies.insert(
                (program.to_string(), args.iter().map(|s| s.to_string()).collect()),
                Ok(stdout.as_bytes().to_vec()),
            );
            self
        }

        /// Script a failure for an exact invocation.
        pub fn fail(mut self, program: &str, args: &[&str]) -> Self {
            self.replies.insert(
                (program.to_string(), args.iter().map(|s| s.to_string()).collect()),
                Err(program.to_string()),
            );
            self
        }

        /// Install this mock as the process-wide executor.
        pub fn install(self) -> Arc<Self> {
            let mock = Arc::new(self);
            set_executor(Arc::clone(&mock) as Arc<dyn Executor>);
            mock
        }

        pub fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Executor for MockExecutor {
        fn run(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, ExecError> {
            let key: Invocation =
                (program.to_string(), args.iter().map(|s| s.to_string()).collect());
            self.calls.lock().unwrap().push(key.clone());

            match self.replies.get(&key) {
                Some(Ok(out)) => Ok(out.clone()),
                Some(Err(program)) => Err(ExecError::NonZeroExit {
                    program: program.clone(),
                    status: 1,
                }),
                // Unscripted helpers behave as missing, exercising fallbacks.
                None => Err(ExecError::NotFound(program.to_string())),
            }
        }
    }
}
