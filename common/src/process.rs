//! External-process invocation.
//!
//! Every OS side effect (service manager, display power, `pkill`, screenshot
//! tools, `pgrep`) goes through [`ProcessRunner`], so callers get a typed
//! [`CommandError`] instead of an exception and tests can substitute a
//! recording runner.

use std::{fmt, process::Stdio, time::Duration};

use async_trait::async_trait;

use crate::error::CommandError;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest process name the kernel keeps in `comm`; `pgrep`/`pkill` match
/// against that field.
pub const COMM_LEN: usize = 15;

/// `name` cut to what `pgrep` and `pkill` can see, so `chromium-browser`
/// still matches the running `chromium-browse`.
pub fn comm_pattern(name: &str) -> &str {
    if name.len() <= COMM_LEN {
        return name;
    }
    let mut end = COMM_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// A program, its arguments and any extra environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Builds an invocation from a configured command prefix such as
    /// `["sudo", "systemctl"]`. Returns `None` for an empty prefix.
    pub fn from_prefix(prefix: &[String]) -> Option<Self> {
        let (program, args) = prefix.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs to completion or until `timeout`, whichever comes first. A
    /// non-zero exit is reported in the output, not as an error.
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError>;

    /// Starts the program and returns immediately; the child is never
    /// awaited.
    fn spawn_detached(&self, invocation: &Invocation) -> Result<Option<u32>, CommandError>;

    /// Like [`ProcessRunner::run`], but a non-zero exit is an error.
    async fn run_checked(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let output = self.run(invocation, timeout).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(CommandError::Failed {
                program: invocation.program.clone(),
                code: output.code,
                stderr: output.stderr,
            })
        }
    }

    /// `pgrep <name>`; any failure counts as not running.
    async fn is_running(&self, name: &str) -> bool {
        let lookup = Invocation::new("pgrep").arg(comm_pattern(name));
        matches!(self.run(&lookup, LOOKUP_TIMEOUT).await, Ok(output) if output.success())
    }

    /// `pkill -9 <name>`. Exit code 1 means nothing matched.
    async fn kill_by_name(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let kill = Invocation::new("pkill").args(["-9", comm_pattern(name)]);
        self.run(&kill, timeout).await
    }

    async fn command_exists(&self, name: &str) -> bool {
        let lookup = Invocation::new("which").arg(name);
        matches!(self.run(&lookup, LOOKUP_TIMEOUT).await, Ok(output) if output.success())
    }
}

/// Runs invocations as real child processes via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRunner;

impl HostRunner {
    fn command(invocation: &Invocation) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null());
        command
    }
}

#[async_trait]
impl ProcessRunner for HostRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let child = Self::command(invocation)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output.into()),
            Ok(Err(source)) => Err(CommandError::Wait {
                program: invocation.program.clone(),
                source,
            }),
            Err(_) => Err(CommandError::Timeout {
                program: invocation.program.clone(),
                timeout,
            }),
        }
    }

    fn spawn_detached(&self, invocation: &Invocation) -> Result<Option<u32>, CommandError> {
        let child = Self::command(invocation)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;
        Ok(child.id())
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    type Responder = dyn Fn(&Invocation) -> Result<CommandOutput, CommandError> + Send + Sync;

    /// Records every invocation and answers from a closure instead of
    /// touching the OS.
    pub struct ScriptedRunner {
        responder: Box<Responder>,
        calls: Mutex<Vec<Invocation>>,
        detached: Mutex<Vec<Invocation>>,
        fail_detached: bool,
    }

    impl ScriptedRunner {
        pub fn new<F>(responder: F) -> Self
        where
            F: Fn(&Invocation) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
        {
            Self {
                responder: Box::new(responder),
                calls: Mutex::new(Vec::new()),
                detached: Mutex::new(Vec::new()),
                fail_detached: false,
            }
        }

        pub fn succeeding() -> Self {
            Self::new(|_| exit(0))
        }

        pub fn failing_detached(mut self) -> Self {
            self.fail_detached = true;
            self
        }

        pub fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }

        /// Recorded invocations rendered as command lines.
        pub fn call_lines(&self) -> Vec<String> {
            self.calls().iter().map(ToString::to_string).collect()
        }

        pub fn detached(&self) -> Vec<Invocation> {
            self.detached.lock().unwrap().clone()
        }
    }

    pub fn exit(code: i32) -> Result<CommandOutput, CommandError> {
        Ok(CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: if code == 0 {
                String::new()
            } else {
                format!("exit {code}")
            },
        })
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(
            &self,
            invocation: &Invocation,
            _timeout: Duration,
        ) -> Result<CommandOutput, CommandError> {
            self.calls.lock().unwrap().push(invocation.clone());
            (self.responder)(invocation)
        }

        fn spawn_detached(&self, invocation: &Invocation) -> Result<Option<u32>, CommandError> {
            self.detached.lock().unwrap().push(invocation.clone());
            if self.fail_detached {
                return Err(CommandError::Spawn {
                    program: invocation.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                });
            }
            Ok(None)
        }
    }
}
