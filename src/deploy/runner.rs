//! External process invocation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{debug, trace};

use crate::error::ProcessError;

/// Lines of stderr kept in failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// A fully specified process invocation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Program to run.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory; the current one when unset.
    pub cwd: Option<PathBuf>,
    /// Environment overrides on top of the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    /// Creates an invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Builds an invocation from a command line such as `["npm", "run", "build"]`.
    ///
    /// Returns `None` for an empty command.
    #[must_use]
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Sets an environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
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

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ProcessOutput {
    /// Returns true if the process exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Converts an unsuccessful exit into an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Exit`] with the stderr tail if the exit was
    /// not successful.
    pub fn check(self, program: &str) -> Result<Self, ProcessError> {
        if self.success() {
            return Ok(self);
        }
        Err(ProcessError::Exit {
            program: program.to_string(),
            code: self.code,
            stderr: tail(&self.stderr, STDERR_TAIL_LINES),
        })
    }
}

/// Runs external processes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the invocation to completion and captures its output.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Spawn`] if the process cannot be started. A
    /// non-zero exit is reported through [`ProcessOutput::code`].
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError>;
}

/// Runs processes on the local machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        debug!("Running: {invocation}");

        let mut command = tokio::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }

        let output = command.output().await.map_err(|source| ProcessError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let result = ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!("'{}' exited with {:?}", invocation.program, result.code);
        Ok(result)
    }
}

/// Last `lines` lines of `text`.
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_from_command() {
        let command = vec![String::from("npm"), String::from("run"), String::from("build")];
        let invocation = Invocation::from_command(&command)
            .expect("non-empty")
            .current_dir("/srv/bridge")
            .env("CI", "1");
        assert_eq!(invocation.program, "npm");
        assert_eq!(invocation.to_string(), "npm run build");
        assert!(Invocation::from_command(&[]).is_none());
    }

    #[test]
    fn test_debug_hides_env_values() {
        let invocation = Invocation::new("npx").env("CLOUDFLARE_API_TOKEN", "secret-value");
        let rendered = format!("{invocation:?}");
        assert!(rendered.contains("CLOUDFLARE_API_TOKEN"));
        assert!(!rendered.contains("secret-value"));
    }

    #[test]
    fn test_check_keeps_stderr_tail() {
        let stderr = (1..=30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let output = ProcessOutput {
            code: Some(2),
            stdout: String::new(),
            stderr,
        };
        match output.check("npm") {
            Err(ProcessError::Exit { code, stderr, .. }) => {
                assert_eq!(code, Some(2));
                assert!(stderr.starts_with("line 11"));
                assert!(stderr.ends_with("line 30"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_process_runner_reports_spawn_failure() {
        let result = ProcessRunner
            .run(&Invocation::new("edgeship-definitely-missing-binary"))
            .await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }
}
