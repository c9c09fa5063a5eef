//! External command execution.
//!
//! Every command captures stdout and stderr, so a failing tool is reported
//! with its own diagnostics instead of a bare exit code.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use crate::error::{BundleError, Result};

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    /// Name reported in errors instead of the program path.
    display_name: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            display_name: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Set environment variables on top of the inherited environment.
    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Name used for this command in error messages.
    pub fn display_name(mut self, name: impl AsRef<str>) -> Self {
        self.display_name = Some(name.as_ref().to_string());
        self
    }

    /// Run the command and capture output.
    ///
    /// A program that cannot be started is [`BundleError::ToolLaunch`]; a
    /// non-zero exit is [`BundleError::ToolFailed`].
    pub fn run(self) -> Result<CommandResult> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .output()
            .map_err(|source| BundleError::ToolLaunch {
                program: self.program.clone(),
                source,
            })?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            return Err(BundleError::ToolFailed {
                program: self.display_name.unwrap_or(self.program),
                code: result.code(),
                stderr: result.stderr_trimmed().to_string(),
            });
        }

        Ok(result)
    }
}

/// Find `program` in a `:`-separated search path, ignoring `$PATH`.
pub fn which_in(program: &str, search_path: impl AsRef<OsStr>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    which::which_in(program, Some(search_path), cwd).ok()
}
