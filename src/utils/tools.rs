// dbvault/src/utils/tools.rs
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use which::which;

/// Outcome of an external tool that did not complete successfully.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} executable not found in PATH")]
    NotFound { tool: String },

    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        code: Option<i32>,
        status: String,
        stderr: String,
    },

    #[error("{tool} timed out after {}s", .timeout.as_secs())]
    TimedOut { tool: String, timeout: Duration },
}

#[derive(Debug, Clone)]
enum ToolArg {
    Plain(OsString),
    /// Never echoed in logs or error messages.
    Secret(OsString),
}

/// A single invocation of an external command-line tool.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<ToolArg>,
    envs: Vec<(String, String)>,
    stdout_file: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            stdout_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(ToolArg::Plain(arg.into()));
        self
    }

    pub fn secret_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(ToolArg::Secret(arg.into()));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Redirects stdout of the tool into `path` instead of capturing it.
    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout_file = Some(path.to_path_buf());
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            match arg {
                ToolArg::Plain(value) => write!(f, " {}", value.to_string_lossy())?,
                ToolArg::Secret(_) => write!(f, " ***")?,
            }
        }
        if let Some(path) = &self.stdout_file {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external tools and turns their exit status into a [`ToolError`].
#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    timeout: Option<Duration>,
}

impl ToolRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn locate(&self, tool: &str) -> Result<PathBuf, ToolError> {
        which(tool).map_err(|_| ToolError::NotFound {
            tool: tool.to_string(),
        })
    }

    pub async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ToolError> {
        let tool = command.program.clone();
        let program = self.locate(&tool)?;
        log::trace!(target: "tools", "Running: {command}");

        let mut process = Command::new(&program);
        for arg in &command.args {
            match arg {
                ToolArg::Plain(value) | ToolArg::Secret(value) => process.arg(value),
            };
        }
        process
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match &command.stdout_file {
            Some(path) => {
                let file = std::fs::File::create(path).map_err(|source| ToolError::Spawn {
                    tool: tool.clone(),
                    source,
                })?;
                process.stdout(Stdio::from(file));
            }
            None => {
                process.stdout(Stdio::piped());
            }
        }

        let child = process.spawn().map_err(|source| ToolError::Spawn {
            tool: tool.clone(),
            source,
        })?;

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ToolError::TimedOut {
                    tool: tool.clone(),
                    timeout: limit,
                })?,
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|source| ToolError::Spawn {
            tool: tool.clone(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        if !output.status.success() {
            return Err(ToolError::Failed {
                tool,
                code: output.status.code(),
                status: output.status.to_string(),
                stderr,
            });
        }

        // relay stderr
        if !stderr.is_empty() {
            log::warn!(target: "tools", "{tool}: {stderr}");
        }

        Ok(ToolOutput { stdout, stderr })
    }
}
