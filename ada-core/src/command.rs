//! CLI command builder used by every backend that shells out
//! (`docker`, `virsh`, `virt-clone`, `openstack`, `ssh`).
//!
//! Commands run synchronously through duct; the `*_async` variants move the
//! blocking call onto tokio's blocking pool so polling tasks never stall the
//! runtime.

use crate::error::{CoreError, Result};
use duct::cmd;
use std::process::Output;
use tracing::{debug, warn};
use which::which;

/// Builder for an external command with captured output and consistent errors.
#[derive(Debug, Clone)]
pub struct CliCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CliCommand {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
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

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Command line for logs. Environment values are never included since
    /// they carry credentials.
    pub fn describe(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run and return the raw process output, whatever the exit status.
    pub fn execute_raw(self) -> Result<Output> {
        debug!(command = %self.describe(), "executing");
        let mut expression = cmd(&self.program, &self.args);
        for (key, value) in &self.env {
            expression = expression.env(key, value);
        }

        expression
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CoreError::Dependency(self.program.clone())
                } else {
                    CoreError::Command(format!("failed to start '{}': {}", self.describe(), e))
                }
            })
    }

    /// Run and return stdout; a non-zero exit is an error carrying stderr.
    pub fn output(self) -> Result<String> {
        let line = self.describe();
        let output = self.execute_raw()?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(command = %line, status = %output.status, "command failed: {}", stderr.trim());
            Err(CoreError::Command(format!(
                "'{}' exited with {}: {}",
                line,
                output.status,
                stderr.trim()
            )))
        }
    }

    /// Run for its side effect only.
    pub fn execute(self) -> Result<()> {
        self.output().map(|_| ())
    }

    /// Run and parse stdout as JSON (`openstack ... -f json`).
    pub fn output_json(self) -> Result<serde_json::Value> {
        let stdout = self.output()?;
        Ok(serde_json::from_str(&stdout)?)
    }

    pub async fn output_async(self) -> Result<String> {
        let line = self.describe();
        tokio::task::spawn_blocking(move || self.output())
            .await
            .map_err(|e| CoreError::Command(format!("'{}' task failed: {}", line, e)))?
    }

    pub async fn execute_async(self) -> Result<()> {
        self.output_async().await.map(|_| ())
    }

    pub async fn output_json_async(self) -> Result<serde_json::Value> {
        let stdout = self.output_async().await?;
        Ok(serde_json::from_str(&stdout)?)
    }
}

/// Checks if a command-line tool is available in the system's PATH.
pub fn is_tool_installed(tool_name: &str) -> bool {
    which(tool_name).is_ok()
}

/// Fail with [`CoreError::Dependency`] when `tool_name` is not on PATH.
pub fn require_tool(tool_name: &str) -> Result<()> {
    if is_tool_installed(tool_name) {
        Ok(())
    } else {
        Err(CoreError::Dependency(tool_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_omits_environment() {
        let command = CliCommand::new("openstack")
            .args(["server", "show", "vm-1", "-f", "json"])
            .env("OS_PASSWORD", "hunter2");

        assert_eq!(command.describe(), "openstack server show vm-1 -f json");
        assert!(!command.describe().contains("hunter2"));
    }

    #[test]
    fn test_missing_program_is_dependency_error() {
        let result = CliCommand::new("ada-definitely-not-a-real-binary").output();
        assert!(matches!(result, Err(CoreError::Dependency(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_output_captures_stdout() {
        let out = CliCommand::new("sh")
            .args(["-c", "echo hello"])
            .output()
            .expect("sh should run");
        assert_eq!(out.trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_carries_stderr() {
        let err = CliCommand::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .output()
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("boom"), "{message}");
    }

    #[cfg(unix)]
    #[test]
    fn test_env_is_passed() {
        let out = CliCommand::new("sh")
            .args(["-c", "printf %s \"$ADA_TEST_VAR\""])
            .env("ADA_TEST_VAR", "value")
            .output()
            .expect("sh should run");
        assert_eq!(out, "value");
    }
}
