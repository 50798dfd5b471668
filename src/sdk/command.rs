//! The `run_os_command` tool: host shell execution requested by the model.

use schemars::JsonSchema;
use serde::Deserialize;

use super::tools::ToolRegistry;
use crate::Error;

pub const RUN_OS_COMMAND: &str = "run_os_command";

/// Which commands the model may run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CommandPolicy {
    /// Anything goes. Every execution is logged at warn.
    #[default]
    Unrestricted,
    /// The first whitespace-separated token must be one of these programs.
    AllowList(Vec<String>),
}

impl CommandPolicy {
    /// # Errors
    /// Returns the rejected program name.
    pub fn check<'a>(&self, command: &'a str) -> Result<(), &'a str> {
        match self {
            Self::Unrestricted => Ok(()),
            Self::AllowList(programs) => {
                let program = command.split_whitespace().next().unwrap_or_default();
                if programs.iter().any(|allowed| allowed == program) {
                    Ok(())
                } else {
                    Err(program)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunOsCommandArgs {
    /// The OS system command to execute.
    pub command: String,
}

#[must_use]
pub fn tool_description(device: &str) -> String {
    format!("Execute an OS system command on the {device}. For example: #open -a 'Google Chrome'")
}

/// Register `run_os_command` for `device` under `policy`. Blank commands are refused.
pub fn register(tools: &mut ToolRegistry, device: &str, policy: CommandPolicy) {
    tools.tool_with_description(RUN_OS_COMMAND, tool_description(device), move |args: RunOsCommandArgs| {
        let policy = policy.clone();
        async move {
            if args.command.trim().is_empty() {
                return Err(Error::InvalidToolArguments("command is empty".to_string()));
            }
            Ok(run_os_command(&args.command, &policy).await)
        }
    });
}

/// Run `command` through the host shell and return what it printed.
///
/// Trimmed stdout, or trimmed stderr when stdout is empty. Failures come back as text.
pub async fn run_os_command(command: &str, policy: &CommandPolicy) -> String {
    if let Err(program) = policy.check(command) {
        tracing::warn!(command, "Rejected command outside allow-list");
        return format!("command rejected by policy: {program}");
    }
    if matches!(policy, CommandPolicy::Unrestricted) {
        tracing::warn!(command, "Executing unrestricted model-requested command");
    } else {
        tracing::info!(command, "Executing model-requested command");
    }

    match shell(command).output().await {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stdout = stdout.trim();
            let result = if stdout.is_empty() {
                String::from_utf8_lossy(&output.stderr).trim().to_string()
            } else {
                stdout.to_string()
            };
            tracing::debug!(status = %output.status, len = result.len(), "Command finished");
            result
        }
        Err(err) => {
            tracing::warn!(command, "Failed to execute command: {err}");
            format!("Error executing command: {err}")
        }
    }
}

#[cfg(not(windows))]
fn shell(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command).kill_on_drop(true);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command).kill_on_drop(true);
    cmd
}
