//! External program execution shared by the provider CLIs, the load balancer
//! reload hook, ssh bootstrap and mail delivery.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{FleetError, Result};

/// Captured result of a finished program
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

const REDACTED: &str = "******";

fn describe(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

fn redact(text: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_string(), |acc, secret| acc.replace(secret, REDACTED))
}

/// Run `program` with `args`, returning stdout; a non-zero exit is an error
pub async fn run(program: &str, args: &[String]) -> Result<String> {
    run_with_input(program, args, None).await
}

/// Run a command line through `sh -c`
pub async fn run_shell(command_line: &str) -> Result<String> {
    run("sh", &["-c".to_string(), command_line.to_string()]).await
}

/// Like [`run`], but `secrets` never appear in logs or errors
pub async fn run_redacted(program: &str, args: &[String], secrets: &[&str]) -> Result<String> {
    execute(program, args, None, secrets).await
}

/// Run `program`, optionally feeding `input` on stdin
pub async fn run_with_input(program: &str, args: &[String], input: Option<&str>) -> Result<String> {
    execute(program, args, input, &[]).await
}

async fn execute(
    program: &str,
    args: &[String],
    input: Option<&str>,
    secrets: &[&str],
) -> Result<String> {
    let description = redact(&describe(program, args), secrets);
    debug!(command = %description, "Running external command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| FleetError::CommandFailed {
            command: description.clone(),
            detail: redact(&e.to_string(), secrets),
        })?;

    if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(text.as_bytes()).await?;
        stdin.shutdown().await?;
    }

    let output: CommandOutput = child.wait_with_output().await?.into();
    if !output.success {
        return Err(FleetError::CommandFailed {
            command: description,
            detail: redact(output.stderr.trim(), secrets),
        });
    }

    Ok(output.stdout)
}
