//! runShell / runCode: child processes with the context environment

use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use docrun_common::step::{RunCodeStep, RunShellStep};

use super::{ActionContext, StepOutcome};
use crate::element::Pattern;
use crate::error::{RunnerError, RunnerResult};

/// What to spawn and what to expect from it
struct Invocation {
    program: PathBuf,
    args: Vec<String>,
    working_directory: Option<String>,
    exit_codes: Vec<i32>,
    stdio: Option<String>,
    timeout_ms: u64,
}

pub(super) async fn run_shell(step: &RunShellStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let mut line = step.command.clone();
    for arg in &step.args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }

    let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
    run(
        Invocation {
            program: PathBuf::from(shell),
            args: vec![flag.to_string(), line],
            working_directory: step.working_directory.clone(),
            exit_codes: step.exit_codes.clone(),
            stdio: step.stdio.clone(),
            timeout_ms: step.timeout_ms,
        },
        ctx,
    )
    .await
}

pub(super) async fn run_code(step: &RunCodeStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let Some((candidates, extension)) = interpreter(&step.language) else {
        return Ok(StepOutcome::fail(format!(
            "Unsupported language '{}'. Expected python, bash or javascript.",
            step.language
        )));
    };
    let Some(program) = candidates.iter().find_map(|name| which::which(name).ok()) else {
        return Ok(StepOutcome::fail(format!(
            "No interpreter for {} found on PATH (tried {}).",
            step.language,
            candidates.join(", ")
        )));
    };

    let mut script = tempfile::Builder::new()
        .prefix("docrun-")
        .suffix(extension)
        .tempfile()?;
    script.write_all(step.code.as_bytes())?;
    script.flush()?;

    let mut args = vec![script.path().display().to_string()];
    args.extend(step.args.iter().cloned());

    run(
        Invocation {
            program,
            args,
            working_directory: step.working_directory.clone(),
            exit_codes: step.exit_codes.clone(),
            stdio: step.stdio.clone(),
            timeout_ms: step.timeout_ms,
        },
        ctx,
    )
    .await
}

fn interpreter(language: &str) -> Option<(&'static [&'static str], &'static str)> {
    match language.to_lowercase().as_str() {
        "python" | "python3" | "py" => Some((&["python3", "python"][..], ".py")),
        "bash" | "sh" | "shell" => Some((&["bash", "sh"][..], ".sh")),
        "javascript" | "js" | "node" => Some((&["node"][..], ".js")),
        _ => None,
    }
}

async fn run(invocation: Invocation, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .env_clear()
        .envs(ctx.env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &invocation.working_directory {
        command.current_dir(ctx.resolve_path(dir));
    }

    debug!("Spawning {} {:?}", invocation.program.display(), invocation.args);
    let child = command.spawn()?;
    let timeout = Duration::from_millis(invocation.timeout_ms);
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(RunnerError::Timeout(format!(
                "command to finish after {} ms",
                invocation.timeout_ms
            )))
        }
    };

    let stdout = trim_newline(String::from_utf8_lossy(&output.stdout).into_owned());
    let stderr = trim_newline(String::from_utf8_lossy(&output.stderr).into_owned());
    let exit_code = output.status.code().unwrap_or(-1);
    let outputs = json!({
        "exitCode": exit_code,
        "stdio": { "stdout": stdout, "stderr": stderr },
    });

    if !invocation.exit_codes.contains(&exit_code) {
        return Ok(StepOutcome::fail(format!(
            "Returned exit code {}. Expected one of {:?}.",
            exit_code, invocation.exit_codes
        ))
        .with_outputs(outputs));
    }

    if let Some(expected) = &invocation.stdio {
        let pattern = Pattern::parse(expected)?;
        let found = match &pattern {
            Pattern::Exact(text) => stdout.contains(text.as_str()) || stderr.contains(text.as_str()),
            Pattern::Regex(_) => pattern.matches(&stdout) || pattern.matches(&stderr),
        };
        if !found {
            return Ok(StepOutcome::fail(format!(
                "Couldn't find expected output ({}) in actual output.",
                expected
            ))
            .with_outputs(outputs));
        }
    }

    Ok(StepOutcome::pass(format!("Returned exit code {}.", exit_code)).with_outputs(outputs))
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn trim_newline(mut text: String) -> String {
    while text.ends_with('\n') || text.ends_with('\r') {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("hello"), "hello");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_interpreter_lookup() {
        assert_eq!(interpreter("Python").map(|(_, ext)| ext), Some(".py"));
        assert!(interpreter("cobol").is_none());
    }
}
