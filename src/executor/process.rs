//! Argument-vector process runner.
//!
//! Programs are spawned directly; nothing is ever passed through a shell.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::ExecError;

/// Complete, untruncated output of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, or -1 when the process was killed by a signal.
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run `argv` in `cwd` with `env` added to the inherited environment.
///
/// A timeout is reported as `ExecError::Timeout`, never as an exit code; the
/// child is killed when the wait is abandoned.
pub async fn run_argv(
    argv: &[String],
    cwd: &Path,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<ProcessOutput, ExecError> {
    let (program, args) = argv.split_first().ok_or(ExecError::EmptyArgv)?;

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;

    tracing::debug!(program = %program, args = args.len(), "Spawned process");

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(ProcessOutput {
                returncode: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        Err(_) => Err(ExecError::Timeout {
            program: program.clone(),
            after: timeout,
        }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_stdout_stderr_and_code() {
        let out = run_argv(
            &argv(&["sh", "-c", "echo out; echo err >&2; exit 7"]),
            Path::new("."),
            &BTreeMap::new(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert_eq!(out.returncode, 7);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_interpreted() {
        let out = run_argv(
            &argv(&["echo", "a;", "b", "|", "c"]),
            Path::new("."),
            &BTreeMap::new(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, "a; b | c\n");
    }

    #[tokio::test]
    async fn test_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("GMV_TEST_VALUE".to_string(), "42".to_string());
        let out = run_argv(
            &argv(&["sh", "-c", "echo $GMV_TEST_VALUE; pwd"]),
            dir.path(),
            &env,
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(out.stdout.starts_with("42\n"));
    }

    #[tokio::test]
    async fn test_timeout_is_distinct() {
        let err = run_argv(
            &argv(&["sleep", "10"]),
            Path::new("."),
            &BTreeMap::new(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_and_empty_argv() {
        let err = run_argv(
            &argv(&["definitely-not-a-real-program-gmv"]),
            Path::new("."),
            &BTreeMap::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());

        let err = run_argv(&[], Path::new("."), &BTreeMap::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::EmptyArgv));
    }
}
