//! Bounded child process execution.
//!
//! Every child gets piped stdout/stderr, a filtered environment and
//! `kill_on_drop`. Stdin is closed unless the spec carries input. When the
//! deadline passes the pending wait is dropped, which drops the child handle
//! and kills the process.

use std::env;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// What a finished (or abandoned) child produced. Never exposed to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Builder for a sandbox-friendly [`Command`].
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    program: String,
    args: Vec<String>,
    env_passthrough: Vec<String>,
    input: Option<Vec<u8>>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_passthrough: Vec::new(),
            input: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Host variables copied into the otherwise empty child environment.
    pub fn env_passthrough(mut self, names: &[String]) -> Self {
        self.env_passthrough = names.to_vec();
        self
    }

    /// Bytes written to the child's stdin, which is closed afterwards.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn command(&self, cwd: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env_clear()
            .stdin(if self.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for name in &self.env_passthrough {
            if let Ok(value) = env::var(name) {
                cmd.env(name, value);
            }
        }
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    /// Spawn and wait up to `timeout`. Spawn failures are returned as errors;
    /// a timeout is reported through [`ProcessOutcome::timed_out`].
    pub async fn run(
        &self,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<ProcessOutcome, std::io::Error> {
        let mut child = self.command(cwd).spawn()?;
        let stdin = child.stdin.take();
        let input = self.input.clone();

        let completion = async move {
            if let (Some(mut pipe), Some(input)) = (stdin, input) {
                // A child that exits without reading everything closes the pipe early.
                if let Err(e) = pipe.write_all(&input).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
                drop(pipe);
            }
            child.wait_with_output().await
        };

        match tokio::time::timeout(timeout, completion).await {
            Ok(output) => {
                let output = output?;
                Ok(ProcessOutcome {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                })
            }
            Err(_) => {
                log::warn!(
                    "Process '{}' exceeded {:?}, killing it",
                    self.program,
                    timeout
                );
                Ok(ProcessOutcome {
                    timed_out: true,
                    ..Default::default()
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_captures_streams_and_exit_code() {
        let outcome = ProcessSpec::new("sh")
            .args(["-c", "echo out; echo err >&2; exit 3"])
            .env_passthrough(&["PATH".to_string()])
            .run(None, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
        assert!(!outcome.timed_out);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let started = Instant::now();
        let outcome = ProcessSpec::new("sh")
            .args(["-c", "sleep 30"])
            .env_passthrough(&["PATH".to_string()])
            .run(None, Duration::from_millis(200))
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_environment_is_filtered() {
        env::set_var("CODERUN_TEST_LEAK", "visible");
        let outcome = ProcessSpec::new("sh")
            .args(["-c", "echo \"[${CODERUN_TEST_LEAK}]\""])
            .env_passthrough(&["PATH".to_string()])
            .run(None, Duration::from_secs(5))
            .await
            .unwrap();
        env::remove_var("CODERUN_TEST_LEAK");

        assert_eq!(outcome.stdout.trim(), "[]");
    }

    #[tokio::test]
    async fn test_stdin_input_reaches_child() {
        let outcome = ProcessSpec::new("sh")
            .args(["-c", "tr a-z A-Z"])
            .env_passthrough(&["PATH".to_string()])
            .stdin("shout\n")
            .run(None, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.stdout.trim(), "SHOUT");
    }

    #[tokio::test]
    async fn test_child_ignoring_stdin_still_completes() {
        let outcome = ProcessSpec::new("sh")
            .args(["-c", "exit 0"])
            .stdin(vec![b'x'; 1 << 20])
            .run(None, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(outcome.success());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let result = ProcessSpec::new("/definitely/not/a/binary")
            .run(None, Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }
}
