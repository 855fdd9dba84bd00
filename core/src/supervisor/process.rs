use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::SupervisorError;

use super::executor_trait::{Executor, ExecutorOutcome, ExecutorRequest, ResponseHandle};

/// A child line starting with this prefix raises a mid-run clarification:
/// `CLARIFY: <question>`, optionally followed immediately by
/// `OPTIONS: a|b|c`. The executor blocks on `responder.ask_user` and writes
/// the answer back to the child's stdin before resuming the read loop.
const CLARIFY_PREFIX: &str = "CLARIFY: ";
const OPTIONS_PREFIX: &str = "OPTIONS: ";

/// Invokes a configured external command as the executor, via
/// `tokio::process::Command` with the wall-clock budget enforced at the
/// call site in `Supervisor::run`.
///
/// The spawned child's pid is cached so a later `terminate` can signal it;
/// `terminate` is a no-op once the child has already exited or been reaped.
pub struct ProcessExecutor {
    command: String,
    args: Vec<String>,
    child_pid: Mutex<Option<i32>>,
}

impl ProcessExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            child_pid: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn invoke(&self, request: ExecutorRequest, responder: Arc<dyn ResponseHandle>) -> Result<ExecutorOutcome, SupervisorError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(&request.prompt)
            .current_dir(&request.verification_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;

        if let Some(pid) = child.id() {
            *self.child_pid.lock().expect("child_pid mutex poisoned") = Some(pid as i32);
        }

        let mut stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut stdout_buf = String::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(question) = line.strip_prefix(CLARIFY_PREFIX) {
                        let options = match lines.next_line().await {
                            Ok(Some(opts)) if opts.starts_with(OPTIONS_PREFIX) => opts
                                .trim_start_matches(OPTIONS_PREFIX)
                                .split('|')
                                .map(|s| s.trim().to_string())
                                .collect(),
                            Ok(Some(other)) => {
                                stdout_buf.push_str(&other);
                                stdout_buf.push('\n');
                                Vec::new()
                            }
                            _ => Vec::new(),
                        };

                        let answer = responder.ask_user(question.to_string(), options, None).await?;

                        if let Err(e) = stdin.write_all(answer.as_bytes()).await {
                            warn!(error = %e, "ProcessExecutor: failed to write clarification answer to child stdin");
                            break;
                        }
                        let _ = stdin.write_all(b"\n").await;
                        let _ = stdin.flush().await;
                        continue;
                    }

                    stdout_buf.push_str(&line);
                    stdout_buf.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "ProcessExecutor: failed to read child stdout");
                    break;
                }
            }
        }
        drop(stdin);

        let status = child.wait().await.map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;
        let stderr_buf = stderr_task.await.unwrap_or_default();

        *self.child_pid.lock().expect("child_pid mutex poisoned") = None;

        Ok(ExecutorOutcome {
            exit_code: status.code(),
            stdout: stdout_buf,
            stderr: stderr_buf,
            blocked_reason: None,
        })
    }

    async fn terminate(&self, force: bool) {
        let pid = *self.child_pid.lock().expect("child_pid mutex poisoned");
        let Some(pid) = pid else {
            debug!("terminate: no in-flight child to signal");
            return;
        };

        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        debug!(pid, ?signal, "ProcessExecutor::terminate");
        let _ = signal::kill(Pid::from_raw(pid), signal);
    }
}
