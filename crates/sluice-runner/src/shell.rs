//! Shell-based step execution on the host.
//!
//! A shell step is `{ run: <script>, env: {..}, working_directory: <dir> }`.
//! The script may write a JSON [`OutputPayload`] to the file named by
//! `$SLUICE_OUTPUT` to report findings and metrics.

use crate::runner::{StepOutcome, StepRequest, StepRunner};
use async_trait::async_trait;
use serde::Deserialize;
use sluice_core::job::OutputPayload;
use sluice_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-attempt logs and output files live here, relative to the workspace.
pub const STATE_DIR: &str = ".sluice";

/// Step description understood by [`ShellRunner`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellStep {
    pub run: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<String>,
}

impl ShellStep {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::StepFailed(format!("not a shell step: {}", e)))
    }
}

/// Shell runner for executing scripts on the host.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    env: BTreeMap<String, String>,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            env: BTreeMap::new(),
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn command(&self, step: &ShellStep, request: &StepRequest, output_path: &Path) -> Command {
        let workdir = match &step.working_directory {
            Some(dir) => request.workspace.join(dir),
            None => request.workspace.clone(),
        };

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&step.run)
            .current_dir(workdir)
            .envs(&self.env)
            .envs(&step.env)
            .env("SLUICE_RUN_ID", request.run_id.to_string())
            .env("SLUICE_JOB_ID", request.job_id.as_str())
            .env("SLUICE_ATTEMPT", request.attempt.to_string())
            .env("SLUICE_RESOURCE_CLASS", &request.resource_class)
            .env("SLUICE_OUTPUT", output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cache) = &request.cache {
            cmd.env("SLUICE_CACHE_KEY", &cache.key)
                .env("SLUICE_CACHE_HIT", if cache.hit { "true" } else { "false" });
        }
        cmd
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run(&self, request: &StepRequest, cancel: CancellationToken) -> Result<StepOutcome> {
        let step = ShellStep::from_value(&request.step)?;
        let start = Instant::now();

        let state_dir = request.workspace.join(STATE_DIR);
        tokio::fs::create_dir_all(&state_dir).await?;
        let stem = file_stem(request);
        let output_path = state_dir.join(format!("{}.output.json", stem));
        let log_path = state_dir.join(format!("{}.log", stem));
        if tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
            tokio::fs::remove_file(&output_path).await?;
        }

        info!(job_id = %request.job_id, attempt = request.attempt, "Executing shell step");

        let mut child = self
            .command(&step, request, &output_path)
            .spawn()
            .map_err(|e| Error::RunnerUnavailable(format!("failed to spawn {}: {}", self.shell, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr not captured".to_string()))?;

        let (tx, mut rx) = mpsc::channel::<String>(256);
        let readers = [
            spawn_reader(stdout, tx.clone()),
            spawn_reader(stderr, tx),
        ];

        let mut log_file = tokio::fs::File::create(&log_path).await?;
        let job_id = request.job_id.clone();
        let writer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                debug!(job_id = %job_id, "{}", line);
                if log_file.write_all(line.as_bytes()).await.is_err()
                    || log_file.write_all(b"\n").await.is_err()
                {
                    break;
                }
            }
            let _ = log_file.flush().await;
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                warn!(job_id = %request.job_id, "Cancellation requested, killing process");
                let _ = child.kill().await;
                for reader in &readers {
                    reader.abort();
                }
                writer.abort();
                return Err(Error::StepFailed("step cancelled".to_string()));
            }
        };

        for reader in readers {
            let _ = reader.await;
        }
        let _ = writer.await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let mut output = read_output(&output_path).await;
        if output.log_ref.is_none() {
            output.log_ref = Some(log_path.display().to_string());
        }

        debug!(job_id = %request.job_id, exit_code = ?status.code(), duration_ms, "Shell step completed");

        if status.success() {
            Ok(StepOutcome::succeeded(duration_ms, output))
        } else {
            Ok(StepOutcome::failed(duration_ms, output))
        }
    }
}

fn spawn_reader<R>(stream: R, tx: mpsc::Sender<String>) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    })
}

/// Per-attempt state file stem, unique across runs sharing a workspace.
fn file_stem(request: &StepRequest) -> String {
    let job: String = request
        .job_id
        .as_str()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.' | '-' => c,
            _ => '_',
        })
        .collect();
    format!("{}-{}-{}", request.run_id, job, request.attempt)
}

// A missing or malformed output file yields an empty payload.
async fn read_output(path: &Path) -> OutputPayload {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(_) => return OutputPayload::default(),
    };
    match serde_json::from_slice(&bytes) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring malformed step output");
            OutputPayload::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::ids::{JobId, RunId};
    use sluice_core::job::FindingSeverity;
    use crate::runner::StepStatus;
    use std::time::Duration;

    fn request(dir: &Path, script: &str) -> StepRequest {
        StepRequest {
            run_id: RunId::new(),
            job_id: JobId::new("lint"),
            attempt: 1,
            step: serde_json::json!({ "run": script }),
            resource_class: "small".to_string(),
            workspace: dir.to_path_buf(),
            cache: None,
        }
    }

    #[tokio::test]
    async fn test_shell_runner_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();

        let outcome = runner
            .run(&request(dir.path(), "echo hello"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, StepStatus::Succeeded);

        let log_ref = outcome.output.log_ref.unwrap();
        let log = std::fs::read_to_string(log_ref).unwrap();
        assert_eq!(log.trim(), "hello");
    }

    #[tokio::test]
    async fn test_shell_runner_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();

        let outcome = runner
            .run(&request(dir.path(), "exit 3"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_reads_output_payload() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();
        let script = r#"echo '{"findings":[{"severity":"critical","message":"CVE"}],"metrics":{"coverage":81.5}}' > "$SLUICE_OUTPUT""#;

        let outcome = runner
            .run(&request(dir.path(), script), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.output.count_at_least(FindingSeverity::High), 1);
        assert_eq!(outcome.output.metrics.get("coverage"), Some(&81.5));
    }

    #[tokio::test]
    async fn test_step_env_and_identity() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default().with_env("BASE", "base");
        let mut req = request(dir.path(), r#"echo "$SLUICE_JOB_ID $BASE $EXTRA""#);
        req.step = serde_json::json!({
            "run": r#"echo "$SLUICE_JOB_ID $BASE $EXTRA""#,
            "env": { "EXTRA": "extra" }
        });

        let outcome = runner.run(&req, CancellationToken::new()).await.unwrap();
        let log = std::fs::read_to_string(outcome.output.log_ref.unwrap()).unwrap();
        assert_eq!(log.trim(), "lint base extra");
    }

    #[tokio::test]
    async fn test_cancel_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = runner.run(&request(dir.path(), "exec sleep 30"), cancel).await;
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_job_id_with_separator() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path(), "echo ok");
        req.job_id = JobId::new("lint/py");

        let outcome = ShellRunner::default()
            .run(&req, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, StepStatus::Succeeded);

        let log_ref = outcome.output.log_ref.unwrap();
        assert!(log_ref.ends_with("-lint_py-1.log"));
        assert_eq!(Path::new(&log_ref).parent(), Some(dir.path().join(STATE_DIR).as_path()));
    }

    #[tokio::test]
    async fn test_runs_do_not_share_logs() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::default();

        let first = runner
            .run(&request(dir.path(), "echo first"), CancellationToken::new())
            .await
            .unwrap();
        let second = runner
            .run(&request(dir.path(), "echo second"), CancellationToken::new())
            .await
            .unwrap();

        let first_log = first.output.log_ref.unwrap();
        assert_ne!(first_log, second.output.log_ref.unwrap());
        assert_eq!(std::fs::read_to_string(first_log).unwrap().trim(), "first");
    }

    #[tokio::test]
    async fn test_rejects_non_shell_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path(), "true");
        req.step = serde_json::json!({ "image": "python:3.12" });

        let err = ShellRunner::default()
            .run(&req, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepFailed(_)));
    }
}
