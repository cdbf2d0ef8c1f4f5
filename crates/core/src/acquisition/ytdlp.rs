//! yt-dlp backed acquisition.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use regex_lite::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AcquisitionBackend, AttemptFailure, AttemptRequest, DownloaderConfig, Strategy};
use crate::job::AttemptOutcome;

static PROGRESS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("valid progress regex"));

/// Lines of stderr kept for the error detail.
const MAX_ERROR_LINES: usize = 20;

/// Classify downloader output into an attempt outcome.
///
/// Auth markers are checked before block markers: "Sign in to confirm you're
/// not a bot" is a block, "Sign in to confirm your age" needs credentials.
pub fn classify_failure(output: &str) -> AttemptOutcome {
    let text = output.to_lowercase();

    if text.contains("not a bot") || text.contains("confirm you're not a bot") {
        return AttemptOutcome::Blocked;
    }

    const AUTH_MARKERS: &[&str] = &[
        "cookies",
        "login required",
        "sign in to confirm your age",
        "private video",
        "members-only",
        "requires authentication",
        "sign in",
    ];
    if AUTH_MARKERS.iter().any(|m| text.contains(m)) {
        return AttemptOutcome::AuthError;
    }

    const BLOCK_MARKERS: &[&str] = &[
        "http error 429",
        "too many requests",
        "http error 403",
        "forbidden",
        "not available in your country",
        "blocked",
        "unusual traffic",
    ];
    if BLOCK_MARKERS.iter().any(|m| text.contains(m)) {
        return AttemptOutcome::Blocked;
    }

    if text.contains("timed out") || text.contains("timeout") {
        return AttemptOutcome::Timeout;
    }

    AttemptOutcome::TransientError
}

/// Parse a `[download]  42.1% of ...` line.
pub fn parse_progress(line: &str) -> Option<f32> {
    PROGRESS_LINE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
}

/// Runs yt-dlp as a child process, one invocation per attempt.
pub struct YtDlpBackend {
    config: DownloaderConfig,
}

impl YtDlpBackend {
    pub fn new(config: DownloaderConfig) -> Self {
        Self { config }
    }

    fn output_template(&self, request: &AttemptRequest) -> PathBuf {
        self.config.output_dir.join(format!(
            "{}_{}.%(ext)s",
            request.job_id,
            request.strategy.name()
        ))
    }

    /// Command-line arguments for one attempt.
    pub fn build_args(&self, request: &AttemptRequest) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        match request.strategy {
            Strategy::Direct => {
                args.extend(["-f".into(), "worst[height<=480]/worst".into()]);
            }
            Strategy::AlternateClientA => {
                args.extend([
                    "--extractor-args".into(),
                    "youtube:player_client=android".into(),
                    "-f".into(),
                    "worst[height<=360]/worst".into(),
                ]);
            }
            Strategy::AlternateClientB => {
                args.extend([
                    "--extractor-args".into(),
                    "youtube:player_client=web".into(),
                    "-f".into(),
                    "worst".into(),
                ]);
            }
            Strategy::Credentialed => {
                args.extend([
                    "--extractor-args".into(),
                    "youtube:player_client=web".into(),
                    "-f".into(),
                    "worst".into(),
                ]);
            }
            Strategy::UncredentialedFallback => {
                args.extend([
                    "--extractor-args".into(),
                    "youtube:player_client=android,web".into(),
                    "-f".into(),
                    "worstvideo[height<=360]+worstaudio/worst[height<=360]/worst".into(),
                ]);
            }
        }

        if request.strategy != Strategy::UncredentialedFallback {
            if let Some(cookies) = &request.cookie_file {
                args.extend(["--cookies".into(), cookies.display().to_string()]);
            }
        }
        if let Some(proxy) = &request.proxy_url {
            args.extend(["--proxy".into(), proxy.clone()]);
        }
        if let Some(agent) = self.config.user_agents.choose(&mut rand::rng()) {
            args.extend(["--user-agent".into(), agent.clone()]);
        }

        args.extend([
            "--newline".into(),
            "--progress".into(),
            "--no-playlist".into(),
            "--print".into(),
            "after_move:filepath".into(),
            "-o".into(),
            self.output_template(request).display().to_string(),
        ]);
        args.extend(self.config.extra_args.iter().cloned());
        args.push(request.target.clone());
        args
    }
}

#[async_trait]
impl AcquisitionBackend for YtDlpBackend {
    async fn execute(
        &self,
        request: AttemptRequest,
        progress: mpsc::Sender<f32>,
        cancel: CancellationToken,
    ) -> Result<String, AttemptFailure> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| {
                AttemptFailure::transient(format!(
                    "cannot create {}: {}",
                    self.config.output_dir.display(),
                    e
                ))
            })?;

        let args = self.build_args(&request);
        debug!(
            "Running {} for job {} ({})",
            self.config.binary.display(),
            request.job_id,
            request.strategy
        );

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_failure(&self.config.binary, e))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(AttemptFailure::transient("downloader pipes were not captured"));
        };
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();

        let mut result_path: Option<String> = None;
        let mut error_lines: Vec<String> = Vec::new();
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(AttemptFailure::transient("attempt cancelled"));
                }
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => {
                        if let Some(pct) = parse_progress(&line) {
                            let _ = progress.try_send(pct);
                        } else if !line.starts_with('[') && !line.trim().is_empty() {
                            // --print after_move:filepath
                            result_path = Some(line.trim().to_string());
                        }
                    }
                    _ => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        if error_lines.len() == MAX_ERROR_LINES {
                            error_lines.remove(0);
                        }
                        error_lines.push(line);
                    }
                    _ => stderr_open = false,
                },
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(AttemptFailure::transient("attempt cancelled"));
            }
            status = child.wait() => status
                .map_err(|e| AttemptFailure::transient(format!("waiting for downloader: {}", e)))?,
        };

        let error_output = error_lines.join("\n");
        if !status.success() {
            let outcome = classify_failure(&error_output);
            let detail = if error_output.is_empty() {
                format!("downloader exited with code {:?}", status.code())
            } else {
                error_output
            };
            return Err(AttemptFailure::new(outcome, detail));
        }

        match result_path {
            Some(path) => Ok(path),
            None => {
                warn!(
                    "Downloader succeeded for job {} without reporting a file",
                    request.job_id
                );
                Err(AttemptFailure::transient(
                    "downloader exited successfully but reported no output file",
                ))
            }
        }
    }
}

fn spawn_failure(binary: &Path, e: std::io::Error) -> AttemptFailure {
    if e.kind() == std::io::ErrorKind::NotFound {
        AttemptFailure::transient(format!("downloader not found at {}", binary.display()))
    } else {
        AttemptFailure::transient(format!("failed to start downloader: {}", e))
    }
}
