//! FFmpeg command wrapper and transcode executor
//!
//! Each transcode runs ffmpeg in its own tokio task. The task reports exactly
//! one terminal result through a oneshot channel; progress goes out on a
//! separate broadcast side channel and the log. Dropping the caller does not
//! stop a running transcode.

use crate::directives::EncodeDirectiveSet;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Lines of stderr kept for failure diagnostics
const DIAGNOSTIC_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("FFmpeg not found: {0}")]
    NotInstalled(String),

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("FFmpeg exited without a result")]
    Abandoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one transcode: the output path, or the transcoder's diagnostics
pub type TranscodeResult = Result<PathBuf, FfmpegError>;

/// Progress reported by a running transcode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TranscodeEvent {
    Started { output: PathBuf },
    Progress { output: PathBuf, out_time_ms: u64, frame: u64 },
    Finished { output: PathBuf, success: bool },
}

pub struct FfmpegCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".to_string());
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn args<S: AsRef<str>>(mut self, args: &[S]) -> Self {
        self.args.extend(args.iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn into_command(self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Default for FfmpegCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs an external transcoder against a working file
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcode `input` into `output` following `directives`. Resolves once,
    /// with `output` on success or the transcoder's diagnostics on failure.
    async fn execute(&self, input: &Path, output: &Path, directives: &EncodeDirectiveSet) -> TranscodeResult;
}

/// [`Transcoder`] backed by the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    events: Option<broadcast::Sender<TranscodeEvent>>,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            events: None,
        }
    }

    /// Publish progress events to `events` in addition to the log
    pub fn with_events(mut self, events: broadcast::Sender<TranscodeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Check the configured binary runs
    pub async fn probe(&self) -> Result<String, FfmpegError> {
        let output = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| FfmpegError::NotInstalled(format!("{}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            return Err(FfmpegError::NotInstalled(self.program.display().to_string()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    /// Full invocation for one transcode, directives in composed order
    pub fn build_command(&self, input: &Path, output: &Path, directives: &EncodeDirectiveSet) -> FfmpegCommand {
        FfmpegCommand::with_program(&self.program)
            .args(&["-hide_banner", "-nostdin", "-y"])
            .input(input)
            .args(directives.ffmpeg_args().as_slice())
            .args(&["-progress", "pipe:1", "-nostats"])
            .output(output)
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn execute(&self, input: &Path, output: &Path, directives: &EncodeDirectiveSet) -> TranscodeResult {
        let command = self.build_command(input, output, directives);
        info!("Transcoding {} -> {} [{}]", input.display(), output.display(), directives);
        debug!("{} {}", command.program().display(), command.get_args().join(" "));

        let (tx, rx) = oneshot::channel();
        let events = self.events.clone();
        let output = output.to_path_buf();

        tokio::spawn(async move {
            let result = run_to_completion(command, output, events).await;
            // Receiver gone means the caller stopped waiting; the process still ran to the end
            let _ = tx.send(result);
        });

        rx.await.unwrap_or(Err(FfmpegError::Abandoned))
    }
}

async fn run_to_completion(
    command: FfmpegCommand,
    output: PathBuf,
    events: Option<broadcast::Sender<TranscodeEvent>>,
) -> TranscodeResult {
    let program = command.program().display().to_string();
    let mut child = command.into_command().spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FfmpegError::NotInstalled(program.clone())
        } else {
            FfmpegError::ExecutionFailed(e.to_string())
        }
    })?;

    publish(&events, TranscodeEvent::Started { output: output.clone() });

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let progress = tokio::spawn(follow_progress(stdout, output.clone(), events.clone()));
    let diagnostics = tokio::spawn(collect_tail(stderr));

    let status = child.wait().await?;
    let _ = progress.await;
    let tail = diagnostics.await.unwrap_or_default();

    publish(
        &events,
        TranscodeEvent::Finished {
            output: output.clone(),
            success: status.success(),
        },
    );

    if status.success() {
        info!("Transcode finished: {}", output.display());
        Ok(output)
    } else {
        let message = if tail.is_empty() {
            format!("ffmpeg exited with {}", status)
        } else {
            tail
        };
        warn!("Transcode failed ({}): {}", status, message);
        Err(FfmpegError::ExecutionFailed(message))
    }
}

fn publish(events: &Option<broadcast::Sender<TranscodeEvent>>, event: TranscodeEvent) {
    if let Some(tx) = events {
        if tx.send(event).is_err() {
            debug!("No subscribers for transcode event");
        }
    }
}

/// Parse `-progress pipe:1` key=value blocks
async fn follow_progress<R: AsyncRead + Unpin>(
    stdout: Option<R>,
    output: PathBuf,
    events: Option<broadcast::Sender<TranscodeEvent>>,
) {
    let Some(stdout) = stdout else { return };
    let mut lines = BufReader::new(stdout).lines();
    let mut frame = 0u64;
    let mut out_time_ms = 0u64;

    while let Ok(Some(line)) = lines.next_line().await {
        let Some((key, value)) = line.split_once('=') else { continue };
        match key.trim() {
            "frame" => frame = value.trim().parse().unwrap_or(frame),
            // ffmpeg reports microseconds under this key
            "out_time_ms" | "out_time_us" => {
                out_time_ms = value.trim().parse::<u64>().map(|us| us / 1000).unwrap_or(out_time_ms)
            }
            "progress" => {
                debug!("{}: frame={} time={}ms ({})", output.display(), frame, out_time_ms, value.trim());
                publish(
                    &events,
                    TranscodeEvent::Progress {
                        output: output.clone(),
                        out_time_ms,
                        frame,
                    },
                );
            }
            _ => {}
        }
    }
}

async fn collect_tail<R: AsyncRead + Unpin>(stderr: Option<R>) -> String {
    let Some(stderr) = stderr else { return String::new() };
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == DIAGNOSTIC_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}
