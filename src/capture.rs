//! Capture provider contract and duration measurement.
//!
//! The core never records audio itself. It receives a finished artifact and,
//! when the capture side could not report a duration, measures one with a
//! bounded wait.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// A finished capture handed over by the capture provider.
#[derive(Clone, PartialEq)]
pub struct CapturedAudio {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub duration_seconds: Option<f64>,
}

impl CapturedAudio {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            duration_seconds: None,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }
}

impl std::fmt::Debug for CapturedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedAudio")
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .field("duration_seconds", &self.duration_seconds)
            .finish()
    }
}

#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Decode enough of the artifact to report its length in seconds.
    async fn probe(&self, audio: &CapturedAudio) -> Result<f64>;
}

/// Resolve a duration for `audio`.
///
/// A duration supplied by the capture side wins. Otherwise the probe runs
/// under `timeout`; on timeout, error, or a nonsensical value the record is
/// saved with no duration.
pub async fn resolve_duration(
    audio: &CapturedAudio,
    probe: Option<&dyn DurationProbe>,
    timeout: Duration,
) -> Option<f64> {
    if let Some(secs) = audio.duration_seconds.filter(|s| valid_duration(*s)) {
        return Some(secs);
    }
    let probe = probe?;
    match tokio::time::timeout(timeout, probe.probe(audio)).await {
        Ok(Ok(secs)) if valid_duration(secs) => Some(secs),
        Ok(Ok(secs)) => {
            warn!(secs, "probe returned an invalid duration; saving without one");
            None
        }
        Ok(Err(err)) => {
            warn!(?err, "duration probe failed; saving without one");
            None
        }
        Err(_) => {
            warn!(?timeout, "duration probe timed out; saving without one");
            None
        }
    }
}

fn valid_duration(secs: f64) -> bool {
    secs.is_finite() && secs >= 0.0
}

/// Ensure `ffprobe` is on PATH by invoking `ffprobe -version`.
pub async fn ensure_ffprobe_available() -> Result<()> {
    let status = Command::new("ffprobe")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;
    match status {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(anyhow!("ffprobe not available (exit status {})", s)),
        Err(e) => Err(anyhow!("ffprobe not available: {}", e)),
    }
}

/// Reads the container duration with `ffprobe`, feeding the artifact on stdin.
/// The child is killed if the caller stops waiting.
#[derive(Debug, Clone, Default)]
pub struct FfprobeDuration;

#[async_trait]
impl DurationProbe for FfprobeDuration {
    async fn probe(&self, audio: &CapturedAudio) -> Result<f64> {
        let mut child = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                "-i",
                "pipe:0",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn ffprobe")?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("ffprobe stdin unavailable"))?;
        let bytes = audio.bytes.as_slice();
        let feed = async move {
            // ffprobe may close stdin as soon as it has the header.
            if let Err(err) = stdin.write_all(bytes).await {
                debug!(%err, "ffprobe stopped reading stdin early");
            }
            drop(stdin);
        };
        let (_, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.context("failed to wait for ffprobe")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("ffprobe failed ({}): {}", output.status, stderr.trim()));
        }
        parse_ffprobe_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_ffprobe_duration(stdout: &str) -> Result<f64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("ffprobe printed no duration"))?;
    line.parse::<f64>()
        .with_context(|| format!("unparseable ffprobe duration {:?}", line))
}
