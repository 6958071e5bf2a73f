//! Artwork generation via ffmpeg
//!
//! Thumbnails are a single frame grabbed near the middle of the file;
//! previews are a short scaled clip. ffmpeg occasionally hangs on damaged
//! containers, so every invocation runs under a wall-clock timeout and is
//! killed as a whole process group when it expires.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

const THUMBNAIL_WIDTH: u32 = 480;
const PREVIEW_WIDTH: u32 = 640;
const PREVIEW_SECONDS: u32 = 10;

#[derive(Clone)]
pub struct MediaTools {
    ffmpeg_path: String,
    artwork_dir: PathBuf,
    timeout: Duration,
}

impl MediaTools {
    pub fn new(ffmpeg_path: impl Into<String>, artwork_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            artwork_dir: artwork_dir.into(),
            timeout,
        }
    }

    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub fn thumbnail_path(&self, item_id: Uuid) -> PathBuf {
        self.artwork_dir.join(format!("{item_id}.jpg"))
    }

    pub fn preview_path(&self, item_id: Uuid) -> PathBuf {
        self.artwork_dir.join(format!("{item_id}_preview.mp4"))
    }

    /// Grab one frame near the middle of the file as a JPEG thumbnail
    pub async fn generate_thumbnail(
        &self,
        item_id: Uuid,
        source: &Path,
        duration_secs: Option<f64>,
    ) -> Result<PathBuf> {
        let output = self.thumbnail_path(item_id);
        self.ensure_artwork_dir().await?;

        // Midpoint frame, or 10s in when the duration is unknown
        let seek = duration_secs.map(|d| d / 2.0).unwrap_or(10.0);

        debug!(item_id = %item_id, source = %source.display(), seek, "generating thumbnail");

        self.run_ffmpeg(&[
            "-y".into(),
            "-ss".into(),
            format!("{seek:.2}"),
            "-i".into(),
            source.display().to_string(),
            "-vframes".into(),
            "1".into(),
            "-vf".into(),
            format!("scale={THUMBNAIL_WIDTH}:-2"),
            output.display().to_string(),
        ])
        .await?;

        Ok(output)
    }

    /// Encode a short muted preview clip starting a quarter of the way in
    pub async fn generate_preview(
        &self,
        item_id: Uuid,
        source: &Path,
        duration_secs: Option<f64>,
    ) -> Result<PathBuf> {
        let output = self.preview_path(item_id);
        self.ensure_artwork_dir().await?;

        let seek = duration_secs.map(|d| d / 4.0).unwrap_or(0.0);

        debug!(item_id = %item_id, source = %source.display(), seek, "generating preview");

        self.run_ffmpeg(&[
            "-y".into(),
            "-ss".into(),
            format!("{seek:.2}"),
            "-i".into(),
            source.display().to_string(),
            "-t".into(),
            PREVIEW_SECONDS.to_string(),
            "-vf".into(),
            format!("scale={PREVIEW_WIDTH}:-2"),
            "-an".into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-crf".into(),
            "28".into(),
            "-movflags".into(),
            "+faststart".into(),
            output.display().to_string(),
        ])
        .await?;

        Ok(output)
    }

    async fn ensure_artwork_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.artwork_dir)
            .await
            .with_context(|| format!("creating artwork dir {}", self.artwork_dir.display()))?;
        Ok(())
    }

    async fn run_ffmpeg(&self, args: &[String]) -> Result<()> {
        let mut command = Command::new(&self.ffmpeg_path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // ffmpeg spawns helper processes; putting it in its own group lets
        // the timeout path kill the whole tree, not just the leader
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to launch {}", self.ffmpeg_path))?;

        let waited = tokio::time::timeout(self.timeout, child.wait_with_stderr()).await;

        match waited {
            Ok(Ok((status, stderr))) => {
                if status.success() {
                    Ok(())
                } else {
                    anyhow::bail!(
                        "{} exited with {}: {}",
                        self.ffmpeg_path,
                        status,
                        stderr.trim()
                    )
                }
            }
            Ok(Err(err)) => Err(err).context("waiting for ffmpeg"),
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "ffmpeg timed out, killing process group");
                kill_process_group(&mut child).await;
                anyhow::bail!("ffmpeg timed out after {}s", self.timeout.as_secs())
            }
        }
    }
}

#[cfg(unix)]
async fn kill_process_group(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        // Negative pid addresses the whole group
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn kill_process_group(child: &mut tokio::process::Child) {
    let _ = child.kill().await;
    let _ = child.wait().await;
}

trait WaitWithStderr {
    async fn wait_with_stderr(&mut self) -> std::io::Result<(std::process::ExitStatus, String)>;
}

impl WaitWithStderr for tokio::process::Child {
    async fn wait_with_stderr(&mut self) -> std::io::Result<(std::process::ExitStatus, String)> {
        use tokio::io::AsyncReadExt;

        let mut stderr = String::new();
        if let Some(mut pipe) = self.stderr.take() {
            // Drain stderr concurrently with waiting so a chatty ffmpeg
            // never blocks on a full pipe
            let (status, _) = tokio::join!(self.wait(), pipe.read_to_string(&mut stderr));
            return status.map(|s| (s, stderr));
        }

        self.wait().await.map(|s| (s, stderr))
    }
}
