//! Technical metadata extraction via ffprobe
//!
//! Shells out to ffprobe and parses its JSON output. The JSON interface is
//! stable across ffmpeg releases, unlike the library bindings. Probe
//! failures are per-file errors; the scan records and skips them.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffprobe exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("unparseable ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Technical facts about one media file
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub container: Option<String>,
    pub duration_secs: Option<f64>,
    pub bitrate: Option<i64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct Output {
        pub format: Option<Format>,
        #[serde(default)]
        pub streams: Vec<Stream>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub format_name: Option<String>,
        pub duration: Option<String>,
        pub bit_rate: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<i32>,
        pub height: Option<i32>,
    }
}

#[derive(Clone)]
pub struct Prober {
    ffprobe_path: String,
}

impl Prober {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Check that the configured ffprobe binary responds
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub async fn probe(&self, path: &Path) -> Result<ProbeResult, ProbeError> {
        debug!(path = %path.display(), "probing media file");

        if !path.exists() {
            return Err(ProbeError::NotFound(path.display().to_string()));
        }

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .map_err(|source| ProbeError::Spawn {
                tool: self.ffprobe_path.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let status = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(ProbeError::Failed { status, stderr });
        }

        let parsed: ffprobe::Output = serde_json::from_slice(&output.stdout)?;
        Ok(Self::convert(parsed))
    }

    fn convert(output: ffprobe::Output) -> ProbeResult {
        let mut result = ProbeResult::default();

        if let Some(format) = output.format {
            result.container = format.format_name;
            result.duration_secs = format.duration.and_then(|d| d.parse().ok());
            result.bitrate = format.bit_rate.and_then(|b| b.parse().ok());
        }

        for stream in output.streams {
            match stream.codec_type.as_deref() {
                Some("video") if result.video_codec.is_none() => {
                    result.video_codec = stream.codec_name;
                    result.width = stream.width;
                    result.height = stream.height;
                }
                Some("audio") if result.audio_codec.is_none() => {
                    result.audio_codec = stream.codec_name;
                }
                _ => {}
            }
        }

        result
    }
}
