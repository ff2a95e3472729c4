//! ffprobe-based stream inspection
//!
//! Runs ffprobe against remote stream URLs with a bounded byte/time budget
//! and reads its JSON stream listing. Only the documented output schema is
//! relied upon (`index`, `codec_type`, `codec_name`, `tags`, `disposition`).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::debrid::types::{AudioTrack, SubtitleTrack};
use crate::error::{DebridError, Result};

/// Audio and subtitle tracks found in a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackProbeResult {
    pub audio_tracks: Vec<AudioTrack>,
    pub subtitle_tracks: Vec<SubtitleTrack>,
}

/// Something that can inspect a remote media stream
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Number of audio streams, read from the container header only
    async fn count_audio_streams(&self, url: &str) -> Result<usize>;

    /// Full audio/subtitle track listing
    async fn probe_tracks(&self, url: &str) -> Result<TrackProbeResult>;
}

/// ffprobe JSON output structures
mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        #[serde(default)]
        pub streams: Vec<Stream>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        #[serde(default)]
        pub index: u32,
        pub codec_name: Option<String>,
        pub codec_type: Option<String>,
        pub disposition: Option<Disposition>,
        pub tags: Option<HashMap<String, String>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Disposition {
        pub forced: Option<i32>,
    }
}

/// Display type for image-based subtitle codecs
pub fn bitmap_subtitle_type(codec: &str) -> Option<&'static str> {
    match codec {
        "hdmv_pgs_subtitle" | "pgssub" => Some("PGS"),
        "dvd_subtitle" | "dvdsub" => Some("VOBSUB"),
        _ => None,
    }
}

/// Split ffprobe streams into audio and subtitle tracks
fn convert_probe_output(probe: ffprobe::FfprobeOutput) -> TrackProbeResult {
    let mut result = TrackProbeResult::default();

    for stream in probe.streams {
        let codec = stream
            .codec_name
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let tags = stream.tags.unwrap_or_default();
        let language = tags.get("language").cloned().unwrap_or_default();
        let title = tags.get("title").cloned().unwrap_or_default();

        match stream.codec_type.as_deref() {
            Some("audio") => result.audio_tracks.push(AudioTrack {
                index: stream.index,
                language,
                codec,
                title,
            }),
            Some("subtitle") => {
                let forced = stream
                    .disposition
                    .and_then(|d| d.forced)
                    .unwrap_or(0)
                    > 0;
                let bitmap_type = bitmap_subtitle_type(&codec).map(str::to_string);
                result.subtitle_tracks.push(SubtitleTrack {
                    index: stream.index,
                    language,
                    codec,
                    title,
                    forced,
                    is_bitmap: bitmap_type.is_some(),
                    bitmap_type,
                });
            }
            _ => {}
        }
    }

    result
}

/// ffprobe wrapper
pub struct FfprobeService {
    ffprobe_path: String,
    audio_count_timeout: Duration,
    track_probe_timeout: Duration,
}

impl FfprobeService {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            audio_count_timeout: Duration::from_secs(15),
            track_probe_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_timeouts(mut self, audio_count: Duration, track_probe: Duration) -> Self {
        self.audio_count_timeout = audio_count;
        self.track_probe_timeout = track_probe;
        self
    }

    /// Check if ffprobe is available
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

    /// Run ffprobe with the given extra arguments and decode its output
    async fn run(&self, url: &str, extra: &[&str], timeout: Duration) -> Result<ffprobe::FfprobeOutput> {
        let child = Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
            .args(extra)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DebridError::Probe(format!("failed to execute ffprobe: {e}")))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| DebridError::Probe(format!("ffprobe timed out after {}s", timeout.as_secs())))?
            .map_err(|e| DebridError::Probe(format!("ffprobe failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(DebridError::Probe(format!(
                "ffprobe exited with code {}: {}",
                exit_code,
                if stderr.trim().is_empty() {
                    "no error output"
                } else {
                    stderr.trim()
                }
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| DebridError::Probe(format!("parse ffprobe output: {e}")))
    }
}

#[async_trait]
impl MediaProber for FfprobeService {
    async fn count_audio_streams(&self, url: &str) -> Result<usize> {
        let probe = self
            .run(
                url,
                &[
                    "-select_streams",
                    "a",
                    "-analyzeduration",
                    "5000000",
                    "-probesize",
                    "5000000",
                ],
                self.audio_count_timeout,
            )
            .await?;
        debug!(audio_streams = probe.streams.len(), "Audio stream count");
        Ok(probe.streams.len())
    }

    async fn probe_tracks(&self, url: &str) -> Result<TrackProbeResult> {
        let probe = self
            .run(
                url,
                &["-analyzeduration", "10000000", "-probesize", "10000000"],
                self.track_probe_timeout,
            )
            .await?;
        let result = convert_probe_output(probe);
        info!(
            audio = result.audio_tracks.len(),
            subtitles = result.subtitle_tracks.len(),
            "Track probe complete"
        );
        Ok(result)
    }
}
