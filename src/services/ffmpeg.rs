//! ffmpeg subprocess wrappers: GIF → MP4 transcoding and frame sampling.

use crate::{config::MediaConfig, error::AppError};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::process::Command;

/// Frames sampled per video for hashing.
pub const SAMPLE_FRAMES: usize = 16;

/// Width (px) sampled frames are scaled to.
pub const SAMPLE_WIDTH: u32 = 144;

/// Converts animated GIFs into an MP4 container.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Transcode `input` (GIF) into `output` (MP4). `output` may already exist and is overwritten.
    async fn gif_to_mp4(&self, input: &Path, output: &Path) -> Result<(), AppError>;
}

/// Transcoder and frame sampler backed by the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
    threads: usize,
}

impl Ffmpeg {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            binary: PathBuf::from(&config.ffmpeg_path),
            threads: config.ffmpeg_threads.max(1),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-threads", &self.threads.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Extract up to `SAMPLE_FRAMES` frames (1 per second) from `video` into
    /// `out_dir` as `frame_0001.jpg`, `frame_0002.jpg`, ... and return their
    /// paths in order.
    pub async fn sample_frames(
        &self,
        video: &Path,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, AppError> {
        let vf = format!("fps=1,scale={}:-2", SAMPLE_WIDTH);
        let pattern = out_dir.join("frame_%04d.jpg");

        let output = self
            .command()
            .arg("-i")
            .arg(video)
            .args(["-an", "-sn"])
            .args(["-vf", &vf])
            .args(["-frames:v", &SAMPLE_FRAMES.to_string()])
            .args(["-q:v", "4"])
            .arg("-y")
            .arg(&pattern)
            .output()
            .await
            .map_err(|e| AppError::Classification(format!("Failed to spawn ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Classification(format!(
                "ffmpeg frame extraction failed: {}",
                stderr.trim()
            )));
        }

        let mut frames = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir)
            .await
            .map_err(|e| AppError::Classification(format!("Failed to list frames: {}", e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Classification(format!("Failed to list frames: {}", e)))?
        {
            let path = entry.path();
            let is_frame = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with("frame_"))
                .unwrap_or(false);
            if is_frame {
                frames.push(path);
            }
        }
        frames.sort();

        if frames.is_empty() {
            return Err(AppError::Classification(
                "ffmpeg produced no frames".to_string(),
            ));
        }
        Ok(frames)
    }
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn gif_to_mp4(&self, input: &Path, output: &Path) -> Result<(), AppError> {
        let result = self
            .command()
            .arg("-i")
            .arg(input)
            // H.264 needs even dimensions and yuv420p for broad decoder support
            .args(["-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2"])
            .args(["-pix_fmt", "yuv420p"])
            .args(["-movflags", "+faststart"])
            .args(["-f", "mp4"])
            .arg("-y")
            .arg(output)
            .output()
            .await
            .map_err(|e| AppError::Transcode(format!("Failed to spawn ffmpeg: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(AppError::Transcode(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        tracing::debug!("Transcoded {} -> {}", input.display(), output.display());
        Ok(())
    }
}
