//! Perceptual content hashing of staged media.
//!
//! Still images get an 8x8 average (mean) hash. Videos are sampled with ffmpeg,
//! the frames are tiled into a 4x4 collage, and the collage is mean-hashed the
//! same way. Both render as 16 hex characters.

use crate::{
    error::AppError,
    services::{
        ffmpeg::{Ffmpeg, SAMPLE_FRAMES, SAMPLE_WIDTH},
        media_stager::StagedMedia,
    },
};
use async_trait::async_trait;
use image::{DynamicImage, RgbImage, imageops::FilterType};
use image_hasher::{HashAlg, HasherConfig};
use std::path::{Path, PathBuf};

const COLLAGE_COLUMNS: u32 = 4;

/// Computes the cache key for staged media.
#[async_trait]
pub trait MediaHasher: Send + Sync {
    async fn hash(&self, media: &StagedMedia) -> Result<String, AppError>;
}

/// Mean-hash of the decoded pixel grid, as hex.
pub fn average_hash(image: &DynamicImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Mean)
        .hash_size(8, 8)
        .to_hasher();
    hex::encode(hasher.hash_image(image).as_bytes())
}

/// Decode image bytes and mean-hash them.
pub fn hash_image_bytes(bytes: &[u8]) -> Result<String, AppError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| AppError::Classification(format!("Failed to decode image: {}", e)))?;
    Ok(average_hash(&image))
}

/// Tile frames (in order) into a fixed 4x4 collage; missing tiles stay black.
fn collage(frames: &[DynamicImage]) -> DynamicImage {
    let tile = SAMPLE_WIDTH;
    let rows = (SAMPLE_FRAMES as u32).div_ceil(COLLAGE_COLUMNS);
    let mut canvas = RgbImage::new(tile * COLLAGE_COLUMNS, tile * rows);

    for (i, frame) in frames.iter().take(SAMPLE_FRAMES).enumerate() {
        let i = i as u32;
        let x = (i % COLLAGE_COLUMNS) * tile;
        let y = (i / COLLAGE_COLUMNS) * tile;
        let resized = frame.resize_exact(tile, tile, FilterType::Triangle).to_rgb8();
        image::imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
    }

    DynamicImage::ImageRgb8(canvas)
}

/// Hasher used in production: image_hasher for stills, ffmpeg + collage for video.
pub struct PerceptualHasher {
    ffmpeg: Ffmpeg,
    scratch_dir: PathBuf,
}

impl PerceptualHasher {
    pub fn new(ffmpeg: Ffmpeg, scratch_dir: Option<PathBuf>) -> Self {
        Self {
            ffmpeg,
            scratch_dir: scratch_dir.unwrap_or_else(std::env::temp_dir),
        }
    }

    async fn hash_image(&self, path: &Path) -> Result<String, AppError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::Classification(format!("Failed to read staged media: {}", e)))?;

        tokio::task::spawn_blocking(move || hash_image_bytes(&bytes))
            .await
            .map_err(|e| AppError::Classification(format!("Hashing task failed: {}", e)))?
    }

    async fn hash_video(&self, path: &Path) -> Result<String, AppError> {
        // Removed with everything in it when it goes out of scope
        let frames_dir = tempfile::Builder::new()
            .prefix("nsfw-frames-")
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| AppError::Staging(format!("Failed to create frame directory: {}", e)))?;

        let frame_paths = self.ffmpeg.sample_frames(path, frames_dir.path()).await?;

        tokio::task::spawn_blocking(move || {
            let mut frames = Vec::with_capacity(frame_paths.len());
            for frame_path in &frame_paths {
                match image::open(frame_path) {
                    Ok(frame) => frames.push(frame),
                    Err(e) => {
                        tracing::warn!("Skipping undecodable frame {}: {}", frame_path.display(), e)
                    }
                }
            }
            if frames.is_empty() {
                return Err(AppError::Classification(
                    "No decodable frames in video".to_string(),
                ));
            }
            Ok(average_hash(&collage(&frames)))
        })
        .await
        .map_err(|e| AppError::Classification(format!("Hashing task failed: {}", e)))?
    }
}

#[async_trait]
impl MediaHasher for PerceptualHasher {
    async fn hash(&self, media: &StagedMedia) -> Result<String, AppError> {
        if media.is_video() {
            self.hash_video(media.path()).await
        } else {
            self.hash_image(media.path()).await
        }
    }
}
