//! Request-scoped staging of submitted media on disk.
//!
//! Bytes are written to a uniquely named temp file that is owned by the
//! returned `StagedMedia`. Animated GIFs are transcoded to MP4 first; the GIF
//! is deleted as soon as the MP4 exists. Every temp file is held by a
//! `tempfile::TempPath`, so it is deleted exactly once when its owner goes
//! out of scope, whichever way the request ends.

use crate::{error::AppError, services::ffmpeg::Transcoder};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::TempPath;

const TEMP_PREFIX: &str = "nsfw-";

/// Effective content type of a transcoded GIF.
pub const TRANSCODED_CONTENT_TYPE: &str = "video/mp4";

/// What the declared content type says the bytes are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    /// `image/gif`: staged as video after transcoding
    AnimatedGif,
}

/// Content type parsed into kind and file suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub kind: MediaKind,
    /// Lowercased `type/subtype` without parameters
    pub essence: String,
    pub suffix: &'static str,
}

impl MediaType {
    /// Parse a declared content type.
    ///
    /// # Errors
    ///
    /// `UnknownContentType` for anything that is not `image/*` or `video/*`.
    pub fn parse(content_type: &str) -> Result<Self, AppError> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let (top, sub) = essence
            .split_once('/')
            .ok_or_else(|| AppError::UnknownContentType(content_type.to_string()))?;

        let (kind, suffix) = match (top, sub) {
            ("image", "gif") => (MediaKind::AnimatedGif, ".gif"),
            ("image", sub) => (MediaKind::Image, image_suffix(sub)),
            ("video", sub) => (MediaKind::Video, video_suffix(sub)),
            _ => return Err(AppError::UnknownContentType(content_type.to_string())),
        };

        Ok(Self {
            kind,
            essence,
            suffix,
        })
    }
}

fn video_suffix(subtype: &str) -> &'static str {
    match subtype {
        "mp4" => ".mp4",
        "webm" => ".webm",
        "quicktime" => ".mov",
        "x-msvideo" => ".avi",
        "x-matroska" => ".mkv",
        "mpeg" => ".mpeg",
        "ogg" => ".ogv",
        "3gpp" => ".3gp",
        _ => ".mp4",
    }
}

fn image_suffix(subtype: &str) -> &'static str {
    match subtype {
        "png" => ".png",
        "jpeg" | "jpg" => ".jpg",
        "webp" => ".webp",
        "bmp" => ".bmp",
        "tiff" => ".tiff",
        _ => "",
    }
}

/// Media staged on disk for one request.
///
/// Dropping it deletes the file.
#[derive(Debug)]
pub struct StagedMedia {
    file: TempPath,
    content_type: String,
    original_path: String,
    is_video: bool,
}

impl StagedMedia {
    /// Final file the hasher and classifier read.
    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Effective content type (`video/mp4` for transcoded GIFs).
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Name of the first temp file written for this request.
    pub fn original_path(&self) -> &str {
        &self.original_path
    }

    pub fn is_video(&self) -> bool {
        self.is_video
    }
}

/// Writes submitted bytes to disk and normalises GIFs to MP4.
pub struct MediaStager {
    dir: PathBuf,
    transcoder: Arc<dyn Transcoder>,
}

impl MediaStager {
    pub fn new(dir: Option<PathBuf>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            dir: dir.unwrap_or_else(std::env::temp_dir),
            transcoder,
        }
    }

    /// Stage `bytes` declared as `content_type`.
    ///
    /// # Errors
    ///
    /// - `UnknownContentType`: not an image or video (nothing is written)
    /// - `Staging`: temp file could not be created or written
    /// - `Transcode`: GIF conversion failed
    ///
    /// On error every file created so far has already been removed.
    pub async fn stage(&self, bytes: &[u8], content_type: &str) -> Result<StagedMedia, AppError> {
        let media_type = MediaType::parse(content_type)?;
        let staged = self.write_temp(bytes, media_type.suffix).await?;
        let original_path = staged.display().to_string();

        match media_type.kind {
            MediaKind::Image => Ok(StagedMedia {
                file: staged,
                content_type: media_type.essence,
                original_path,
                is_video: false,
            }),
            MediaKind::Video => Ok(StagedMedia {
                file: staged,
                content_type: media_type.essence,
                original_path,
                is_video: true,
            }),
            MediaKind::AnimatedGif => {
                let mp4 = self.reserve_temp(".mp4")?;
                self.transcoder.gif_to_mp4(&staged, &mp4).await?;
                self.ensure_non_empty(&mp4).await?;

                // The MP4 exists; the GIF is no longer needed
                if let Err(e) = staged.close() {
                    tracing::warn!("Failed to remove staged GIF {}: {}", original_path, e);
                }

                Ok(StagedMedia {
                    file: mp4,
                    content_type: TRANSCODED_CONTENT_TYPE.to_string(),
                    original_path,
                    is_video: true,
                })
            }
        }
    }

    /// Create an empty, uniquely named temp file and return its drop guard.
    fn reserve_temp(&self, suffix: &str) -> Result<TempPath, AppError> {
        tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(suffix)
            .tempfile_in(&self.dir)
            .map(|file| file.into_temp_path())
            .map_err(|e| AppError::Staging(format!("Failed to create temp file: {}", e)))
    }

    async fn write_temp(&self, bytes: &[u8], suffix: &str) -> Result<TempPath, AppError> {
        let path = self.reserve_temp(suffix)?;
        // On failure `path` is dropped here, removing the file
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::Staging(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(path)
    }

    async fn ensure_non_empty(&self, path: &Path) -> Result<(), AppError> {
        let len = tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .map_err(|e| AppError::Transcode(format!("Missing transcode output: {}", e)))?;
        if len == 0 {
            return Err(AppError::Transcode("Transcode produced an empty file".to_string()));
        }
        Ok(())
    }
}
