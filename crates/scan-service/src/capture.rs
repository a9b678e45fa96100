//! Frame sources feeding the plate scanner

use crate::error::ScanError;
use async_trait::async_trait;
use common::frame_extractor::{extract_frame_jpeg, probe_frame_dimensions, FrameGrab};
use common::scans::RasterImage;
use image::{imageops, ImageFormat};
use telemetry::metrics::FRAME_CAPTURES;
use tracing::{debug, warn};

/// Source of a single still frame per scan
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn grab_frame(&self) -> Result<RasterImage, ScanError>;

    /// Metrics label for the source
    fn kind(&self) -> &'static str;
}

/// Camera device, RTSP stream or video file read through FFmpeg
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    grab: FrameGrab,
}

impl FfmpegFrameSource {
    pub fn new(source_uri: impl Into<String>, max_width: u32, max_height: u32) -> Self {
        Self {
            grab: FrameGrab::new(source_uri).with_bounds(max_width, max_height),
        }
    }

    pub fn with_input_format(mut self, format: impl Into<String>) -> Self {
        self.grab = self.grab.with_input_format(format);
        self
    }

    /// JPEG quality handed to FFmpeg (2 best, 31 worst)
    pub fn with_jpeg_quality(mut self, quality: u32) -> Self {
        self.grab.quality = quality;
        self
    }

    /// Native resolution of the source, before bounding
    pub async fn probe(&self) -> Result<(u32, u32), ScanError> {
        let uri = self.grab.source_uri.clone();
        tokio::task::spawn_blocking(move || probe_frame_dimensions(&uri))
            .await
            .map_err(|e| ScanError::camera(format!("probe task failed: {}", e)))?
            .map_err(|e| ScanError::camera(format!("{:#}", e)))
    }

    async fn grab_inner(&self) -> Result<RasterImage, ScanError> {
        let grab = self.grab.clone();
        let jpeg = tokio::task::spawn_blocking(move || extract_frame_jpeg(&grab))
            .await
            .map_err(|e| ScanError::camera(format!("capture task failed: {}", e)))?
            .map_err(|e| ScanError::camera(format!("{:#}", e)))?;

        let frame = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .map_err(|e| ScanError::camera(format!("camera returned an unreadable frame: {}", e)))?
            .to_rgba8();

        Ok(bound_frame(frame, self.grab.max_width, self.grab.max_height))
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn grab_frame(&self) -> Result<RasterImage, ScanError> {
        let result = self.grab_inner().await;

        match &result {
            Ok(frame) => {
                FRAME_CAPTURES.with_label_values(&[self.kind(), "success"]).inc();
                debug!(
                    source = %self.grab.source_uri,
                    width = frame.width(),
                    height = frame.height(),
                    "frame captured"
                );
            }
            Err(e) => {
                FRAME_CAPTURES.with_label_values(&[self.kind(), "failure"]).inc();
                warn!(source = %self.grab.source_uri, error = %e, "frame capture failed");
            }
        }

        result
    }

    fn kind(&self) -> &'static str {
        "ffmpeg"
    }
}

/// Serves the same encoded image on every grab
#[derive(Debug, Clone)]
pub struct StillFrameSource {
    frame: RasterImage,
}

impl StillFrameSource {
    pub fn new(frame: RasterImage) -> Self {
        Self { frame }
    }

    /// Decode an encoded still (JPEG, PNG, ...) once up front
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScanError> {
        Ok(Self::new(decode_frame(bytes, None)?))
    }
}

#[async_trait]
impl FrameSource for StillFrameSource {
    async fn grab_frame(&self) -> Result<RasterImage, ScanError> {
        FRAME_CAPTURES.with_label_values(&[self.kind(), "success"]).inc();
        Ok(self.frame.clone())
    }

    fn kind(&self) -> &'static str {
        "still"
    }
}

/// Downscale `image` to fit within `max_width x max_height`, keeping its
/// aspect ratio. Smaller images are returned unchanged; 0 leaves an axis
/// unbounded.
pub fn bound_frame(image: RasterImage, max_width: u32, max_height: u32) -> RasterImage {
    let (width, height) = image.dimensions();
    let limit_w = if max_width == 0 { width } else { max_width };
    let limit_h = if max_height == 0 { height } else { max_height };

    if width <= limit_w && height <= limit_h {
        return image;
    }

    let scale = (limit_w as f64 / width as f64).min(limit_h as f64 / height as f64);
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, limit_w.max(1));
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, limit_h.max(1));

    imageops::resize(&image, new_width, new_height, imageops::FilterType::Triangle)
}

/// Decode an encoded image into RGBA8.
///
/// `format` is a file extension or MIME type hint; without it the format is
/// guessed from the content.
pub fn decode_frame(bytes: &[u8], format: Option<&str>) -> Result<RasterImage, ScanError> {
    if bytes.is_empty() {
        return Err(ScanError::tensor_prep("image data is empty"));
    }

    let image = match format {
        Some(hint) => {
            let format = ImageFormat::from_mime_type(hint)
                .or_else(|| ImageFormat::from_extension(hint.trim_start_matches('.')))
                .ok_or_else(|| ScanError::tensor_prep(format!("unknown image format '{}'", hint)))?;
            image::load_from_memory_with_format(bytes, format)
        }
        None => image::load_from_memory(bytes),
    }
    .map_err(|e| ScanError::tensor_prep(format!("unreadable image: {}", e)))?;

    Ok(image.to_rgba8())
}
