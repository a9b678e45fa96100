//! Still frame extraction from live video sources
//!
//! Grabs a single JPEG frame from a camera device, RTSP stream or file using
//! FFmpeg. The frame is downscaled by FFmpeg to fit within the requested
//! bounds while keeping its aspect ratio.

use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use tracing::{debug, error, warn};

/// Parameters for a single still-frame grab
#[derive(Debug, Clone)]
pub struct FrameGrab {
    /// Video source URI (device path, RTSP, HLS, file path, etc.)
    pub source_uri: String,

    /// FFmpeg demuxer to force for the input (e.g. "v4l2", "avfoundation")
    pub input_format: Option<String>,

    /// Maximum frame width (0 = unbounded)
    pub max_width: u32,

    /// Maximum frame height (0 = unbounded)
    pub max_height: u32,

    /// JPEG quality (2-31, lower is better quality)
    pub quality: u32,
}

impl FrameGrab {
    pub fn new(source_uri: impl Into<String>) -> Self {
        Self {
            source_uri: source_uri.into(),
            input_format: None,
            max_width: 0,
            max_height: 0,
            quality: 2,
        }
    }

    pub fn with_bounds(mut self, max_width: u32, max_height: u32) -> Self {
        self.max_width = max_width;
        self.max_height = max_height;
        self
    }

    pub fn with_input_format(mut self, format: impl Into<String>) -> Self {
        self.input_format = Some(format.into());
        self
    }

    /// Build the FFmpeg argument list for this grab
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(format) = &self.input_format {
            args.push("-f".to_string());
            args.push(format.clone());
        }

        args.extend([
            "-i".to_string(),
            self.source_uri.clone(),
            "-vframes".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vcodec".to_string(),
            "mjpeg".to_string(),
        ]);

        if let Some(filter) = self.scale_filter() {
            args.push("-vf".to_string());
            args.push(filter);
        }

        // qscale:v, 2 is high quality and 31 is low quality
        args.push("-q:v".to_string());
        args.push(self.quality.clamp(2, 31).to_string());

        args.push("pipe:1".to_string());
        args
    }

    fn scale_filter(&self) -> Option<String> {
        match (self.max_width, self.max_height) {
            (0, 0) => None,
            (w, 0) => Some(format!("scale='min({},iw)':-2", w)),
            (0, h) => Some(format!("scale=-2:'min({},ih)'", h)),
            (w, h) => Some(format!(
                "scale='min({},iw)':'min({},ih)':force_original_aspect_ratio=decrease",
                w, h
            )),
        }
    }
}

/// Extract a single JPEG frame from a video source
///
/// # Returns
/// JPEG image data as bytes
pub fn extract_frame_jpeg(grab: &FrameGrab) -> Result<Vec<u8>> {
    debug!(
        source = %grab.source_uri,
        max_width = grab.max_width,
        max_height = grab.max_height,
        quality = grab.quality,
        "extracting frame from video source"
    );

    let args = grab.ffmpeg_args();
    debug!(args = ?args, "spawning ffmpeg for frame extraction");

    let output = Command::new("ffmpeg")
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .context("failed to execute ffmpeg")?;

    if !output.status.success() {
        error!(
            source = %grab.source_uri,
            status = ?output.status,
            "ffmpeg frame extraction failed"
        );
        anyhow::bail!("ffmpeg exited with error: {:?}", output.status);
    }

    if output.stdout.is_empty() {
        warn!(source = %grab.source_uri, "ffmpeg returned empty frame data");
        anyhow::bail!("ffmpeg returned no frame data");
    }

    debug!(
        source = %grab.source_uri,
        size_bytes = output.stdout.len(),
        "frame extracted successfully"
    );

    Ok(output.stdout)
}

/// Extract frame dimensions from a video source using ffprobe
///
/// Returns (width, height) tuple
pub fn probe_frame_dimensions(source_uri: &str) -> Result<(u32, u32)> {
    debug!(source = %source_uri, "probing video dimensions");

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0",
            source_uri,
        ])
        .output()
        .context("failed to execute ffprobe")?;

    if !output.status.success() {
        anyhow::bail!("ffprobe failed: {:?}", output.status);
    }

    let output_str =
        String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;

    parse_probe_output(&output_str)
}

fn parse_probe_output(output: &str) -> Result<(u32, u32)> {
    let dimensions: Vec<&str> = output.trim().split(',').collect();
    if dimensions.len() != 2 {
        anyhow::bail!("unexpected ffprobe output format: {}", output);
    }

    let width: u32 = dimensions[0].parse().context("failed to parse width")?;
    let height: u32 = dimensions[1].parse().context("failed to parse height")?;

    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_args_unbounded() {
        let args = FrameGrab::new("rtsp://camera/stream").ffmpeg_args();

        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "rtsp://camera/stream");
        assert!(!args.contains(&"-vf".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_ffmpeg_args_bounded_device() {
        let args = FrameGrab::new("/dev/video0")
            .with_input_format("v4l2")
            .with_bounds(1280, 720)
            .ffmpeg_args();

        assert_eq!(&args[0..4], &["-f", "v4l2", "-i", "/dev/video0"]);
        let vf = args
            .iter()
            .position(|a| a == "-vf")
            .map(|i| args[i + 1].clone());
        assert_eq!(
            vf.as_deref(),
            Some("scale='min(1280,iw)':'min(720,ih)':force_original_aspect_ratio=decrease")
        );
    }

    #[test]
    fn test_quality_is_clamped() {
        let mut grab = FrameGrab::new("file.mp4");
        grab.quality = 99;
        let args = grab.ffmpeg_args();
        let q = args.iter().position(|a| a == "-q:v").map(|i| args[i + 1].clone());
        assert_eq!(q.as_deref(), Some("31"));
    }

    #[test]
    fn test_parse_probe_output() {
        assert_eq!(parse_probe_output("1920,1080\n").unwrap(), (1920, 1080));
        assert!(parse_probe_output("1920").is_err());
        assert!(parse_probe_output("wide,tall").is_err());
    }

    #[test]
    fn test_extract_frame_with_mock() {
        // Requires FFmpeg; MOCK_FFMPEG skips it in CI
        if std::env::var("MOCK_FFMPEG").is_ok() {
            return;
        }

        let grab = FrameGrab::new("testsrc=duration=1:size=320x240:rate=1")
            .with_input_format("lavfi")
            .with_bounds(160, 120);

        match extract_frame_jpeg(&grab) {
            Ok(data) => {
                assert!(!data.is_empty(), "frame data should not be empty");
                // JPEG files start with FF D8 FF
                assert_eq!(&data[0..3], &[0xFF, 0xD8, 0xFF], "should be valid JPEG");
            }
            Err(e) => {
                println!("FFmpeg not available in test environment: {}", e);
            }
        }
    }
}
