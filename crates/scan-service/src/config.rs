use crate::vision::{Alphabet, ChannelLayout, DecoderOptions, ElementType, LetterboxSpec};
use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Model and pipeline settings for a [`crate::pipeline::PlateScanner`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Path to the plate detection ONNX model
    #[serde(default = "default_detector_model_path")]
    pub detector_model_path: String,

    #[serde(default = "default_detector_input_name")]
    pub detector_input_name: String,

    #[serde(default = "default_detector_output_name")]
    pub detector_output_name: String,

    /// Detector input size (square)
    #[serde(default = "default_detector_input_size")]
    pub detector_input_size: u32,

    #[serde(default = "default_detector_element")]
    pub detector_element: ElementType,

    /// Minimum objectness x class score (0.0 to 1.0)
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,

    /// IoU (Intersection over Union) threshold for NMS
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Max sampled coordinate magnitude still treated as normalized
    #[serde(default = "default_normalized_coord_limit")]
    pub normalized_coord_limit: f32,

    #[serde(default = "default_coord_sample_size")]
    pub coord_sample_size: usize,

    /// Maximum number of plate candidates read per frame
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    /// Path to the character-grid OCR ONNX model
    #[serde(default = "default_ocr_model_path")]
    pub ocr_model_path: String,

    #[serde(default = "default_ocr_input_name")]
    pub ocr_input_name: String,

    #[serde(default = "default_ocr_output_name")]
    pub ocr_output_name: String,

    #[serde(default = "default_ocr_input_width")]
    pub ocr_input_width: u32,

    #[serde(default = "default_ocr_input_height")]
    pub ocr_input_height: u32,

    /// 1 for grayscale, 3 for RGB
    #[serde(default = "default_ocr_channels")]
    pub ocr_channels: usize,

    #[serde(default = "default_ocr_element")]
    pub ocr_element: ElementType,

    /// OCR symbols indexed by class id, pad symbol included
    #[serde(default = "default_alphabet")]
    pub alphabet: String,

    #[serde(default = "default_pad_symbol")]
    pub pad_symbol: char,

    /// Character slots emitted by the OCR model
    #[serde(default = "default_ocr_slots")]
    pub ocr_slots: usize,

    /// Bound on a whole detection attempt
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,

    /// Execution provider preference (CPU, CUDA, TensorRT)
    #[serde(default = "default_execution_provider")]
    pub execution_provider: String,

    /// GPU device ID (0, 1, 2, etc.)
    #[serde(default)]
    pub device_id: i32,

    /// Number of intra-operation threads
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    /// Number of inter-operation threads
    #[serde(default = "default_inter_threads")]
    pub inter_threads: usize,
}

fn default_detector_model_path() -> String {
    "models/plate_detector.onnx".to_string()
}

fn default_detector_input_name() -> String {
    "images".to_string()
}

fn default_detector_output_name() -> String {
    "output0".to_string()
}

fn default_detector_input_size() -> u32 {
    640
}

fn default_detector_element() -> ElementType {
    ElementType::F32
}

fn default_score_threshold() -> f32 {
    0.3
}

fn default_iou_threshold() -> f32 {
    0.4
}

fn default_normalized_coord_limit() -> f32 {
    1.5
}

fn default_coord_sample_size() -> usize {
    50
}

fn default_max_detections() -> usize {
    10
}

fn default_ocr_model_path() -> String {
    "models/plate_ocr.onnx".to_string()
}

fn default_ocr_input_name() -> String {
    "input".to_string()
}

fn default_ocr_output_name() -> String {
    "output".to_string()
}

fn default_ocr_input_width() -> u32 {
    128
}

fn default_ocr_input_height() -> u32 {
    64
}

fn default_ocr_channels() -> usize {
    1
}

fn default_ocr_element() -> ElementType {
    ElementType::U8
}

fn default_alphabet() -> String {
    crate::vision::ocr::DEFAULT_ALPHABET.to_string()
}

fn default_pad_symbol() -> char {
    crate::vision::ocr::DEFAULT_PAD
}

fn default_ocr_slots() -> usize {
    crate::vision::ocr::DEFAULT_SLOTS
}

fn default_scan_timeout_secs() -> u64 {
    15
}

fn default_execution_provider() -> String {
    "CPU".to_string()
}

fn default_intra_threads() -> usize {
    4
}

fn default_inter_threads() -> usize {
    1
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            detector_model_path: default_detector_model_path(),
            detector_input_name: default_detector_input_name(),
            detector_output_name: default_detector_output_name(),
            detector_input_size: default_detector_input_size(),
            detector_element: default_detector_element(),
            score_threshold: default_score_threshold(),
            iou_threshold: default_iou_threshold(),
            normalized_coord_limit: default_normalized_coord_limit(),
            coord_sample_size: default_coord_sample_size(),
            max_detections: default_max_detections(),
            ocr_model_path: default_ocr_model_path(),
            ocr_input_name: default_ocr_input_name(),
            ocr_output_name: default_ocr_output_name(),
            ocr_input_width: default_ocr_input_width(),
            ocr_input_height: default_ocr_input_height(),
            ocr_channels: default_ocr_channels(),
            ocr_element: default_ocr_element(),
            alphabet: default_alphabet(),
            pad_symbol: default_pad_symbol(),
            ocr_slots: default_ocr_slots(),
            scan_timeout_secs: default_scan_timeout_secs(),
            execution_provider: default_execution_provider(),
            device_id: 0,
            intra_threads: default_intra_threads(),
            inter_threads: default_inter_threads(),
        }
    }
}

impl ScannerConfig {
    /// Apply environment overrides on top of the defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            detector_model_path: env_or("DETECTOR_MODEL_PATH", defaults.detector_model_path),
            detector_input_name: env_or("DETECTOR_INPUT_NAME", defaults.detector_input_name),
            detector_output_name: env_or("DETECTOR_OUTPUT_NAME", defaults.detector_output_name),
            detector_input_size: env_parse("DETECTOR_INPUT_SIZE", defaults.detector_input_size)?,
            detector_element: env_element("DETECTOR_ELEMENT_TYPE", defaults.detector_element)?,
            score_threshold: env_parse("SCORE_THRESHOLD", defaults.score_threshold)?,
            iou_threshold: env_parse("IOU_THRESHOLD", defaults.iou_threshold)?,
            normalized_coord_limit: env_parse(
                "NORMALIZED_COORD_LIMIT",
                defaults.normalized_coord_limit,
            )?,
            coord_sample_size: env_parse("COORD_SAMPLE_SIZE", defaults.coord_sample_size)?,
            max_detections: env_parse("MAX_DETECTIONS", defaults.max_detections)?,
            ocr_model_path: env_or("OCR_MODEL_PATH", defaults.ocr_model_path),
            ocr_input_name: env_or("OCR_INPUT_NAME", defaults.ocr_input_name),
            ocr_output_name: env_or("OCR_OUTPUT_NAME", defaults.ocr_output_name),
            ocr_input_width: env_parse("OCR_INPUT_WIDTH", defaults.ocr_input_width)?,
            ocr_input_height: env_parse("OCR_INPUT_HEIGHT", defaults.ocr_input_height)?,
            ocr_channels: env_parse("OCR_CHANNELS", defaults.ocr_channels)?,
            ocr_element: env_element("OCR_ELEMENT_TYPE", defaults.ocr_element)?,
            alphabet: env_or("OCR_ALPHABET", defaults.alphabet),
            pad_symbol: env_parse("OCR_PAD_SYMBOL", defaults.pad_symbol)?,
            ocr_slots: env_parse("OCR_SLOTS", defaults.ocr_slots)?,
            scan_timeout_secs: env_parse("SCAN_TIMEOUT_SECS", defaults.scan_timeout_secs)?,
            execution_provider: env_or("EXECUTION_PROVIDER", defaults.execution_provider),
            device_id: env_parse("DEVICE_ID", defaults.device_id)?,
            intra_threads: env_parse("INTRA_THREADS", defaults.intra_threads)?,
            inter_threads: env_parse("INTER_THREADS", defaults.inter_threads)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            bail!("score_threshold must be within 0..=1, got {}", self.score_threshold);
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            bail!("iou_threshold must be within 0..=1, got {}", self.iou_threshold);
        }
        if self.detector_input_size == 0 || self.ocr_input_width == 0 || self.ocr_input_height == 0
        {
            bail!("model input sizes must be non-zero");
        }
        if self.scan_timeout_secs == 0 {
            bail!("scan_timeout_secs must be non-zero");
        }
        if self.max_detections == 0 {
            bail!("max_detections must be non-zero");
        }
        if self.ocr_slots == 0 {
            bail!("ocr_slots must be non-zero");
        }
        self.ocr_spec()?;
        self.alphabet()?;
        Ok(())
    }

    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            score_threshold: self.score_threshold,
            iou_threshold: self.iou_threshold,
            normalized_coord_limit: self.normalized_coord_limit,
            coord_sample_size: self.coord_sample_size,
            max_detections: self.max_detections,
        }
    }

    pub fn detector_spec(&self) -> LetterboxSpec {
        LetterboxSpec::detector(
            self.detector_input_size,
            self.detector_input_size,
            self.detector_element,
        )
    }

    pub fn ocr_spec(&self) -> Result<LetterboxSpec> {
        let channels = ChannelLayout::from_count(self.ocr_channels)
            .ok_or_else(|| anyhow!("ocr_channels must be 1 or 3, got {}", self.ocr_channels))?;
        Ok(LetterboxSpec::ocr(
            self.ocr_input_width,
            self.ocr_input_height,
            channels,
            self.ocr_element,
        ))
    }

    pub fn alphabet(&self) -> Result<Alphabet> {
        Alphabet::new(&self.alphabet, self.pad_symbol).map_err(|e| anyhow!(e))
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

/// Process-level settings for the scan service binary
#[derive(Debug, Clone)]
pub struct ScanServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Identifier of this scanner instance (site, lane, camera)
    pub node_id: String,

    /// Live video source for camera scans (device path, RTSP URL, file)
    pub camera_uri: Option<String>,

    /// FFmpeg demuxer to force for the camera (e.g. "v4l2")
    pub camera_format: Option<String>,

    /// Captured frames are downscaled to fit within these bounds
    pub capture_max_width: u32,
    pub capture_max_height: u32,

    /// FFmpeg JPEG quality for grabbed frames (2 best, 31 worst)
    pub capture_jpeg_quality: u32,

    /// External vehicle registry endpoint (optional)
    pub vehicle_lookup_url: Option<Url>,
    pub vehicle_lookup_api_key: Option<String>,
    pub vehicle_lookup_query_param: String,

    pub scanner: ScannerConfig,
}

impl ScanServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("SCAN_SERVICE_ADDR", "0.0.0.0:8090".to_string());

        let node_id = env::var("NODE_ID").unwrap_or_else(|_| {
            format!(
                "scan-service-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        let vehicle_lookup_url = env::var("VEHICLE_LOOKUP_URL")
            .ok()
            .map(|s| Url::parse(&s).context("Invalid VEHICLE_LOOKUP_URL"))
            .transpose()?;

        Ok(Self {
            bind_addr,
            node_id,
            camera_uri: env::var("CAMERA_URI").ok(),
            camera_format: env::var("CAMERA_FORMAT").ok(),
            capture_max_width: env_parse("CAPTURE_MAX_WIDTH", 1280)?,
            capture_max_height: env_parse("CAPTURE_MAX_HEIGHT", 720)?,
            capture_jpeg_quality: env_parse("CAPTURE_JPEG_QUALITY", 2)?,
            vehicle_lookup_url,
            vehicle_lookup_api_key: env::var("VEHICLE_LOOKUP_API_KEY").ok(),
            vehicle_lookup_query_param: env_or("VEHICLE_LOOKUP_QUERY_PARAM", "plate".to_string()),
            scanner: ScannerConfig::from_env()?,
        })
    }
}

fn env_or(name: &str, default: String) -> String {
    env::var(name).unwrap_or(default)
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {}={:?}: {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

fn env_element(name: &str, default: ElementType) -> Result<ElementType> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "u8" | "uint8" => Ok(ElementType::U8),
            "f32" | "float32" | "float" => Ok(ElementType::F32),
            other => bail!("Invalid {}={:?}: expected u8 or f32", name, other),
        },
        Err(_) => Ok(default),
    }
}
