//! Plate scanning pipeline
//!
//! One attempt runs: letterbox the frame, run the detector, decode boxes, then
//! for each box in score order crop the plate, run OCR and extract plate text.
//! The first box that yields a plate wins. Model runs happen on the blocking
//! pool and the whole attempt is bounded by the configured timeout.

use crate::capture::FrameSource;
use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::session::{
    InferenceSession, ModelKind, ModelOutput, OnnxSessionLoader, SessionCache, SessionLoader,
};
use crate::vision::{
    crop_plate, decode_detections, decode_slots, letterbox, Alphabet, DecoderOptions,
    LetterboxSpec, LetterboxTransform, PlateCrop, PreparedTensor,
};
use common::plates::extract_plate;
use common::scans::{Detection, RasterImage};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::metrics::{
    MODEL_INFERENCE_TIME, PLATE_DETECTIONS, PLATE_SCANS, PLATE_SCAN_DURATION,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Result of a successful scan
#[derive(Debug, Clone)]
pub struct PlateScan {
    /// Extracted, normalized plate
    pub plate_text: String,

    /// Mean OCR slot confidence, percent
    pub confidence: Option<f32>,

    /// OCR text before plate extraction
    pub raw_text: String,

    /// Detection the plate was read from, in detector input coordinates
    pub detection: Detection,

    pub crop: PlateCrop,
}

/// Runs plate scans against a pair of lazily loaded models.
///
/// At most one attempt runs at a time; a concurrent call fails fast with
/// [`ScanError::ScanInProgress`].
pub struct PlateScanner {
    sessions: SessionCache,
    detector_spec: LetterboxSpec,
    ocr_spec: LetterboxSpec,
    decoder: DecoderOptions,
    alphabet: Arc<Alphabet>,
    ocr_slots: usize,
    timeout: Duration,
    in_flight: Mutex<()>,
}

impl PlateScanner {
    pub fn new(config: &ScannerConfig, loader: Arc<dyn SessionLoader>) -> anyhow::Result<Self> {
        config.validate()?;

        Ok(Self {
            sessions: SessionCache::new(loader),
            detector_spec: config.detector_spec(),
            ocr_spec: config.ocr_spec()?,
            decoder: config.decoder_options(),
            alphabet: Arc::new(config.alphabet()?),
            ocr_slots: config.ocr_slots,
            timeout: config.scan_timeout(),
            in_flight: Mutex::new(()),
        })
    }

    /// Scanner backed by the ONNX models named in `config`
    pub fn from_config(config: &ScannerConfig) -> anyhow::Result<Self> {
        Self::new(config, Arc::new(OnnxSessionLoader::new(config.clone())))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Find and read a plate in `frame`
    pub async fn detect_plate(&self, frame: RasterImage) -> Result<PlateScan, ScanError> {
        let _guard = self.begin()?;
        self.bounded(self.attempt(frame)).await
    }

    /// Grab a frame from `source` and scan it
    pub async fn scan_source(&self, source: &dyn FrameSource) -> Result<PlateScan, ScanError> {
        let _guard = self.begin()?;
        self.bounded(async {
            let frame = source.grab_frame().await?;
            self.attempt(frame).await
        })
        .await
    }

    fn begin(&self) -> Result<MutexGuard<'_, ()>, ScanError> {
        self.in_flight.try_lock().map_err(|_| {
            let err = ScanError::ScanInProgress;
            PLATE_SCANS.with_label_values(&[err.outcome()]).inc();
            debug!("rejecting scan, another attempt is running");
            err
        })
    }

    async fn bounded<F>(&self, attempt: F) -> Result<PlateScan, ScanError>
    where
        F: Future<Output = Result<PlateScan, ScanError>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::ScanTimeout(self.timeout)),
        };
        let elapsed = started.elapsed();
        PLATE_SCAN_DURATION.observe(elapsed.as_secs_f64());

        match &result {
            Ok(scan) => {
                PLATE_SCANS.with_label_values(&["success"]).inc();
                info!(
                    plate = %scan.plate_text,
                    confidence = ?scan.confidence,
                    score = scan.detection.score,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "plate scanned"
                );
            }
            Err(e) => {
                PLATE_SCANS.with_label_values(&[e.outcome()]).inc();
                match e {
                    ScanError::NoDetectionFound => {
                        debug!(elapsed_ms = elapsed.as_millis() as u64, "no plate found")
                    }
                    _ => warn!(
                        error = %e,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "plate scan failed"
                    ),
                }
            }
        }

        result
    }

    async fn attempt(&self, frame: RasterImage) -> Result<PlateScan, ScanError> {
        let frame = Arc::new(frame);

        let detector = self.sessions.get(ModelKind::Detector).await?;
        let (detections, transform) = {
            let frame = frame.clone();
            let spec = self.detector_spec;
            let options = self.decoder;
            run_blocking(move || {
                let tensor = letterbox(&frame, &spec)?;
                let transform = *tensor.transform();
                let output = run_timed(detector.as_ref(), ModelKind::Detector, &tensor)?;
                let detections = decode_detections(&output, spec.width, spec.height, &options);
                Ok((detections, transform))
            })
            .await?
        };

        PLATE_DETECTIONS
            .with_label_values(&["detector"])
            .inc_by(detections.len() as u64);
        debug!(count = detections.len(), "plate candidates decoded");

        if detections.is_empty() {
            return Err(ScanError::NoDetectionFound);
        }

        let ocr = self.sessions.get(ModelKind::Ocr).await?;
        for detection in detections {
            let (crop, raw_text, confidence) = self
                .read_plate(&ocr, &frame, &detection, &transform)
                .await?;
            let plate_text = extract_plate(&raw_text);

            if plate_text.is_empty() {
                debug!(raw = %raw_text, score = detection.score, "candidate has no plate text");
                continue;
            }

            PLATE_DETECTIONS.with_label_values(&["ocr"]).inc();
            return Ok(PlateScan {
                plate_text,
                confidence,
                raw_text,
                detection,
                crop,
            });
        }

        Err(ScanError::NoDetectionFound)
    }

    async fn read_plate(
        &self,
        ocr: &Arc<dyn InferenceSession>,
        frame: &RasterImage,
        detection: &Detection,
        transform: &LetterboxTransform,
    ) -> Result<(PlateCrop, String, Option<f32>), ScanError> {
        let crop = crop_plate(frame, &detection.bbox, transform);

        let ocr = ocr.clone();
        let spec = self.ocr_spec;
        let alphabet = self.alphabet.clone();
        let slots = self.ocr_slots;

        run_blocking(move || {
            let tensor = letterbox(&crop.image, &spec)?;
            let output = run_timed(ocr.as_ref(), ModelKind::Ocr, &tensor)?;
            let decoded = decode_slots(&output, &alphabet, slots);
            Ok((crop, decoded.text, decoded.confidence))
        })
        .await
    }
}

fn run_timed(
    session: &dyn InferenceSession,
    kind: ModelKind,
    tensor: &PreparedTensor,
) -> anyhow::Result<ModelOutput> {
    let started = Instant::now();
    let output = session.run(tensor)?;
    MODEL_INFERENCE_TIME
        .with_label_values(&[kind.as_str(), session.provider()])
        .observe(started.elapsed().as_secs_f64());
    Ok(output)
}

async fn run_blocking<T, F>(task: F) -> Result<T, ScanError>
where
    F: FnOnce() -> Result<T, ScanError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ScanError::Inference(anyhow::anyhow!("inference task failed: {}", e)))?
}
