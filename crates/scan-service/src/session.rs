//! Inference sessions for the detector and OCR models
//!
//! Sessions are expensive to build, so [`SessionCache`] creates each one on
//! first use and shares it afterwards. Loading happens on the blocking pool.

use crate::config::ScannerConfig;
use crate::vision::{PreparedTensor, TensorData};
use anyhow::{anyhow, Context, Result};
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
    value::Value,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use telemetry::metrics::MODEL_SESSIONS_LOADED;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};

/// Raw `f32` model output with its dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Detector,
    Ocr,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Detector, ModelKind::Ocr];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Detector => "detector",
            ModelKind::Ocr => "ocr",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded model that maps one input tensor to one output tensor
pub trait InferenceSession: Send + Sync {
    fn run(&self, input: &PreparedTensor) -> Result<ModelOutput>;

    /// Execution provider actually in use (CPU, CUDA, TensorRT)
    fn provider(&self) -> &str;
}

/// Builds sessions on demand; runs on the blocking pool
pub trait SessionLoader: Send + Sync {
    fn load(&self, kind: ModelKind) -> Result<Arc<dyn InferenceSession>>;
}

/// Execution settings shared by both ONNX models
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub execution_provider: String,
    pub device_id: i32,
    pub intra_threads: usize,
    pub inter_threads: usize,
}

impl From<&ScannerConfig> for ProviderSettings {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            execution_provider: config.execution_provider.clone(),
            device_id: config.device_id,
            intra_threads: config.intra_threads,
            inter_threads: config.inter_threads,
        }
    }
}

/// ONNX Runtime session
pub struct OnnxSession {
    session: Mutex<Session>,
    provider: String,
    input_name: String,
    output_name: String,
    model_path: String,
}

impl OnnxSession {
    /// Load a model, falling back TensorRT -> CUDA -> CPU as each provider fails
    pub fn load(
        model_path: &str,
        input_name: &str,
        output_name: &str,
        settings: &ProviderSettings,
    ) -> Result<Self> {
        let (session, provider) = create_session(model_path, settings)?;
        info!(model = model_path, provider = %provider, "ONNX session ready");

        Ok(Self {
            session: Mutex::new(session),
            provider,
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
            model_path: model_path.to_string(),
        })
    }
}

impl InferenceSession for OnnxSession {
    fn run(&self, input: &PreparedTensor) -> Result<ModelOutput> {
        let shape = IxDyn(input.shape());
        let input_name = self.input_name.as_str();

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Failed to lock session for {}: {}", self.model_path, e))?;

        let outputs = match input.data() {
            TensorData::U8(data) => {
                let array = Array::from_shape_vec(shape, data.clone())?;
                session.run(ort::inputs![input_name => Value::from_array(array)?])?
            }
            TensorData::F32(data) => {
                let array = Array::from_shape_vec(shape, data.clone())?;
                session.run(ort::inputs![input_name => Value::from_array(array)?])?
            }
        };

        let output_value = outputs
            .get(self.output_name.as_str())
            .or_else(|| outputs.get("output0"))
            .or_else(|| outputs.get("output"))
            .with_context(|| {
                format!(
                    "No output tensor found in {} (tried: {}, output0, output)",
                    self.model_path, self.output_name
                )
            })?;
        let (shape, data) = output_value.try_extract_tensor::<f32>()?;

        Ok(ModelOutput {
            shape: shape.as_ref().iter().map(|&x| x as usize).collect(),
            data: data.to_vec(),
        })
    }

    fn provider(&self) -> &str {
        &self.provider
    }
}

fn session_builder(settings: &ProviderSettings) -> Result<SessionBuilder> {
    Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(settings.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(settings.inter_threads)
        .context("Failed to set inter threads")
}

fn create_session(model_path: &str, settings: &ProviderSettings) -> Result<(Session, String)> {
    match settings.execution_provider.to_uppercase().as_str() {
        "TENSORRT" => {
            info!("Attempting TensorRT for {}", model_path);
            let result = session_builder(settings)?
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(settings.device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(settings.device_id)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])
                .context("Failed to set execution providers")?
                .commit_from_file(model_path);

            match result {
                Ok(session) => Ok((session, "TensorRT".to_string())),
                Err(e) => {
                    warn!("TensorRT failed, trying CUDA: {}", e);
                    try_cuda(model_path, settings)
                }
            }
        }
        "CUDA" => try_cuda(model_path, settings),
        _ => try_cpu(model_path, settings),
    }
}

fn try_cuda(model_path: &str, settings: &ProviderSettings) -> Result<(Session, String)> {
    info!("Attempting CUDA for {}", model_path);
    let result = session_builder(settings)?
        .with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(settings.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])
        .context("Failed to set execution providers")?
        .commit_from_file(model_path);

    match result {
        Ok(session) => Ok((session, "CUDA".to_string())),
        Err(e) => {
            warn!("CUDA failed, using CPU: {}", e);
            try_cpu(model_path, settings)
        }
    }
}

fn try_cpu(model_path: &str, settings: &ProviderSettings) -> Result<(Session, String)> {
    info!("Using CPU for {}", model_path);
    let session = session_builder(settings)?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load model from {}", model_path))?;
    Ok((session, "CPU".to_string()))
}

/// Loads the detector and OCR models named in a [`ScannerConfig`]
pub struct OnnxSessionLoader {
    config: ScannerConfig,
    settings: ProviderSettings,
}

impl OnnxSessionLoader {
    pub fn new(config: ScannerConfig) -> Self {
        let settings = ProviderSettings::from(&config);
        Self { config, settings }
    }
}

impl SessionLoader for OnnxSessionLoader {
    fn load(&self, kind: ModelKind) -> Result<Arc<dyn InferenceSession>> {
        let config = &self.config;
        let (path, input, output) = match kind {
            ModelKind::Detector => (
                &config.detector_model_path,
                &config.detector_input_name,
                &config.detector_output_name,
            ),
            ModelKind::Ocr => (
                &config.ocr_model_path,
                &config.ocr_input_name,
                &config.ocr_output_name,
            ),
        };

        let session = OnnxSession::load(path, input, output, &self.settings)
            .with_context(|| format!("Failed to load {} model", kind))?;
        Ok(Arc::new(session))
    }
}

type SessionCell = Arc<OnceCell<Arc<dyn InferenceSession>>>;

/// Lazily initialized, shared sessions keyed by [`ModelKind`].
///
/// Concurrent callers asking for the same kind wait on a single load. A failed
/// load leaves the slot empty so the next call retries.
pub struct SessionCache {
    loader: Arc<dyn SessionLoader>,
    cells: RwLock<HashMap<ModelKind, SessionCell>>,
}

impl SessionCache {
    pub fn new(loader: Arc<dyn SessionLoader>) -> Self {
        Self {
            loader,
            cells: RwLock::new(HashMap::new()),
        }
    }

    async fn cell(&self, kind: ModelKind) -> SessionCell {
        if let Some(cell) = self.cells.read().await.get(&kind) {
            return cell.clone();
        }

        self.cells
            .write()
            .await
            .entry(kind)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Get the session for `kind`, loading it on first use.
    ///
    /// The load runs in its own task and fills the slot even if this caller
    /// stops waiting, so a timed out scan still leaves a warm session behind.
    pub async fn get(&self, kind: ModelKind) -> Result<Arc<dyn InferenceSession>> {
        let cell = self.cell(kind).await;
        if let Some(session) = cell.get() {
            return Ok(session.clone());
        }

        let loader = self.loader.clone();
        tokio::spawn(load_into(cell, loader, kind))
            .await
            .context("Session loader task failed")?
    }

    /// Load every model up front
    pub async fn preload(&self) -> Result<()> {
        for kind in ModelKind::ALL {
            self.get(kind).await?;
        }
        Ok(())
    }

    /// Kinds whose session is currently loaded
    pub async fn loaded(&self) -> Vec<ModelKind> {
        let cells = self.cells.read().await;
        ModelKind::ALL
            .into_iter()
            .filter(|kind| cells.get(kind).is_some_and(|cell| cell.initialized()))
            .collect()
    }

    /// Drop all sessions; later calls load them again
    pub async fn shutdown(&self) {
        let mut cells = self.cells.write().await;
        let released = cells.values().filter(|cell| cell.initialized()).count();
        cells.clear();

        MODEL_SESSIONS_LOADED.sub(released as i64);
        info!(released, "Model sessions released");
    }
}

async fn load_into(
    cell: SessionCell,
    loader: Arc<dyn SessionLoader>,
    kind: ModelKind,
) -> Result<Arc<dyn InferenceSession>> {
    let session = cell
        .get_or_try_init(|| async move {
            let started = std::time::Instant::now();
            let session = tokio::task::spawn_blocking(move || loader.load(kind))
                .await
                .context("Session loader task failed")??;

            MODEL_SESSIONS_LOADED.inc();
            info!(
                model = %kind,
                provider = session.provider(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Model session loaded"
            );
            Ok::<_, anyhow::Error>(session)
        })
        .await?;

    Ok(session.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::LetterboxTransform;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSession(ModelOutput);

    impl InferenceSession for FixedSession {
        fn run(&self, _input: &PreparedTensor) -> Result<ModelOutput> {
            Ok(self.0.clone())
        }

        fn provider(&self) -> &str {
            "mock"
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
        fail_first: bool,
    }

    impl SessionLoader for CountingLoader {
        fn load(&self, kind: ModelKind) -> Result<Arc<dyn InferenceSession>> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                anyhow::bail!("model file missing");
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Arc::new(FixedSession(ModelOutput {
                shape: vec![1, kind as usize + 1],
                data: vec![0.0; kind as usize + 1],
            })))
        }
    }

    fn input() -> PreparedTensor {
        PreparedTensor::new(
            TensorData::F32(vec![0.0; 4]),
            vec![1, 1, 2, 2],
            LetterboxTransform::fit(2, 2, 2, 2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_get_loads_once() {
        let loader = Arc::new(CountingLoader::default());
        let cache = Arc::new(SessionCache::new(loader.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get(ModelKind::Detector).await })
            })
            .collect();

        for handle in handles {
            let session = handle.await.unwrap().unwrap();
            assert_eq!(session.provider(), "mock");
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.loaded().await, vec![ModelKind::Detector]);
    }

    #[tokio::test]
    async fn test_kinds_are_cached_separately() {
        let loader = Arc::new(CountingLoader::default());
        let cache = SessionCache::new(loader.clone());

        let detector = cache.get(ModelKind::Detector).await.unwrap();
        let ocr = cache.get(ModelKind::Ocr).await.unwrap();
        assert_eq!(detector.run(&input()).unwrap().shape, vec![1, 1]);
        assert_eq!(ocr.run(&input()).unwrap().shape, vec![1, 2]);

        cache.preload().await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.loaded().await, vec![ModelKind::Detector, ModelKind::Ocr]);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let loader = Arc::new(CountingLoader {
            fail_first: true,
            ..Default::default()
        });
        let cache = SessionCache::new(loader.clone());

        let err = cache.get(ModelKind::Ocr).await.err().unwrap();
        assert!(err.to_string().contains("model file missing"));
        assert!(cache.loaded().await.is_empty());

        assert!(cache.get(ModelKind::Ocr).await.is_ok());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_releases_sessions() {
        let loader = Arc::new(CountingLoader::default());
        let cache = SessionCache::new(loader.clone());

        cache.preload().await.unwrap();
        cache.shutdown().await;
        assert!(cache.loaded().await.is_empty());

        cache.get(ModelKind::Detector).await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_abandoned_load_still_fills_cache() {
        let loader = Arc::new(CountingLoader::default());
        let cache = Arc::new(SessionCache::new(loader.clone()));

        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            cache.get(ModelKind::Detector),
        )
        .await;
        assert!(waited.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(cache.loaded().await, vec![ModelKind::Detector]);

        cache.get(ModelKind::Detector).await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_model_file_fails_on_cpu() {
        let settings = ProviderSettings::from(&ScannerConfig::default());
        let result = OnnxSession::load("/nonexistent/plate.onnx", "images", "output0", &settings);
        assert!(result.is_err());
    }
}
