use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Scan pipeline ====
    pub static ref PLATE_SCANS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("plate_scans_total", "Total number of plate scan attempts"),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_SCAN_DURATION: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "plate_scan_duration_seconds",
                "End-to-end duration of plate scan attempts",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 15.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_DETECTIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_detections_total",
                "Detector boxes surviving non-maximum suppression",
            ),
            &["stage"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Model sessions ====
    pub static ref MODEL_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "model_inference_time_seconds",
                "Time spent on inference (excluding pre/post processing)",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0]),
            &["model", "execution_provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref MODEL_SESSIONS_LOADED: IntGauge = {
        let metric = IntGauge::new("model_sessions_loaded", "Number of loaded model sessions")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Collaborators ====
    pub static ref FRAME_CAPTURES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("frame_captures_total", "Total number of still frame grabs"),
            &["source", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref VEHICLE_LOOKUPS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "vehicle_lookups_total",
                "Total number of vehicle registry lookups",
            ),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}
