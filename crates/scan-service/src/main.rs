use anyhow::Result;
use scan_service::{
    api,
    capture::{FfmpegFrameSource, FrameSource},
    vehicle_lookup::{HttpVehicleLookup, VehicleLookup},
    PlateScanner, ScanServiceConfig, ScannerState,
};
use std::sync::Arc;
use telemetry::LogConfig;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = ScanServiceConfig::from_env()?;

    let _log_guard = telemetry::init_structured_logging(
        LogConfig::new("scan-service").with_node_id(config.node_id.clone()),
    )?;

    info!("Starting Scan Service...");
    info!(
        "Scan Service configuration: bind={}, node_id={}, provider={}",
        config.bind_addr, config.node_id, config.scanner.execution_provider
    );
    info!(
        detector = %config.scanner.detector_model_path,
        ocr = %config.scanner.ocr_model_path,
        timeout_secs = config.scanner.scan_timeout_secs,
        "Models load on first scan"
    );

    let scanner = PlateScanner::from_config(&config.scanner)?;

    let camera = match &config.camera_uri {
        Some(uri) => {
            let mut source =
                FfmpegFrameSource::new(uri, config.capture_max_width, config.capture_max_height)
                    .with_jpeg_quality(config.capture_jpeg_quality);
            if let Some(format) = &config.camera_format {
                source = source.with_input_format(format);
            }
            match source.probe().await {
                Ok((width, height)) => info!("Camera source: {} ({}x{})", uri, width, height),
                Err(e) => warn!("Camera source {} not reachable yet: {}", uri, e),
            }
            Some(Arc::new(source) as Arc<dyn FrameSource>)
        }
        None => {
            info!("No CAMERA_URI set, camera scans disabled");
            None
        }
    };

    let vehicles = match config.vehicle_lookup_url.clone() {
        Some(url) => {
            info!("Vehicle lookup at: {}", url);
            let lookup = HttpVehicleLookup::new(
                url,
                config.vehicle_lookup_query_param.clone(),
                config.vehicle_lookup_api_key.clone(),
            )?;
            Some(Arc::new(lookup) as Arc<dyn VehicleLookup>)
        }
        None => {
            info!("No VEHICLE_LOOKUP_URL set, vehicle lookups disabled");
            None
        }
    };

    let state = ScannerState::with_collaborators(config.node_id.clone(), scanner, camera, vehicles);

    // Build HTTP router
    let app = api::router(state.clone());

    // Bind and serve
    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Scan Service listening on {}", config.bind_addr);

    // Run with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: ScannerState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    state.shutdown().await;
}
