use crate::capture::FrameSource;
use crate::pipeline::PlateScanner;
use crate::vehicle_lookup::VehicleLookup;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct ScannerState {
    inner: Arc<ScannerStateInner>,
}

struct ScannerStateInner {
    node_id: String,
    scanner: PlateScanner,
    camera: Option<Arc<dyn FrameSource>>,
    vehicles: Option<Arc<dyn VehicleLookup>>,
}

impl ScannerState {
    pub fn new(node_id: String, scanner: PlateScanner) -> Self {
        Self::with_collaborators(node_id, scanner, None, None)
    }

    pub fn with_collaborators(
        node_id: String,
        scanner: PlateScanner,
        camera: Option<Arc<dyn FrameSource>>,
        vehicles: Option<Arc<dyn VehicleLookup>>,
    ) -> Self {
        Self {
            inner: Arc::new(ScannerStateInner {
                node_id,
                scanner,
                camera,
                vehicles,
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn scanner(&self) -> &PlateScanner {
        &self.inner.scanner
    }

    pub fn camera(&self) -> Option<&dyn FrameSource> {
        self.inner.camera.as_deref()
    }

    pub fn vehicles(&self) -> Option<&dyn VehicleLookup> {
        self.inner.vehicles.as_deref()
    }

    /// Release model sessions
    pub async fn shutdown(&self) {
        info!(node_id = %self.inner.node_id, "Shutting down scan service...");
        self.inner.scanner.sessions().shutdown().await;
        info!("Scan service shutdown complete");
    }
}
