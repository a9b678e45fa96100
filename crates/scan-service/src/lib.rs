pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod state;
pub mod vehicle_lookup;
pub mod vision;

pub use config::{ScanServiceConfig, ScannerConfig};
pub use error::ScanError;
pub use pipeline::{PlateScan, PlateScanner};
pub use state::ScannerState;
