pub mod frame_extractor;
pub mod plates;
pub mod scans;
