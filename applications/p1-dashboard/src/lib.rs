pub mod api;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod history;
pub mod ingest;
pub mod poll;
pub mod repositories;
pub mod sample;
pub mod series;
pub mod stats;
pub mod timeframe;
pub mod window;

// Re-export commonly used items
pub use config::Config;
pub use dashboard::{Dashboard, DashboardHandle, LiveUpdate};
pub use error::{AppError, Result};
pub use ingest::StoredSample;
pub use sample::Sample;
pub use timeframe::{ResolvedRange, Selection, Timeframe};
