//! # QC Review Common Library
//!
//! Shared code for the QC review workspace including:
//! - QC document schema and aggregate-status operations
//! - Session event types (SessionEvent enum)
//! - Error taxonomy
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod qc;

pub use config::ReviewConfig;
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use qc::{Document, Evaluation, Metric, Modality, QualityControl, Status, StatusRecord};
