//! Application Layer - Scan orchestration
//!
//! This module coordinates the domain logic and the infrastructure: it
//! drives the scan phases and turns evidence into identifiers and findings.

pub mod engine;
pub mod errors;
pub mod identification;

pub use engine::{RunPhase, RunReport, ScanEngine, ScanFailure};
pub use errors::EngineError;
pub use identification::IdentificationService;
