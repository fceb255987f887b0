//! `auditgrid-engine` — receivables audit analysis engine.
//!
//! Pure engine crate: receives pre-loaded engagement records, returns report
//! values. No CLI or IO dependencies.

pub mod aging;
pub mod compare;
pub mod config;
pub mod credit;
pub mod error;
pub mod join;
pub mod model;
pub mod three_way;
pub mod validate;

pub use config::AnalysisConfig;
pub use error::EngineError;
pub use model::{AgingReport, Dataset, EngagementReport, MatchDiagnostics};
