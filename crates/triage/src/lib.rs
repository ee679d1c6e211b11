//! Automated production incident investigation.
//!
//! Given a problem statement, the engine asks a planning oracle for one
//! diagnostic step at a time, executes it against a catalog of read-only
//! probes (Kubernetes, Loki, Prometheus, git), feeds the observation back,
//! and finally produces a structured incident report.

pub mod ai;
pub mod config;
pub mod engine;
pub mod errors;
pub mod oracle;
pub mod probes;
pub mod report;

pub use config::Config;
pub use engine::{Engine, InvestigationResult, StopReason};
pub use errors::{TriageError, TriageResult};
pub use oracle::{LlmOracle, Oracle, PlanDecision};
pub use probes::Catalog;
pub use report::Report;
