//! Calrissian launcher - runs CWL workflows as Kubernetes batch jobs
//!
//! This library builds the job specification for a Calrissian workflow run,
//! submits it to the cluster and tracks the execution until its log, output
//! and usage report can be collected.

pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod infrastructure;

// Re-export commonly used types
pub use config::LauncherConfig;
pub use domain::entities::{JobStatus, PodSecurity, WorkflowExecutionRequest};
pub use error::{AppError, Result};
pub use infrastructure::cluster::{ClusterApi, ClusterContext, KubeClusterApi};
pub use infrastructure::runners::{
    CalrissianExecution, CalrissianJob, JobManifest, MonitorOutcome,
};
