pub mod calrissian_job;
pub mod execution;
pub mod naming;
pub mod volumes;

// Re-export key types
pub use calrissian_job::{CalrissianJob, JobManifest};
pub use execution::{CalrissianExecution, JobExecution, MonitorOutcome};
pub use volumes::{VolumeBinding, VolumePlan};
