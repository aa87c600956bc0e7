//! Domain entities for workflow launches

pub mod job_status;
pub mod workflow;

pub use job_status::{JobStatus, JobStatusSnapshot};
pub use workflow::{PodSecurity, WorkflowExecutionRequest};
