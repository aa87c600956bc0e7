//! Execution controller for a submitted Calrissian job
//!
//! Owns the lifecycle of one job: submission, status polling and
//! classification, retrieval of the per-container artifacts once the run
//! is over, and a cancellable monitor loop.

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::{Job, JobStatus as K8sJobStatus};
use serde_json::Value;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::calrissian_job::CalrissianJob;
use super::naming::{self, CALRISSIAN_CONTAINER};
use crate::config::MonitorSettings;
use crate::domain::entities::{JobStatus, JobStatusSnapshot, WorkflowExecutionRequest};
use crate::error::{AppError, Result};

/// Container whose log is the structured workflow output
pub const OUTPUT_CONTAINER: &str = "sidecar-container-output";
/// Container whose log is the structured usage report
pub const USAGE_CONTAINER: &str = "sidecar-container-usage";

/// Runtime handle of a submitted job
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecution {
    pub job_name: String,
    pub request: WorkflowExecutionRequest,
    /// Last observed status, `None` until the first poll
    pub status: Option<JobStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
}

impl JobExecution {
    fn new(job_name: String, request: WorkflowExecutionRequest) -> Self {
        Self {
            job_name,
            request,
            status: None,
            start_time: None,
            completion_time: None,
            submitted_at: Utc::now(),
        }
    }

    /// Record a fresh snapshot, keeping terminal states sticky
    fn observe(&mut self, snapshot: &JobStatusSnapshot) -> JobStatus {
        let observed = snapshot.classify();
        let status = JobStatus::advance(self.status, observed);
        if status != observed {
            warn!(
                "Job {} reported {} after reaching {}, keeping {}",
                self.job_name, observed, status, status
            );
        }
        self.status = Some(status);
        self.start_time = snapshot.start_time.or(self.start_time);
        self.completion_time = snapshot.effective_completion_time().or(self.completion_time);
        status
    }
}

/// How a monitor run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    NotSubmitted,
    Finished { status: JobStatus, polls: u32 },
    Cancelled { polls: u32 },
    DeadlineExceeded { polls: u32 },
}

impl MonitorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            MonitorOutcome::Finished {
                status: JobStatus::Succeeded,
                ..
            }
        )
    }
}

/// Extract the fields the status classification looks at
pub fn snapshot_of(job: &Job) -> JobStatusSnapshot {
    let Some(status) = job.status.as_ref() else {
        return JobStatusSnapshot::default();
    };
    snapshot_of_status(status)
}

fn snapshot_of_status(status: &K8sJobStatus) -> JobStatusSnapshot {
    JobStatusSnapshot {
        active: status.active,
        succeeded: status.succeeded,
        failed: status.failed,
        start_time: status.start_time.as_ref().map(|t| t.0),
        completion_time: status.completion_time.as_ref().map(|t| t.0),
        condition_transitions: status
            .conditions
            .iter()
            .flatten()
            .filter_map(|c| c.last_transition_time.as_ref().map(|t| t.0))
            .collect(),
    }
}

pub struct CalrissianExecution {
    job: CalrissianJob,
    execution: Option<JobExecution>,
}

impl CalrissianExecution {
    pub fn new(job: CalrissianJob) -> Self {
        Self {
            job,
            execution: None,
        }
    }

    pub fn job(&self) -> &CalrissianJob {
        &self.job
    }

    pub fn execution(&self) -> Option<&JobExecution> {
        self.execution.as_ref()
    }

    /// Build the manifest and create the job. Not idempotent.
    pub async fn submit(&mut self) -> Result<&JobExecution> {
        let manifest = self.job.build().await?;
        info!("Submit job {}", manifest.job_name);

        self.job
            .context()
            .api()
            .create_job(&manifest.job)
            .await
            .map_err(|e| {
                error!("Job {} rejected: {}", manifest.job_name, e);
                AppError::Submission(format!("job {}: {}", manifest.job_name, e))
            })?;

        info!("Job {} submitted", manifest.job_name);
        Ok(self
            .execution
            .insert(JobExecution::new(manifest.job_name, self.job.request().clone())))
    }

    fn job_name(&self) -> Result<String> {
        self.execution
            .as_ref()
            .map(|e| e.job_name.clone())
            .ok_or_else(|| AppError::NotSubmitted(self.job.job_name().to_string()))
    }

    async fn read_snapshot(&self, job_name: &str) -> Result<JobStatusSnapshot> {
        let job = self
            .job
            .context()
            .api()
            .read_job(job_name)
            .await
            .map_err(|e| {
                error!("Exception when reading status of job {}: {}", job_name, e);
                AppError::StatusQuery(format!("job {}: {}", job_name, e))
            })?;
        Ok(snapshot_of(&job))
    }

    /// Query and classify the job status
    pub async fn get_status(&mut self) -> Result<JobStatus> {
        Ok(self.refresh().await?.0)
    }

    async fn refresh(&mut self) -> Result<(JobStatus, JobStatusSnapshot)> {
        let job_name = self.job_name()?;
        let snapshot = self.read_snapshot(&job_name).await?;
        let execution = self
            .execution
            .as_mut()
            .ok_or_else(|| AppError::NotSubmitted(job_name.clone()))?;
        let status = execution.observe(&snapshot);
        Ok((status, snapshot))
    }

    pub async fn is_complete(&mut self) -> Result<bool> {
        Ok(self.get_status().await?.is_complete())
    }

    pub async fn is_succeeded(&mut self) -> Result<bool> {
        Ok(self.get_status().await?.is_succeeded())
    }

    pub async fn is_active(&mut self) -> Result<bool> {
        Ok(self.get_status().await?.is_active())
    }

    pub async fn get_start_time(&mut self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.refresh().await?.1.start_time)
    }

    /// Completion time, or the latest condition transition when the job has none
    pub async fn get_completion_time(&mut self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.refresh().await?.1.effective_completion_time())
    }

    /// Raw log of the Calrissian container
    pub async fn get_log(&self) -> Result<String> {
        self.container_log(CALRISSIAN_CONTAINER).await
    }

    pub async fn get_output(&self) -> Result<Value> {
        self.structured_log(OUTPUT_CONTAINER).await
    }

    pub async fn get_usage_report(&self) -> Result<Value> {
        self.structured_log(USAGE_CONTAINER).await
    }

    async fn structured_log(&self, container: &str) -> Result<Value> {
        let body = self.container_log(container).await?;
        serde_json::from_str(&body).map_err(|e| {
            AppError::ArtifactParse(format!("log of container {}: {}", container, e))
        })
    }

    async fn container_log(&self, container: &str) -> Result<String> {
        let job_name = self.job_name()?;
        let api = self.job.context().api();

        let pods = api
            .list_pods(&naming::pod_selector(&job_name))
            .await
            .map_err(|e| {
                error!("Exception when listing pods of job {}: {}", job_name, e);
                AppError::ArtifactQuery(format!("pods of job {}: {}", job_name, e))
            })?;

        let pod_name = pods
            .first()
            .and_then(|pod| pod.metadata.name.clone())
            .ok_or_else(|| AppError::ArtifactNotFound(format!("no pod for job {}", job_name)))?;

        api.read_pod_log(&pod_name, container).await.map_err(|e| {
            if e.is_not_found() {
                return AppError::ArtifactNotFound(format!(
                    "no container {} in pod {}",
                    container, pod_name
                ));
            }
            error!(
                "Exception when reading log of {}/{}: {}",
                pod_name, container, e
            );
            AppError::ArtifactQuery(format!("log of {}/{}: {}", pod_name, container, e))
        })
    }

    /// Poll until the job leaves `Active`, the deadline passes or `cancel` fires.
    ///
    /// Performs one status query per poll and sleeps `settings.interval()`
    /// between polls.
    pub async fn monitor(
        &mut self,
        settings: &MonitorSettings,
        cancel: &CancellationToken,
    ) -> Result<MonitorOutcome> {
        let Some(job_name) = self.execution.as_ref().map(|e| e.job_name.clone()) else {
            warn!("Job is not submitted");
            return Ok(MonitorOutcome::NotSubmitted);
        };

        let interval = settings.interval();
        let deadline = settings.max_wait().map(|max_wait| Instant::now() + max_wait);

        let mut polls = 1;
        let mut status = self.get_status().await?;

        while status.is_active() {
            info!("Job {} is active", job_name);

            let wake = match deadline {
                Some(deadline) => deadline.min(Instant::now() + interval),
                None => Instant::now() + interval,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Monitoring of job {} cancelled", job_name);
                    return Ok(MonitorOutcome::Cancelled { polls });
                }
                _ = sleep_until(wake) => {}
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!("Job {} still active when the monitor deadline passed", job_name);
                return Ok(MonitorOutcome::DeadlineExceeded { polls });
            }

            status = self.get_status().await?;
            polls += 1;
        }

        info!("Execution is complete: {}", status.is_complete());
        if status.is_succeeded() {
            info!("Outcome: success!");
        } else {
            warn!("Outcome: {}", status);
        }

        Ok(MonitorOutcome::Finished { status, polls })
    }
}
