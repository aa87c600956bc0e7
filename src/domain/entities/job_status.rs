//! Job lifecycle status and its classification from raw cluster counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted by the cluster, scheduled or running
    Active,
    /// Finished with at least one successful pod
    Succeeded,
    /// Finished without success
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            JobStatus::Active => false,
            JobStatus::Succeeded | JobStatus::Failed => true,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Active)
    }

    pub fn is_complete(&self) -> bool {
        self.is_terminal()
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }

    /// Merge a fresh observation into the previously recorded status.
    ///
    /// Terminal states are sticky: once a job has been seen as succeeded or
    /// failed, a later `Active` reading does not move it back.
    pub fn advance(previous: Option<JobStatus>, observed: JobStatus) -> JobStatus {
        match (previous, observed) {
            (Some(prev), JobStatus::Active) if prev.is_terminal() => prev,
            (_, observed) => observed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Active => write!(f, "active"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The subset of a job's cluster status the controller reasons about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatusSnapshot {
    pub active: Option<i32>,
    pub succeeded: Option<i32>,
    pub failed: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    /// `lastTransitionTime` of every status condition, in reported order
    pub condition_transitions: Vec<DateTime<Utc>>,
}

impl JobStatusSnapshot {
    /// Classify the snapshot.
    ///
    /// Precedence: nothing active and no start time means the job was
    /// accepted but not yet scheduled, which counts as active. Then a
    /// non-zero active count, then succeeded, then failed. A started job
    /// with no non-zero counter is between pods and still active.
    pub fn classify(&self) -> JobStatus {
        if self.active.is_none() && self.start_time.is_none() {
            return JobStatus::Active;
        }
        if nonzero(self.active) {
            return JobStatus::Active;
        }
        if nonzero(self.succeeded) {
            return JobStatus::Succeeded;
        }
        if nonzero(self.failed) {
            return JobStatus::Failed;
        }
        JobStatus::Active
    }

    /// Explicit completion time, else the latest condition transition.
    pub fn effective_completion_time(&self) -> Option<DateTime<Utc>> {
        self.completion_time
            .or_else(|| self.condition_transitions.iter().max().copied())
    }
}

fn nonzero(count: Option<i32>) -> bool {
    count.is_some_and(|n| n != 0)
}
