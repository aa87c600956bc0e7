//! Workflow execution request entities
//!
//! A `WorkflowExecutionRequest` carries everything needed to launch one CWL
//! run: the workflow document, its parameters, resource ceilings for the
//! workflow engine, workspace wiring and the run flags.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{AppError, Result};

pub const DEFAULT_MAX_RAM: &str = "8G";
pub const DEFAULT_MAX_CORES: &str = "16";
pub const DEFAULT_BACKOFF_LIMIT: i32 = 2;

/// Numeric identity the job pod runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSecurity {
    pub run_as_user: i64,
    pub run_as_group: i64,
    pub fs_group: i64,
}

/// Inputs to a single workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionRequest {
    /// The CWL document
    pub cwl: Value,
    /// Parameter set, a key/value mapping
    pub params: Value,
    /// Optional `#entry-point` inside the CWL document
    pub entry_point: Option<String>,
    pub pod_env_vars: BTreeMap<String, String>,
    pub pod_node_selector: BTreeMap<String, String>,
    pub max_ram: String,
    pub max_cores: String,
    /// Pod identity; `None` runs with `{0, 0, 0}`
    pub security_context: Option<PodSecurity>,
    /// Overrides the context's target service account
    pub service_account: Option<String>,
    pub calling_workspace: String,
    pub executing_workspace: String,
    /// Correlation id scoping the staged config maps
    pub job_id: String,
    pub debug: bool,
    pub no_read_only: bool,
    pub keep_pods: bool,
    pub tool_logs: bool,
    pub backoff_limit: i32,
}

impl WorkflowExecutionRequest {
    pub fn new(
        cwl: Value,
        params: Value,
        calling_workspace: impl Into<String>,
        executing_workspace: impl Into<String>,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            cwl,
            params,
            entry_point: None,
            pod_env_vars: BTreeMap::new(),
            pod_node_selector: BTreeMap::new(),
            max_ram: DEFAULT_MAX_RAM.to_string(),
            max_cores: DEFAULT_MAX_CORES.to_string(),
            security_context: None,
            service_account: None,
            calling_workspace: calling_workspace.into(),
            executing_workspace: executing_workspace.into(),
            job_id: job_id.into(),
            debug: false,
            no_read_only: false,
            keep_pods: false,
            tool_logs: false,
            backoff_limit: DEFAULT_BACKOFF_LIMIT,
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    pub fn with_pod_env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pod_env_vars.insert(name.into(), value.into());
        self
    }

    pub fn with_node_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pod_node_selector.insert(key.into(), value.into());
        self
    }

    pub fn with_resources(mut self, max_ram: impl Into<String>, max_cores: impl Into<String>) -> Self {
        self.max_ram = max_ram.into();
        self.max_cores = max_cores.into();
        self
    }

    pub fn with_security_context(mut self, security: PodSecurity) -> Self {
        self.security_context = Some(security);
        self
    }

    pub fn with_service_account(mut self, service_account: impl Into<String>) -> Self {
        self.service_account = Some(service_account.into());
        self
    }

    pub fn with_backoff_limit(mut self, backoff_limit: i32) -> Self {
        self.backoff_limit = backoff_limit;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn no_read_only(mut self, enabled: bool) -> Self {
        self.no_read_only = enabled;
        self
    }

    pub fn keep_pods(mut self, enabled: bool) -> Self {
        self.keep_pods = enabled;
        self
    }

    pub fn tool_logs(mut self, enabled: bool) -> Self {
        self.tool_logs = enabled;
        self
    }

    /// The security context the pod runs with
    pub fn effective_security(&self) -> PodSecurity {
        self.security_context.unwrap_or_default()
    }

    pub fn is_cross_workspace(&self) -> bool {
        self.calling_workspace != self.executing_workspace
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_id.is_empty() {
            return Err(AppError::Validation("job_id must not be empty".to_string()));
        }
        // pod-node-selector-<id> is the longest staged name
        if !is_dns_fragment(&self.job_id) || self.job_id.len() > 253 - "pod-node-selector-".len() {
            return Err(AppError::Validation(format!(
                "job_id '{}' must be lowercase alphanumerics and '-', not starting or ending with '-'",
                self.job_id
            )));
        }
        if self.calling_workspace.trim().is_empty() || self.executing_workspace.trim().is_empty() {
            return Err(AppError::Validation(
                "calling and executing workspace must both be set".to_string(),
            ));
        }
        if self.max_ram.trim().is_empty() || self.max_cores.trim().is_empty() {
            return Err(AppError::Validation(
                "max_ram and max_cores must not be empty".to_string(),
            ));
        }
        if !self.params.is_object() {
            return Err(AppError::Validation(
                "params must be a key/value mapping".to_string(),
            ));
        }
        if self.backoff_limit < 0 {
            return Err(AppError::Validation(
                "backoff_limit must not be negative".to_string(),
            ));
        }
        if let Some(entry_point) = &self.entry_point {
            if entry_point.is_empty() || entry_point.contains('#') {
                return Err(AppError::Validation(format!(
                    "invalid entry point '{}'",
                    entry_point
                )));
            }
        }
        Ok(())
    }
}

fn is_dns_fragment(value: &str) -> bool {
    !value.starts_with('-')
        && !value.ends_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
