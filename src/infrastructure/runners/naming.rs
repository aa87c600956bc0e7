//! Names and paths shared by the job builder and the execution controller.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

/// Longest name accepted for the job object
pub const MAX_NAME_LENGTH: usize = 63;

pub const CALRISSIAN_CONTAINER: &str = "calrissian";
pub const CALRISSIAN_BASE_PATH: &str = "/calrissian";

pub const WORKFLOW_MOUNT_PATH: &str = "/workflow-input";
pub const WORKFLOW_FILE: &str = "workflow.cwl";
pub const PARAMS_MOUNT_PATH: &str = "/workflow-params";
pub const PARAMS_FILE: &str = "params.yml";
pub const POD_ENV_VARS_MOUNT_PATH: &str = "/pod-env-vars";
pub const POD_ENV_VARS_FILE: &str = "pod_env_vars.json";
pub const NODE_SELECTOR_MOUNT_PATH: &str = "/pod-node-selector";
pub const NODE_SELECTOR_FILE: &str = "pod_nodeselectors.yml";
pub const WORKSPACE_MOUNT_ROOT: &str = "/workspace";

pub const WORKFLOW_KEY: &str = "cwl-workflow";
pub const PARAMS_KEY: &str = "params";
pub const POD_ENV_VARS_KEY: &str = "pod-env-vars";
pub const NODE_SELECTOR_KEY: &str = "pod-node-selector";

/// Trim `value` to at most 63 characters without a trailing hyphen.
///
/// Drops one character at a time and strips any hyphens exposed by each
/// drop, so the result never ends in `-` even when the cut lands on a
/// run of hyphens.
pub fn shorten_name(value: &str) -> String {
    let mut name = value.to_string();
    while name.chars().count() > MAX_NAME_LENGTH {
        name.pop();
        while name.ends_with('-') {
            name.pop();
        }
    }
    name
}

/// `job-<timestamp without dot>-<uuid>`, shortened
pub fn job_name(now: DateTime<Utc>, id: Uuid) -> String {
    let timestamp = format!("{}{:06}", now.timestamp(), now.timestamp_subsec_micros());
    let name = shorten_name(&format!("job-{}-{}", timestamp, id));
    debug!("Generated job name: {}", name);
    name
}

pub fn generate_job_name() -> String {
    job_name(Utc::now(), Uuid::new_v4())
}

pub fn workflow_config_name(job_id: &str) -> String {
    format!("cwl-workflow-{}", job_id)
}

pub fn params_config_name(job_id: &str) -> String {
    format!("params-{}", job_id)
}

pub fn pod_env_vars_config_name(job_id: &str) -> String {
    format!("pod-env-vars-{}", job_id)
}

pub fn node_selector_config_name(job_id: &str) -> String {
    format!("pod-node-selector-{}", job_id)
}

/// Path of a file inside one of the config-map mounts
pub fn mounted_file(mount_path: &str, file: &str) -> String {
    format!("{}/{}", mount_path, file)
}

pub fn workspace_mount_path(name: &str) -> String {
    format!("{}/{}", WORKSPACE_MOUNT_ROOT, name)
}

/// Label selector matching the pods of a job
pub fn pod_selector(job_name: &str) -> String {
    format!("job-name={}", job_name)
}
