use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::batch::v1::{JobCondition, JobStatus as K8sJobStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde_json::{json, Value};
use std::sync::Arc;

use calrissian_launcher::{ClusterContext, LauncherConfig, WorkflowExecutionRequest};

use super::mocks::MockClusterApi;

pub const NAMESPACE: &str = "ws-alice";
pub const SERVICE_ACCOUNT: &str = "calrissian-sa";
pub const CALLING_SERVICE_ACCOUNT: &str = "caller-sa";
pub const WDIR_CLAIM: &str = "calrissian-wdir";

pub fn sample_cwl() -> Value {
    json!({
        "cwlVersion": "v1.0",
        "$graph": [{
            "class": "Workflow",
            "id": "main",
            "inputs": {"message": "string"},
            "outputs": {},
            "steps": {"echo": {"run": "#echo", "in": {"message": "message"}, "out": []}}
        }, {
            "class": "CommandLineTool",
            "id": "echo",
            "baseCommand": "echo",
            "inputs": {"message": {"type": "string", "inputBinding": {"position": 1}}},
            "outputs": {}
        }]
    })
}

pub fn sample_params() -> Value {
    json!({"message": "hello world"})
}

pub fn sample_request() -> WorkflowExecutionRequest {
    WorkflowExecutionRequest::new(sample_cwl(), sample_params(), "ws-alice", "ws-alice", "run-0001")
}

pub fn context(api: Arc<MockClusterApi>) -> ClusterContext {
    ClusterContext::new(
        NAMESPACE,
        SERVICE_ACCOUNT,
        CALLING_SERVICE_ACCOUNT,
        WDIR_CLAIM,
        api,
    )
}

pub fn launcher_config() -> LauncherConfig {
    LauncherConfig::default()
}

pub fn workspace_descriptor(name: &str) -> Value {
    json!({
        "apiVersion": "core.telespazio-uk.io/v1alpha1",
        "kind": "Workspace",
        "metadata": {"name": name, "namespace": "workspaces"},
        "spec": {"storage": {"persistentVolumes": [
            {"name": format!("pv-{}-data", name), "volumeSource": {"accessPointName": "ap-data"}}
        ]}},
        "status": {"aws": {"efs": {"accessPoints": [{"name": "ap-data"}]}}}
    })
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Accepted, no pod scheduled yet
pub fn pending_status() -> Option<K8sJobStatus> {
    Some(K8sJobStatus::default())
}

pub fn running_status() -> Option<K8sJobStatus> {
    Some(K8sJobStatus {
        active: Some(1),
        start_time: Some(Time(at(1_000))),
        ..Default::default()
    })
}

pub fn succeeded_status() -> Option<K8sJobStatus> {
    Some(K8sJobStatus {
        succeeded: Some(1),
        start_time: Some(Time(at(1_000))),
        completion_time: Some(Time(at(1_600))),
        ..Default::default()
    })
}

/// Failed job that records no completion time, only conditions
pub fn failed_status() -> Option<K8sJobStatus> {
    Some(K8sJobStatus {
        failed: Some(1),
        start_time: Some(Time(at(1_000))),
        conditions: Some(vec![
            JobCondition {
                type_: "FailureTarget".to_string(),
                status: "True".to_string(),
                last_transition_time: Some(Time(at(1_400))),
                ..Default::default()
            },
            JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                last_transition_time: Some(Time(at(1_450))),
                ..Default::default()
            },
        ]),
        ..Default::default()
    })
}
