use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobStatus as K8sJobStatus};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use calrissian_launcher::config::WorkspaceResourceConfig;
use calrissian_launcher::{AppError, ClusterApi, Result};

/// In-memory cluster recording every call the launcher makes
#[derive(Default)]
pub struct MockClusterApi {
    config_maps: Mutex<HashMap<String, BTreeMap<String, String>>>,
    applied: Mutex<Vec<String>>,
    claims: Mutex<HashSet<String>>,
    custom_resources: Mutex<HashMap<String, Value>>,
    created_jobs: Mutex<Vec<Job>>,
    statuses: Mutex<VecDeque<Option<K8sJobStatus>>>,
    job_reads: Mutex<usize>,
    pods: Mutex<Vec<String>>,
    pod_selectors: Mutex<Vec<String>>,
    logs: Mutex<HashMap<(String, String), String>>,
    fail_config_apply: Mutex<bool>,
    fail_config_read: Mutex<bool>,
    fail_create_job: Mutex<bool>,
    fail_read_job: Mutex<bool>,
    fail_read_log: Mutex<bool>,
}

impl MockClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config_map(&self, name: &str, key: &str, content: &str) {
        self.config_maps.lock().unwrap().insert(
            name.to_string(),
            BTreeMap::from([(key.to_string(), content.to_string())]),
        );
    }

    /// Store the workspace PVC registry under `workspace-config`
    pub fn set_pvc_registry(&self, entries: Value) {
        self.set_config_map("workspace-config", "pvcs", &entries.to_string());
    }

    pub fn add_claim(&self, name: &str) {
        self.claims.lock().unwrap().insert(name.to_string());
    }

    pub fn add_custom_resource(&self, name: &str, resource: Value) {
        self.custom_resources
            .lock()
            .unwrap()
            .insert(name.to_string(), resource);
    }

    /// Queue status readings; the last one repeats once the queue drains
    pub fn push_status(&self, status: Option<K8sJobStatus>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn add_pod(&self, name: &str) {
        self.pods.lock().unwrap().push(name.to_string());
    }

    pub fn set_log(&self, pod: &str, container: &str, body: &str) {
        self.logs
            .lock()
            .unwrap()
            .insert((pod.to_string(), container.to_string()), body.to_string());
    }

    pub fn fail_config_apply(&self) {
        *self.fail_config_apply.lock().unwrap() = true;
    }

    pub fn fail_config_read(&self) {
        *self.fail_config_read.lock().unwrap() = true;
    }

    pub fn fail_create_job(&self) {
        *self.fail_create_job.lock().unwrap() = true;
    }

    pub fn fail_read_job(&self) {
        *self.fail_read_job.lock().unwrap() = true;
    }

    pub fn fail_read_log(&self) {
        *self.fail_read_log.lock().unwrap() = true;
    }

    pub fn config_map(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.config_maps.lock().unwrap().get(name).cloned()
    }

    /// Names of the config maps applied by the launcher, in order
    pub fn applied_config_maps(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn created_jobs(&self) -> Vec<Job> {
        self.created_jobs.lock().unwrap().clone()
    }

    pub fn job_reads(&self) -> usize {
        *self.job_reads.lock().unwrap()
    }

    /// Label selectors passed to `list_pods`, in call order
    pub fn pod_selectors(&self) -> Vec<String> {
        self.pod_selectors.lock().unwrap().clone()
    }
}

fn transport_error(message: &str) -> AppError {
    AppError::ClusterApi {
        status: Some(500),
        message: message.to_string(),
    }
}

#[async_trait]
impl ClusterApi for MockClusterApi {
    async fn apply_config_map(&self, name: &str, key: &str, content: &str) -> Result<()> {
        if *self.fail_config_apply.lock().unwrap() {
            return Err(transport_error("config map apply refused"));
        }
        self.set_config_map(name, key, content);
        self.applied.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn read_config_map(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        if *self.fail_config_read.lock().unwrap() {
            return Err(transport_error("config map read refused"));
        }
        Ok(self.config_map(name))
    }

    async fn is_claim_present(&self, name: &str) -> Result<bool> {
        Ok(self.claims.lock().unwrap().contains(name))
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        if *self.fail_create_job.lock().unwrap() {
            return Err(AppError::ClusterApi {
                status: Some(422),
                message: "job is invalid".to_string(),
            });
        }
        self.created_jobs.lock().unwrap().push(job.clone());
        Ok(job.clone())
    }

    async fn read_job(&self, name: &str) -> Result<Job> {
        *self.job_reads.lock().unwrap() += 1;
        if *self.fail_read_job.lock().unwrap() {
            return Err(transport_error("connection reset"));
        }

        let status = {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                statuses.pop_front().flatten()
            } else {
                statuses.front().cloned().flatten()
            }
        };

        Ok(Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status,
            ..Default::default()
        })
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>> {
        self.pod_selectors
            .lock()
            .unwrap()
            .push(label_selector.to_string());
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .map(|name| Pod {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect())
    }

    async fn read_pod_log(&self, pod_name: &str, container: &str) -> Result<String> {
        if *self.fail_read_log.lock().unwrap() {
            return Err(transport_error("log stream closed"));
        }
        self.logs
            .lock()
            .unwrap()
            .get(&(pod_name.to_string(), container.to_string()))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("container {}", container)))
    }

    async fn get_custom_resource(
        &self,
        _resource: &WorkspaceResourceConfig,
        name: &str,
    ) -> Result<Value> {
        self.custom_resources
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("workspace {}", name)))
    }
}
