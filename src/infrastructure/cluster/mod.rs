//! Cluster control-plane collaborator
//!
//! The launcher never talks to the Kubernetes API directly: the job builder
//! and the execution controller only see the `ClusterApi` trait, carried
//! around in a `ClusterContext` together with the namespace-level settings.

pub mod kube_client;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{LauncherConfig, WorkspaceResourceConfig};
use crate::error::Result;

pub use kube_client::KubeClusterApi;

/// Operations the launcher needs from the cluster, scoped to one namespace
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create or update a single-key config map
    async fn apply_config_map(&self, name: &str, key: &str, content: &str) -> Result<()>;

    /// Data of a config map, `None` when it does not exist
    async fn read_config_map(&self, name: &str) -> Result<Option<BTreeMap<String, String>>>;

    async fn is_claim_present(&self, name: &str) -> Result<bool>;

    async fn create_job(&self, job: &Job) -> Result<Job>;

    /// Current job object including its status
    async fn read_job(&self, name: &str) -> Result<Job>;

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>>;

    async fn read_pod_log(&self, pod_name: &str, container: &str) -> Result<String>;

    /// Fetch a custom resource as raw JSON
    async fn get_custom_resource(
        &self,
        resource: &WorkspaceResourceConfig,
        name: &str,
    ) -> Result<serde_json::Value>;
}

/// Namespace-level runtime context of a launch
#[derive(Clone)]
pub struct ClusterContext {
    pub namespace: String,
    /// Service account the Calrissian pod runs as
    pub service_account: String,
    pub calling_service_account: String,
    /// Claim backing the shared working directory
    pub working_dir_claim: String,
    api: Arc<dyn ClusterApi>,
}

impl fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterContext")
            .field("namespace", &self.namespace)
            .field("service_account", &self.service_account)
            .field("calling_service_account", &self.calling_service_account)
            .field("working_dir_claim", &self.working_dir_claim)
            .finish_non_exhaustive()
    }
}

impl ClusterContext {
    pub fn new(
        namespace: impl Into<String>,
        service_account: impl Into<String>,
        calling_service_account: impl Into<String>,
        working_dir_claim: impl Into<String>,
        api: Arc<dyn ClusterApi>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service_account: service_account.into(),
            calling_service_account: calling_service_account.into(),
            working_dir_claim: working_dir_claim.into(),
            api,
        }
    }

    pub fn from_config(config: &LauncherConfig, api: Arc<dyn ClusterApi>) -> Self {
        Self::new(
            config.namespace.clone(),
            config.service_account.clone(),
            config.calling_service_account.clone(),
            config.working_dir_claim.clone(),
            api,
        )
    }

    pub async fn create_config(&self, name: &str, key: &str, content: &str) -> Result<()> {
        self.api.apply_config_map(name, key, content).await
    }

    pub async fn is_claim_present(&self, name: &str) -> Result<bool> {
        self.api.is_claim_present(name).await
    }

    /// Passthrough handle for job, pod, config map and custom resource calls
    pub fn api(&self) -> &Arc<dyn ClusterApi> {
        &self.api
    }
}
