//! `ClusterApi` backed by a live cluster through the kube client library.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    Api, ApiResource, DynamicObject, ListParams, LogParams, Patch, PatchParams, PostParams,
};
use kube::core::GroupVersionKind;
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::ClusterApi;
use crate::config::WorkspaceResourceConfig;
use crate::error::{AppError, Result};

const FIELD_MANAGER: &str = "calrissian-launcher";
const POD_LIST_TIMEOUT_SECS: u32 = 10;

pub struct KubeClusterApi {
    client: Client,
    namespace: String,
    config_maps: Api<ConfigMap>,
    claims: Api<PersistentVolumeClaim>,
    jobs: Api<Job>,
    pods: Api<Pod>,
}

impl KubeClusterApi {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            config_maps: Api::namespaced(client.clone(), &namespace),
            claims: Api::namespaced(client.clone(), &namespace),
            jobs: Api::namespaced(client.clone(), &namespace),
            pods: Api::namespaced(client.clone(), &namespace),
            client,
            namespace,
        }
    }

    /// Connect with in-cluster credentials or the local kubeconfig
    pub async fn try_default(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| AppError::ClusterApi {
            status: None,
            message: format!("Failed to create Kubernetes client: {}", e),
        })?;
        let api = Self::new(client, namespace);
        info!("Connected to Kubernetes cluster, namespace: {}", api.namespace);
        Ok(api)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn apply_config_map(&self, name: &str, key: &str, content: &str) -> Result<()> {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(key.to_string(), content.to_string())])),
            ..Default::default()
        };

        self.config_maps
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&config_map),
            )
            .await?;
        debug!("Applied config map {}/{}", self.namespace, name);
        Ok(())
    }

    async fn read_config_map(&self, name: &str) -> Result<Option<BTreeMap<String, String>>> {
        let config_map = self.config_maps.get_opt(name).await?;
        Ok(config_map.map(|cm| cm.data.unwrap_or_default()))
    }

    async fn is_claim_present(&self, name: &str) -> Result<bool> {
        Ok(self.claims.get_opt(name).await?.is_some())
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        Ok(self.jobs.create(&PostParams::default(), job).await?)
    }

    async fn read_job(&self, name: &str) -> Result<Job> {
        Ok(self.jobs.get_status(name).await?)
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default()
            .labels(label_selector)
            .timeout(POD_LIST_TIMEOUT_SECS);
        Ok(self.pods.list(&params).await?.items)
    }

    async fn read_pod_log(&self, pod_name: &str, container: &str) -> Result<String> {
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        Ok(self.pods.logs(pod_name, &params).await?)
    }

    async fn get_custom_resource(
        &self,
        resource: &WorkspaceResourceConfig,
        name: &str,
    ) -> Result<serde_json::Value> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, &resource.plural);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &resource.namespace, &api_resource);

        let object = api.get(name).await?;
        Ok(serde_json::to_value(object)?)
    }
}
