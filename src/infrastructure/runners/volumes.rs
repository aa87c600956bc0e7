//! Volume assembly for the Calrissian pod
//!
//! Every source of storage is an independent step returning the
//! `VolumeBinding`s it contributes. `VolumePlan` concatenates them in a fixed
//! order and splits them into the positionally aligned volume and mount
//! lists of the pod spec.

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, KeyToPath, PersistentVolumeClaimVolumeSource, Volume, VolumeMount,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{error, info, warn};

use super::naming::{self, CALRISSIAN_BASE_PATH};
use crate::config::WorkspaceResourceConfig;
use crate::error::{AppError, Result};
use crate::infrastructure::cluster::ClusterContext;

const CONFIG_FILE_MODE: i32 = 0o644;
const PVC_REGISTRY_KEY: &str = "pvcs";

pub const WORKFLOW_VOLUME: &str = "volume-cwl-workflow";
pub const PARAMS_VOLUME: &str = "volume-params";
pub const WORKING_DIR_VOLUME: &str = "volume-calrissian-wdir";
pub const POD_ENV_VARS_VOLUME: &str = "volume-pod-env-vars";
pub const NODE_SELECTOR_VOLUME: &str = "volume-pod-node-selector";

/// A volume together with the place it is mounted in the container
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeBinding {
    pub volume: Volume,
    pub mount: VolumeMount,
}

impl VolumeBinding {
    /// Single-key config map exposed as one read-only file
    pub fn config_map(
        volume_name: &str,
        config_map: &str,
        key: &str,
        file: &str,
        mount_path: &str,
    ) -> Self {
        Self {
            volume: Volume {
                name: volume_name.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(config_map.to_string()),
                    optional: Some(false),
                    items: Some(vec![KeyToPath {
                        key: key.to_string(),
                        path: file.to_string(),
                        mode: Some(CONFIG_FILE_MODE),
                    }]),
                    default_mode: Some(CONFIG_FILE_MODE),
                }),
                ..Default::default()
            },
            mount: VolumeMount {
                name: volume_name.to_string(),
                mount_path: mount_path.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        }
    }

    /// Persistent claim mounted read-write
    pub fn claim(volume_name: &str, claim_name: &str, mount_path: &str) -> Self {
        Self {
            volume: Volume {
                name: volume_name.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name.to_string(),
                    read_only: Some(false),
                }),
                ..Default::default()
            },
            mount: VolumeMount {
                name: volume_name.to_string(),
                mount_path: mount_path.to_string(),
                read_only: Some(false),
                ..Default::default()
            },
        }
    }
}

/// Ordered collection of bindings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumePlan {
    bindings: Vec<VolumeBinding>,
}

impl VolumePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, binding: VolumeBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn with_optional(self, binding: Option<VolumeBinding>) -> Self {
        match binding {
            Some(binding) => self.with(binding),
            None => self,
        }
    }

    pub fn with_all(mut self, bindings: Vec<VolumeBinding>) -> Self {
        self.bindings.extend(bindings);
        self
    }

    pub fn bindings(&self) -> &[VolumeBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Volumes and mounts, same length and same order
    pub fn split(self) -> (Vec<Volume>, Vec<VolumeMount>) {
        self.bindings
            .into_iter()
            .map(|binding| (binding.volume, binding.mount))
            .unzip()
    }
}

pub fn workflow_binding(job_id: &str) -> VolumeBinding {
    VolumeBinding::config_map(
        WORKFLOW_VOLUME,
        &naming::workflow_config_name(job_id),
        naming::WORKFLOW_KEY,
        naming::WORKFLOW_FILE,
        naming::WORKFLOW_MOUNT_PATH,
    )
}

pub fn params_binding(job_id: &str) -> VolumeBinding {
    VolumeBinding::config_map(
        PARAMS_VOLUME,
        &naming::params_config_name(job_id),
        naming::PARAMS_KEY,
        naming::PARAMS_FILE,
        naming::PARAMS_MOUNT_PATH,
    )
}

pub fn working_dir_binding(claim_name: &str) -> VolumeBinding {
    VolumeBinding::claim(WORKING_DIR_VOLUME, claim_name, CALRISSIAN_BASE_PATH)
}

pub fn pod_env_vars_binding(job_id: &str, present: bool) -> Option<VolumeBinding> {
    present.then(|| {
        VolumeBinding::config_map(
            POD_ENV_VARS_VOLUME,
            &naming::pod_env_vars_config_name(job_id),
            naming::POD_ENV_VARS_KEY,
            naming::POD_ENV_VARS_FILE,
            naming::POD_ENV_VARS_MOUNT_PATH,
        )
    })
}

pub fn node_selector_binding(job_id: &str, present: bool) -> Option<VolumeBinding> {
    present.then(|| {
        VolumeBinding::config_map(
            NODE_SELECTOR_VOLUME,
            &naming::node_selector_config_name(job_id),
            naming::NODE_SELECTOR_KEY,
            naming::NODE_SELECTOR_FILE,
            naming::NODE_SELECTOR_MOUNT_PATH,
        )
    })
}

/// One entry of the workspace PVC registry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvcRegistryEntry {
    pub pvc_name: Option<String>,
    pub pv_name: Option<String>,
}

/// Registry entries stored under `pvcs`; unreadable data yields none.
pub fn parse_pvc_registry(data: Option<&BTreeMap<String, String>>) -> Vec<PvcRegistryEntry> {
    let raw = data
        .and_then(|data| data.get(PVC_REGISTRY_KEY))
        .map(String::as_str)
        .unwrap_or("[]");

    match serde_json::from_str::<Vec<PvcRegistryEntry>>(raw) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Error parsing workspace PVC registry: {}", e);
            Vec::new()
        }
    }
}

/// Read-write mounts for every registered workspace claim that exists
pub async fn workspace_bindings(
    context: &ClusterContext,
    registry_name: &str,
) -> Vec<VolumeBinding> {
    let data = match context.api().read_config_map(registry_name).await {
        Ok(Some(data)) => Some(data),
        Ok(None) => {
            warn!("Workspace registry config map '{}' not found", registry_name);
            None
        }
        Err(e) => {
            error!("Failed to read '{}' config map: {}", registry_name, e);
            None
        }
    };

    let mut bindings = Vec::new();
    for entry in parse_pvc_registry(data.as_ref()) {
        let (Some(pvc_name), Some(pv_name)) = (entry.pvc_name, entry.pv_name) else {
            warn!("Skipping incomplete workspace registry entry");
            continue;
        };

        match context.is_claim_present(&pvc_name).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("Cannot check claim {}: {}", pvc_name, e);
                continue;
            }
        }

        let binding = VolumeBinding::claim(
            &format!("workspace-efs-{}", pvc_name),
            &pvc_name,
            &naming::workspace_mount_path(&pv_name),
        );
        info!(
            "Mounting workspace volume {} at {}",
            pvc_name, binding.mount.mount_path
        );
        bindings.push(binding);
    }
    bindings
}

#[derive(Debug, Deserialize)]
struct WorkspaceDescriptor {
    spec: WorkspaceSpec,
    status: WorkspaceStatus,
}

#[derive(Debug, Deserialize)]
struct WorkspaceSpec {
    storage: WorkspaceStorage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceStorage {
    persistent_volumes: Vec<PersistentVolumeRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistentVolumeRef {
    name: String,
    volume_source: AccessPointRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessPointRef {
    access_point_name: String,
}

#[derive(Debug, Deserialize)]
struct WorkspaceStatus {
    aws: AwsStatus,
}

#[derive(Debug, Deserialize)]
struct AwsStatus {
    efs: EfsStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EfsStatus {
    access_points: Vec<AccessPoint>,
}

#[derive(Debug, Deserialize)]
struct AccessPoint {
    name: String,
}

/// Temporary claim mounts for the storage of another workspace.
pub fn cross_workspace_bindings_from_descriptor(
    workspace: &str,
    descriptor: serde_json::Value,
) -> Result<Vec<VolumeBinding>> {
    let descriptor: WorkspaceDescriptor = serde_json::from_value(descriptor).map_err(|e| {
        AppError::CrossWorkspaceResolution(format!(
            "malformed storage descriptor for workspace {}: {}",
            workspace, e
        ))
    })?;

    let pv_by_access_point: HashMap<&str, &str> = descriptor
        .spec
        .storage
        .persistent_volumes
        .iter()
        .map(|pv| (pv.volume_source.access_point_name.as_str(), pv.name.as_str()))
        .collect();

    descriptor
        .status
        .aws
        .efs
        .access_points
        .iter()
        .map(|access_point| {
            let pv_name: &str = pv_by_access_point
                .get(access_point.name.as_str())
                .copied()
                .ok_or_else(|| {
                    AppError::CrossWorkspaceResolution(format!(
                        "access point {} of workspace {} has no persistent volume",
                        access_point.name, workspace
                    ))
                })?;
            let base = pv_name.strip_prefix("pv-").unwrap_or(pv_name);
            let volume_name = format!("temp-pv-{}", base);
            let claim_name = format!("temp-pvc-workspace-{}", base);

            let binding = VolumeBinding::claim(
                &volume_name,
                &claim_name,
                &naming::workspace_mount_path(base),
            );
            info!(
                "Mounting calling workspace volume {} with claim {} at {}",
                volume_name, claim_name, binding.mount.mount_path
            );
            Ok(binding)
        })
        .collect()
}

/// Fetch the calling workspace descriptor and derive its mounts
pub async fn cross_workspace_bindings(
    context: &ClusterContext,
    resource: &WorkspaceResourceConfig,
    calling_workspace: &str,
) -> Result<Vec<VolumeBinding>> {
    let descriptor = context
        .api()
        .get_custom_resource(resource, calling_workspace)
        .await
        .map_err(|e| {
            error!("Error getting workspace resource {}: {}", calling_workspace, e);
            AppError::CrossWorkspaceResolution(format!(
                "cannot fetch workspace {}: {}",
                calling_workspace, e
            ))
        })?;

    cross_workspace_bindings_from_descriptor(calling_workspace, descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_split_is_aligned() {
        let plan = VolumePlan::new()
            .with(workflow_binding("abc"))
            .with(params_binding("abc"))
            .with(working_dir_binding("calrissian-wdir"))
            .with_optional(pod_env_vars_binding("abc", false))
            .with_optional(node_selector_binding("abc", true));
        assert_eq!(plan.len(), 4);

        let (volumes, mounts) = plan.split();
        assert_eq!(volumes.len(), mounts.len());
        for (volume, mount) in volumes.iter().zip(&mounts) {
            assert_eq!(volume.name, mount.name);
        }
        assert_eq!(mounts[3].mount_path, "/pod-node-selector");
    }

    #[test]
    fn test_config_map_binding() {
        let binding = workflow_binding("abc");
        let source = binding.volume.config_map.unwrap();
        assert_eq!(source.name.as_deref(), Some("cwl-workflow-abc"));
        let items = source.items.unwrap();
        assert_eq!(items[0].key, "cwl-workflow");
        assert_eq!(items[0].path, "workflow.cwl");
        assert_eq!(items[0].mode, Some(0o644));
        assert_eq!(binding.mount.mount_path, "/workflow-input");
        assert_eq!(binding.mount.read_only, Some(true));
    }

    #[test]
    fn test_working_dir_binding_is_read_write() {
        let binding = working_dir_binding("shared-claim");
        let claim = binding.volume.persistent_volume_claim.unwrap();
        assert_eq!(claim.claim_name, "shared-claim");
        assert_eq!(binding.mount.mount_path, "/calrissian");
        assert_eq!(binding.mount.read_only, Some(false));
    }

    #[test]
    fn test_parse_pvc_registry() {
        let data = BTreeMap::from([(
            "pvcs".to_string(),
            r#"[{"pvcName": "pvc-data", "pvName": "data"}, {"pvName": "orphan"}]"#.to_string(),
        )]);
        let entries = parse_pvc_registry(Some(&data));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pvc_name.as_deref(), Some("pvc-data"));
        assert_eq!(entries[1].pvc_name, None);
    }

    #[test]
    fn test_parse_pvc_registry_degrades_to_empty() {
        assert!(parse_pvc_registry(None).is_empty());

        let missing_key = BTreeMap::new();
        assert!(parse_pvc_registry(Some(&missing_key)).is_empty());

        let garbage = BTreeMap::from([("pvcs".to_string(), "{not-json".to_string())]);
        assert!(parse_pvc_registry(Some(&garbage)).is_empty());
    }

    fn descriptor() -> serde_json::Value {
        json!({
            "apiVersion": "core.telespazio-uk.io/v1alpha1",
            "kind": "Workspace",
            "metadata": {"name": "ws-bob"},
            "spec": {"storage": {"persistentVolumes": [
                {"name": "pv-ws-bob-data", "volumeSource": {"accessPointName": "ap-data"}},
                {"name": "pv-ws-bob-scratch", "volumeSource": {"accessPointName": "ap-scratch"}}
            ]}},
            "status": {"aws": {"efs": {"accessPoints": [
                {"name": "ap-data"},
                {"name": "ap-scratch"}
            ]}}}
        })
    }

    #[test]
    fn test_cross_workspace_bindings() {
        let bindings = cross_workspace_bindings_from_descriptor("ws-bob", descriptor()).unwrap();
        assert_eq!(bindings.len(), 2);

        let first = &bindings[0];
        assert_eq!(first.volume.name, "temp-pv-ws-bob-data");
        assert_eq!(
            first
                .volume
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "temp-pvc-workspace-ws-bob-data"
        );
        assert_eq!(first.mount.mount_path, "/workspace/ws-bob-data");
        assert_eq!(bindings[1].mount.mount_path, "/workspace/ws-bob-scratch");
    }

    #[test]
    fn test_cross_workspace_unknown_access_point() {
        let mut descriptor = descriptor();
        descriptor["status"]["aws"]["efs"]["accessPoints"]
            .as_array_mut()
            .unwrap()
            .push(json!({"name": "ap-ghost"}));

        let err = cross_workspace_bindings_from_descriptor("ws-bob", descriptor).unwrap_err();
        assert!(matches!(err, AppError::CrossWorkspaceResolution(_)));
    }

    #[test]
    fn test_cross_workspace_malformed_descriptor() {
        let err = cross_workspace_bindings_from_descriptor("ws-bob", json!({"spec": {}}))
            .unwrap_err();
        assert!(matches!(err, AppError::CrossWorkspaceResolution(_)));
    }
}
