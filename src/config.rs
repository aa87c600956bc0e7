use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{AppError, Result};

pub const DEFAULT_IMAGE: &str = "terradue/calrissian:0.12.0";

/// Launcher configuration, shared by the job builder and the execution controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Namespace the job, its config maps and claims live in
    pub namespace: String,
    /// Service account the Calrissian pod runs as
    pub service_account: String,
    /// Service account of the caller, used for cross-workspace authorization
    pub calling_service_account: String,
    /// Read-write claim backing the Calrissian working directory
    pub working_dir_claim: String,
    /// Calrissian container image
    pub image: String,
    /// Taint key of the dedicated job nodes
    pub toleration_key: String,
    /// Config map holding the workspace PVC registry
    pub workspace_config_name: String,
    pub workspace_resource: WorkspaceResourceConfig,
    pub monitor: MonitorSettings,
}

/// Coordinates of the workspace custom resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkspaceResourceConfig {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespace: String,
}

/// Polling settings for the execution monitor
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub interval_secs: u64,
    pub max_wait_secs: Option<u64>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            service_account: "default".to_string(),
            calling_service_account: "default".to_string(),
            working_dir_claim: "calrissian-wdir".to_string(),
            image: DEFAULT_IMAGE.to_string(),
            toleration_key: "ades.zoo.org/dedicated".to_string(),
            workspace_config_name: "workspace-config".to_string(),
            workspace_resource: WorkspaceResourceConfig::default(),
            monitor: MonitorSettings::default(),
        }
    }
}

impl Default for WorkspaceResourceConfig {
    fn default() -> Self {
        Self {
            group: "core.telespazio-uk.io".to_string(),
            version: "v1alpha1".to_string(),
            kind: "Workspace".to_string(),
            plural: "workspaces".to_string(),
            namespace: "workspaces".to_string(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            max_wait_secs: None,
        }
    }
}

impl MonitorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }
}

impl LauncherConfig {
    /// Load configuration from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        let resource_defaults = WorkspaceResourceConfig::default();

        let config = Self {
            namespace: env_or("CALRISSIAN_NAMESPACE", defaults.namespace),
            service_account: env_or("CALRISSIAN_SERVICE_ACCOUNT", defaults.service_account),
            calling_service_account: env_or(
                "CALRISSIAN_CALLING_SERVICE_ACCOUNT",
                defaults.calling_service_account,
            ),
            working_dir_claim: env_or("CALRISSIAN_WDIR_CLAIM", defaults.working_dir_claim),
            image: env_or("CALRISSIAN_IMAGE", defaults.image),
            toleration_key: env_or("CALRISSIAN_TOLERATION_KEY", defaults.toleration_key),
            workspace_config_name: env_or(
                "CALRISSIAN_WORKSPACE_CONFIG",
                defaults.workspace_config_name,
            ),
            workspace_resource: WorkspaceResourceConfig {
                group: env_or("CALRISSIAN_WORKSPACE_GROUP", resource_defaults.group),
                version: env_or("CALRISSIAN_WORKSPACE_VERSION", resource_defaults.version),
                kind: env_or("CALRISSIAN_WORKSPACE_KIND", resource_defaults.kind),
                plural: env_or("CALRISSIAN_WORKSPACE_PLURAL", resource_defaults.plural),
                namespace: env_or("CALRISSIAN_WORKSPACE_NAMESPACE", resource_defaults.namespace),
            },
            monitor: MonitorSettings {
                interval_secs: match std::env::var("CALRISSIAN_MONITOR_INTERVAL") {
                    Ok(value) => parse_secs("CALRISSIAN_MONITOR_INTERVAL", &value)?,
                    Err(_) => defaults.monitor.interval_secs,
                },
                max_wait_secs: match std::env::var("CALRISSIAN_MONITOR_MAX_WAIT") {
                    Ok(value) => Some(parse_secs("CALRISSIAN_MONITOR_MAX_WAIT", &value)?),
                    Err(_) => None,
                },
            },
        };

        config.validate()?;
        debug!("Loaded launcher configuration from environment: {:?}", config);
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| AppError::Config(format!("Invalid launcher configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Cannot read configuration {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("namespace", &self.namespace),
            ("service_account", &self.service_account),
            ("calling_service_account", &self.calling_service_account),
            ("working_dir_claim", &self.working_dir_claim),
            ("image", &self.image),
            ("toleration_key", &self.toleration_key),
            ("workspace_config_name", &self.workspace_config_name),
            ("workspace_resource.group", &self.workspace_resource.group),
            ("workspace_resource.version", &self.workspace_resource.version),
            ("workspace_resource.kind", &self.workspace_resource.kind),
            ("workspace_resource.plural", &self.workspace_resource.plural),
            ("workspace_resource.namespace", &self.workspace_resource.namespace),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("'{}' must not be empty", field)));
            }
        }

        if self.monitor.interval_secs == 0 {
            return Err(AppError::Config(
                "monitor.interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn parse_secs(name: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        AppError::Config(format!("{} must be a number of seconds, got '{}'", name, value))
    })
}
