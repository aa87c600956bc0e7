//! Calrissian job specification builder
//!
//! Turns a `WorkflowExecutionRequest` into a batch `Job` running the
//! Calrissian workflow engine. Creating a `CalrissianJob` assigns the job
//! name and stages the workflow, parameters and optional pod settings as
//! config maps; `build` then assembles the manifest.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ExecAction, Lifecycle, LifecycleHandler,
    ObjectFieldSelector, PodSecurityContext, PodSpec, PodTemplateSpec, ResourceRequirements,
    Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::naming::{self, CALRISSIAN_BASE_PATH, CALRISSIAN_CONTAINER};
use super::volumes::{self, VolumePlan};
use crate::config::LauncherConfig;
use crate::domain::entities::{PodSecurity, WorkflowExecutionRequest};
use crate::error::{AppError, Result};
use crate::infrastructure::cluster::ClusterContext;

pub const POD_TEMPLATE_NAME: &str = "calrissian-pod";
pub const TERMINATION_GRACE_PERIOD_SECS: i64 = 120;
pub const PRE_STOP_SLEEP_SECS: u32 = 30;

const CPU_REQUEST: &str = "1000m";
const MEMORY_REQUEST: &str = "1Gi";
const CPU_LIMIT: &str = "2000m";
const MEMORY_LIMIT: &str = "2Gi";

/// A built job manifest
#[derive(Debug, Clone, PartialEq)]
pub struct JobManifest {
    pub job_name: String,
    pub job: Job,
}

impl JobManifest {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.job)?)
    }

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.job
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
    }

    pub fn container(&self) -> Option<&Container> {
        self.pod_spec().and_then(|spec| spec.containers.first())
    }

    pub fn args(&self) -> &[String] {
        self.container()
            .and_then(|c| c.args.as_deref())
            .unwrap_or_default()
    }

    pub fn volumes(&self) -> &[Volume] {
        self.pod_spec()
            .and_then(|spec| spec.volumes.as_deref())
            .unwrap_or_default()
    }

    pub fn volume_mounts(&self) -> &[VolumeMount] {
        self.container()
            .and_then(|c| c.volume_mounts.as_deref())
            .unwrap_or_default()
    }
}

/// A staged workflow launch, ready to be built into a manifest
#[derive(Debug, Clone)]
pub struct CalrissianJob {
    request: WorkflowExecutionRequest,
    context: ClusterContext,
    config: LauncherConfig,
    job_name: String,
    security: PodSecurity,
    service_account: String,
}

impl CalrissianJob {
    /// Validate the request, name the job and stage its config maps
    pub async fn new(
        request: WorkflowExecutionRequest,
        context: ClusterContext,
        config: LauncherConfig,
    ) -> Result<Self> {
        request.validate()?;

        if request.security_context.is_none() {
            info!("Using default security context {{runAsUser: 0, runAsGroup: 0, fsGroup: 0}}");
        }
        let security = request.effective_security();
        let service_account = request
            .service_account
            .clone()
            .unwrap_or_else(|| context.service_account.clone());

        let job = Self {
            job_name: naming::generate_job_name(),
            request,
            context,
            config,
            security,
            service_account,
        };
        info!("Job name: {}", job.job_name);

        job.stage().await?;
        Ok(job)
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn request(&self) -> &WorkflowExecutionRequest {
        &self.request
    }

    pub fn context(&self) -> &ClusterContext {
        &self.context
    }

    async fn stage(&self) -> Result<()> {
        let job_id = &self.request.job_id;

        info!("Create CWL config map");
        self.stage_config(
            &naming::workflow_config_name(job_id),
            naming::WORKFLOW_KEY,
            serde_yaml::to_string(&self.request.cwl)?,
        )
        .await?;

        info!("Create processing parameters config map");
        self.stage_config(
            &naming::params_config_name(job_id),
            naming::PARAMS_KEY,
            serde_yaml::to_string(&self.request.params)?,
        )
        .await?;

        if !self.request.pod_env_vars.is_empty() {
            info!("Create pod environment variables config map");
            self.stage_config(
                &naming::pod_env_vars_config_name(job_id),
                naming::POD_ENV_VARS_KEY,
                serde_json::to_string(&self.request.pod_env_vars)?,
            )
            .await?;
        }

        if !self.request.pod_node_selector.is_empty() {
            info!("Create pod node selector config map");
            self.stage_config(
                &naming::node_selector_config_name(job_id),
                naming::NODE_SELECTOR_KEY,
                serde_json::to_string(&self.request.pod_node_selector)?,
            )
            .await?;
        }

        Ok(())
    }

    async fn stage_config(&self, name: &str, key: &str, content: String) -> Result<()> {
        self.context
            .create_config(name, key, &content)
            .await
            .map_err(|e| {
                AppError::ConfigDependency(format!("cannot stage config map {}: {}", name, e))
            })
    }

    /// Arguments of the Calrissian command line, order matters
    pub fn calrissian_args(&self) -> Vec<String> {
        let request = &self.request;
        let output_dir = format!("{}/", CALRISSIAN_BASE_PATH);
        let mut args: Vec<String> = Vec::new();

        let mut push = |flag: &str, value: &str| {
            args.push(flag.to_string());
            args.push(value.to_string());
        };

        push("--stdout", &naming::mounted_file(CALRISSIAN_BASE_PATH, "output.json"));
        push("--stderr", &naming::mounted_file(CALRISSIAN_BASE_PATH, "stderr.log"));
        push("--usage-report", &naming::mounted_file(CALRISSIAN_BASE_PATH, "report.json"));
        push("--max-ram", &request.max_ram);
        push("--max-cores", &request.max_cores);
        push("--pod-serviceaccount", &self.service_account);
        push("--tmp-outdir-prefix", &output_dir);
        push("--outdir", &output_dir);

        if !request.pod_node_selector.is_empty() {
            push(
                "--pod-nodeselectors",
                &naming::mounted_file(naming::NODE_SELECTOR_MOUNT_PATH, naming::NODE_SELECTOR_FILE),
            );
        }
        if !request.pod_env_vars.is_empty() {
            push(
                "--pod-env-vars",
                &naming::mounted_file(naming::POD_ENV_VARS_MOUNT_PATH, naming::POD_ENV_VARS_FILE),
            );
        }
        if request.debug {
            args.push("--debug".to_string());
        }
        if request.no_read_only {
            args.push("--no-read-only".to_string());
        }
        if request.tool_logs {
            args.push("--tool-logs-basepath".to_string());
            args.push(CALRISSIAN_BASE_PATH.to_string());
        }

        args.push("--executing-workspace".to_string());
        args.push(request.executing_workspace.clone());
        args.push("--calling-workspace".to_string());
        args.push(request.calling_workspace.clone());
        args.push("--calling-service-account".to_string());
        args.push(self.context.calling_service_account.clone());
        args.push("--enable-ext".to_string());

        let workflow = naming::mounted_file(naming::WORKFLOW_MOUNT_PATH, naming::WORKFLOW_FILE);
        args.push(match &request.entry_point {
            Some(entry_point) => format!("{}#{}", workflow, entry_point),
            None => workflow,
        });
        args.push(naming::mounted_file(naming::PARAMS_MOUNT_PATH, naming::PARAMS_FILE));

        args
    }

    /// Collect every volume of the pod in mount order
    pub async fn volume_plan(&self) -> Result<VolumePlan> {
        let job_id = &self.request.job_id;

        let mut plan = VolumePlan::new()
            .with(volumes::workflow_binding(job_id))
            .with(volumes::params_binding(job_id))
            .with(volumes::working_dir_binding(&self.context.working_dir_claim))
            .with_optional(volumes::pod_env_vars_binding(
                job_id,
                !self.request.pod_env_vars.is_empty(),
            ))
            .with_optional(volumes::node_selector_binding(
                job_id,
                !self.request.pod_node_selector.is_empty(),
            ))
            .with_all(
                volumes::workspace_bindings(&self.context, &self.config.workspace_config_name)
                    .await,
            );

        if self.request.is_cross_workspace() {
            plan = plan.with_all(
                volumes::cross_workspace_bindings(
                    &self.context,
                    &self.config.workspace_resource,
                    &self.request.calling_workspace,
                )
                .await?,
            );
        }

        Ok(plan)
    }

    fn calrissian_container(&self, volume_mounts: Vec<VolumeMount>) -> Container {
        let mut env = vec![EnvVar {
            name: "CALRISSIAN_POD_NAME".to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: None,
                    field_path: "metadata.name".to_string(),
                }),
                ..Default::default()
            }),
        }];

        if self.request.keep_pods {
            env.push(EnvVar {
                name: "CALRISSIAN_DELETE_PODS".to_string(),
                value: Some("false".to_string()),
                value_from: None,
            });
            info!("Pods created by calrissian will not be deleted");
        }

        info!("Using Calrissian image: {}", self.config.image);

        Container {
            name: CALRISSIAN_CONTAINER.to_string(),
            image: Some(self.config.image.clone()),
            image_pull_policy: Some("Always".to_string()),
            command: Some(vec!["calrissian".to_string()]),
            args: Some(self.calrissian_args()),
            env: Some(env),
            volume_mounts: Some(volume_mounts),
            lifecycle: Some(Lifecycle {
                pre_stop: Some(LifecycleHandler {
                    exec: Some(ExecAction {
                        command: Some(vec![
                            "/bin/sh".to_string(),
                            "-c".to_string(),
                            format!("sleep {}", PRE_STOP_SLEEP_SECS),
                        ]),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            resources: Some(ResourceRequirements {
                requests: Some(quantities(CPU_REQUEST, MEMORY_REQUEST)),
                limits: Some(quantities(CPU_LIMIT, MEMORY_LIMIT)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_template(&self, container: Container, volumes: Vec<Volume>) -> PodTemplateSpec {
        let node_selector = (!self.request.pod_node_selector.is_empty())
            .then(|| self.request.pod_node_selector.clone());

        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                name: Some(POD_TEMPLATE_NAME.to_string()),
                labels: Some(BTreeMap::from([(
                    "pod_name".to_string(),
                    POD_TEMPLATE_NAME.to_string(),
                )])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![container],
                volumes: Some(volumes),
                node_selector,
                security_context: Some(PodSecurityContext {
                    run_as_user: Some(self.security.run_as_user),
                    run_as_group: Some(self.security.run_as_group),
                    fs_group: Some(self.security.fs_group),
                    ..Default::default()
                }),
                termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECS),
                service_account_name: Some(self.service_account.clone()),
                tolerations: Some(vec![Toleration {
                    key: Some(self.config.toleration_key.clone()),
                    operator: Some("Equal".to_string()),
                    value: Some("job".to_string()),
                    effect: Some("NoSchedule".to_string()),
                    toleration_seconds: None,
                }]),
                ..Default::default()
            }),
        }
    }

    /// Assemble the batch job manifest
    pub async fn build(&self) -> Result<JobManifest> {
        let (volumes, volume_mounts) = self.volume_plan().await?.split();
        let container = self.calrissian_container(volume_mounts);
        let template = self.pod_template(container, volumes);
        info!(
            "Created pod template with service account {}",
            self.service_account
        );

        let job = Job {
            metadata: ObjectMeta {
                name: Some(self.job_name.clone()),
                namespace: Some(self.context.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    "job_name".to_string(),
                    self.job_name.clone(),
                )])),
                ..Default::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(self.request.backoff_limit),
                template,
                ..Default::default()
            }),
            ..Default::default()
        };
        debug!("Built manifest for job {}", self.job_name);

        Ok(JobManifest {
            job_name: self.job_name.clone(),
            job,
        })
    }
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}
