//! Calrissian launcher command line
//!
//! Stages a CWL workflow and its parameters, submits the Calrissian job and
//! follows it to completion.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use calrissian_launcher::core::logging::{init_structured_logging, LogFormat};
use calrissian_launcher::{
    CalrissianExecution, CalrissianJob, ClusterContext, KubeClusterApi, LauncherConfig,
    MonitorOutcome, WorkflowExecutionRequest,
};

#[derive(Parser)]
#[command(name = "calrissian-launcher")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log output format: compact, pretty or json
    #[arg(long, global = true, default_value = "compact", env = "CALRISSIAN_LOG_FORMAT")]
    log_format: String,

    /// YAML launcher configuration; environment variables are used otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a workflow and wait for it to finish
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// CWL document (YAML or JSON)
    #[arg(long)]
    cwl: PathBuf,

    /// Parameter file (YAML or JSON)
    #[arg(long)]
    params: PathBuf,

    /// Correlation id used to name the staged config maps
    #[arg(long)]
    job_id: String,

    #[arg(long)]
    calling_workspace: String,

    #[arg(long)]
    executing_workspace: String,

    /// Workflow entry point inside the CWL document
    #[arg(long)]
    entry_point: Option<String>,

    #[arg(long, default_value = "8G")]
    max_ram: String,

    #[arg(long, default_value = "16")]
    max_cores: String,

    /// Environment variable for the tool pods, KEY=VALUE
    #[arg(long = "pod-env-var", value_parser = parse_key_value)]
    pod_env_vars: Vec<(String, String)>,

    /// Node selector for the tool pods, KEY=VALUE
    #[arg(long = "node-selector", value_parser = parse_key_value)]
    node_selectors: Vec<(String, String)>,

    #[arg(long)]
    debug: bool,

    #[arg(long)]
    no_read_only: bool,

    /// Keep the pods created by Calrissian
    #[arg(long)]
    keep_pods: bool,

    /// Write tool logs to the working directory
    #[arg(long)]
    tool_logs: bool,

    #[arg(long, default_value_t = 2)]
    backoff_limit: i32,

    /// Print the job manifest instead of submitting it
    #[arg(long)]
    dry_run: bool,
}

fn parse_key_value(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", value))
}

fn read_document(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("cannot parse {}", path.display()))
}

async fn run(config: LauncherConfig, args: RunArgs) -> Result<()> {
    let mut request = WorkflowExecutionRequest::new(
        read_document(&args.cwl)?,
        read_document(&args.params)?,
        args.calling_workspace,
        args.executing_workspace,
        args.job_id,
    )
    .with_resources(args.max_ram, args.max_cores)
    .with_backoff_limit(args.backoff_limit)
    .debug(args.debug)
    .no_read_only(args.no_read_only)
    .keep_pods(args.keep_pods)
    .tool_logs(args.tool_logs);

    if let Some(entry_point) = args.entry_point {
        request = request.with_entry_point(entry_point);
    }
    request.pod_env_vars.extend(args.pod_env_vars);
    request.pod_node_selector.extend(args.node_selectors);

    let api = KubeClusterApi::try_default(config.namespace.clone()).await?;
    let context = ClusterContext::from_config(&config, Arc::new(api));
    let job = CalrissianJob::new(request, context, config.clone()).await?;

    if args.dry_run {
        let manifest = job.build().await?;
        println!("{}", manifest.to_yaml()?);
        return Ok(());
    }

    let mut execution = CalrissianExecution::new(job);
    execution.submit().await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let outcome = execution.monitor(&config.monitor, &cancel).await?;
    match outcome {
        MonitorOutcome::Finished { status, polls } => {
            info!("Job finished as {} after {} polls", status, polls);
            if let Some(handle) = execution.execution() {
                info!("Submitted at {}", handle.submitted_at.to_rfc3339());
            }
            if let Some(start) = execution.get_start_time().await? {
                info!("Started at {}", start.to_rfc3339());
            }
            if let Some(end) = execution.get_completion_time().await? {
                info!("Completed at {}", end.to_rfc3339());
            }

            println!("{}", execution.get_log().await?);
            match execution.get_output().await {
                Ok(output) => println!("{}", serde_json::to_string_pretty(&output)?),
                Err(e) => warn!("No workflow output: {}", e),
            }
            match execution.get_usage_report().await {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(e) => warn!("No usage report: {}", e),
            }

            if !outcome.is_success() {
                anyhow::bail!("workflow execution failed");
            }
        }
        MonitorOutcome::Cancelled { .. } => warn!("Stopped following the job, it keeps running"),
        MonitorOutcome::DeadlineExceeded { .. } => {
            anyhow::bail!("job still running after the configured max wait")
        }
        MonitorOutcome::NotSubmitted => anyhow::bail!("job was not submitted"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format: LogFormat = cli.log_format.parse()?;
    init_structured_logging(format)?;

    let config = match &cli.config {
        Some(path) => LauncherConfig::from_yaml_file(path)?,
        None => LauncherConfig::from_env()?,
    };

    match cli.command {
        Commands::Run(args) => run(config, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("AWS_REGION=eu-west-2").unwrap(),
            ("AWS_REGION".to_string(), "eu-west-2".to_string())
        );
        assert_eq!(
            parse_key_value("k=a=b").unwrap(),
            ("k".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "calrissian-launcher",
            "run",
            "--cwl",
            "wf.cwl",
            "--params",
            "params.yml",
            "--job-id",
            "abc",
            "--calling-workspace",
            "ws-a",
            "--executing-workspace",
            "ws-a",
            "--pod-env-var",
            "A=1",
            "--pod-env-var",
            "B=2",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command;
        assert_eq!(args.pod_env_vars.len(), 2);
        assert_eq!(args.max_ram, "8G");
        assert_eq!(args.backoff_limit, 2);
        assert!(!args.dry_run);
    }
}
