use anyhow::Context;
use tracing::{info, warn};

use fleetshift_aws::AwsControlPlane;
use fleetshift_core::{ClusterRef, FleetshiftConfig};
use fleetshift_health::{DeploymentVerifier, VerifierConfig, resolve_service};

pub struct CheckArgs {
    pub aws_region: String,
    pub cluster_name: String,
    pub service_name: String,
    pub task_definition: Option<String>,
    pub min_active_tasks: Option<u32>,
    pub check_timeout: Option<u64>,
    pub loadbalancer_consecutive_successes: Option<u32>,
}

/// Flags win over `[checks]` in the config file, which wins over defaults.
pub fn verifier_config(args: &CheckArgs, config: &FleetshiftConfig) -> VerifierConfig {
    let mut verifier = VerifierConfig::from_settings(&config.checks());
    if let Some(timeout) = args.check_timeout {
        verifier.loadbalancer.timeout_secs = timeout;
        verifier.tasks.timeout_secs = timeout;
    }
    if let Some(n) = args.loadbalancer_consecutive_successes {
        verifier.loadbalancer.required_consecutive_successes = n;
    }
    verifier
}

pub async fn check_deployment(args: CheckArgs, config: &FleetshiftConfig) -> anyhow::Result<()> {
    let verifier_config = verifier_config(&args, config);
    let cluster = ClusterRef::new(&args.cluster_name, &args.aws_region);
    let client = AwsControlPlane::from_region(&args.aws_region).await;

    let service = resolve_service(
        &client,
        &cluster,
        &args.service_name,
        args.task_definition.clone(),
        args.min_active_tasks,
    )
    .await
    .with_context(|| format!("failed to describe service {}", args.service_name))?;

    let outcome = DeploymentVerifier::new(&client, &service, verifier_config)
        .verify()
        .await
        .with_context(|| format!("deployment check of {} failed", args.service_name))?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.passed {
        info!(service = %args.service_name, "deployment is healthy");
        Ok(())
    } else {
        warn!(service = %args.service_name, reason = %outcome.reason, "deployment is not healthy");
        anyhow::bail!("deployment of {} is not healthy: {}", args.service_name, outcome.reason)
    }
}
