//! Aggregate deployment verifier.
//!
//! Picks the checks that apply to a service, runs them in order, and stops at
//! the first failure.

use tracing::info;

use fleetshift_core::config::CheckSettings;
use fleetshift_core::{
    CheckOutcome, ClusterRef, ControlPlane, FleetResult, PollConfig, SchedulingStrategy,
    ServiceDescriptor,
};

use crate::checker::{CheckKind, DeploymentChecker};

/// Poll settings for the two families of checks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VerifierConfig {
    /// Used by the load-balancer check.
    pub loadbalancer: PollConfig,
    /// Used by the active-tasks and daemon checks.
    pub tasks: PollConfig,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            loadbalancer: PollConfig::new(600, 3, 5),
            tasks: PollConfig::new(600, 1, 5),
        }
    }
}

impl VerifierConfig {
    /// Defaults overlaid with `[checks]` from the config file.
    pub fn from_settings(settings: &CheckSettings) -> Self {
        let mut config = Self::default();
        for poll in [&mut config.loadbalancer, &mut config.tasks] {
            if let Some(timeout) = settings.timeout_secs {
                poll.timeout_secs = timeout;
            }
            if let Some(sleep) = settings.sleep_secs {
                poll.sleep_secs = sleep;
            }
        }
        if let Some(n) = settings.loadbalancer_consecutive_successes {
            config.loadbalancer.required_consecutive_successes = n;
        }
        if let Some(n) = settings.tasks_consecutive_successes {
            config.tasks.required_consecutive_successes = n;
        }
        config
    }

    fn poll_for(&self, kind: CheckKind) -> &PollConfig {
        match kind {
            CheckKind::Loadbalancer => &self.loadbalancer,
            CheckKind::ActiveTasks | CheckKind::Daemon => &self.tasks,
        }
    }
}

/// Checks that apply to `service`, in execution order: exactly one of
/// Daemon or ActiveTasks, then Loadbalancer when the service has target
/// groups.
pub fn applicable_checks(service: &ServiceDescriptor) -> Vec<CheckKind> {
    let mut checks = vec![match service.scheduling_strategy {
        SchedulingStrategy::Daemon => CheckKind::Daemon,
        SchedulingStrategy::Replica => CheckKind::ActiveTasks,
    }];
    if !service.target_groups.is_empty() {
        checks.push(CheckKind::Loadbalancer);
    }
    checks
}

/// Describe `service` and build the descriptor the checks run against.
///
/// `task_definition_arn` defaults to the service's current task definition;
/// `min_active_tasks` defaults to its desired count.
pub async fn resolve_service<C: ControlPlane>(
    client: &C,
    cluster: &ClusterRef,
    service: &str,
    task_definition_arn: Option<String>,
    min_active_tasks: Option<u32>,
) -> FleetResult<ServiceDescriptor> {
    let description = client.describe_service(cluster, service).await?;
    let descriptor = ServiceDescriptor::from_description(
        cluster.clone(),
        service,
        description,
        task_definition_arn,
        min_active_tasks,
    );
    info!(
        %cluster,
        service,
        task_definition = %descriptor.task_definition_arn,
        expected_replicas = descriptor.expected_replicas,
        strategy = ?descriptor.scheduling_strategy,
        target_groups = descriptor.target_groups.len(),
        "resolved service for deployment check"
    );
    Ok(descriptor)
}

/// Runs every applicable check for one service.
pub struct DeploymentVerifier<'a, C> {
    checker: DeploymentChecker<'a, C>,
    config: VerifierConfig,
}

impl<'a, C: ControlPlane> DeploymentVerifier<'a, C> {
    pub fn new(client: &'a C, service: &'a ServiceDescriptor, config: VerifierConfig) -> Self {
        Self {
            checker: DeploymentChecker::new(client, service),
            config,
        }
    }

    /// Run the applicable checks, returning the first failed outcome
    /// verbatim, or a pass if all of them pass.
    pub async fn verify(&self) -> FleetResult<CheckOutcome> {
        let checks = applicable_checks(self.checker.service());
        info!(
            service = %self.checker.service().service,
            checks = ?checks,
            "verifying deployment"
        );

        for kind in checks {
            let outcome = self.checker.run(kind, self.config.poll_for(kind)).await?;
            if !outcome.passed {
                return Ok(outcome);
            }
        }

        info!(service = %self.checker.service().service, "deployment verified");
        Ok(CheckOutcome::pass())
    }
}
