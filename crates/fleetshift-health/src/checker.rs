//! Deployment check predicates.
//!
//! Each predicate makes a fresh set of control plane calls per observation;
//! nothing is cached between polls.

use std::collections::HashSet;

use tracing::{debug, info};

use fleetshift_core::{
    CheckOutcome, ControlPlane, FleetResult, InstanceId, PollConfig, ServiceDescriptor, TaskFilter,
    TaskSummary, TargetHealthState, list_all_cluster_instances, poll_until,
};

/// The closed set of deployment checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CheckKind {
    /// Enough running tasks of the expected task definition.
    ActiveTasks,
    /// A running task of the expected task definition on every instance.
    Daemon,
    /// Every load-balancer target healthy.
    Loadbalancer,
}

impl CheckKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::ActiveTasks => "active-tasks",
            Self::Daemon => "daemon",
            Self::Loadbalancer => "loadbalancer",
        }
    }

    /// Fixed reason reported when the check does not converge in time.
    pub fn timeout_reason(self) -> &'static str {
        match self {
            Self::ActiveTasks => "Timedout waiting for the expected number of tasks to be active",
            Self::Daemon => "Timedout waiting for daemon service tasks to run on every instance",
            Self::Loadbalancer => "Timedout waiting for task to be healthy",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs deployment checks for one service.
pub struct DeploymentChecker<'a, C> {
    client: &'a C,
    service: &'a ServiceDescriptor,
}

impl<'a, C: ControlPlane> DeploymentChecker<'a, C> {
    pub fn new(client: &'a C, service: &'a ServiceDescriptor) -> Self {
        Self { client, service }
    }

    pub fn service(&self) -> &ServiceDescriptor {
        self.service
    }

    /// Poll `kind` until it converges or `poll` times out.
    ///
    /// Remote errors abort the check and propagate; a timeout is reported as
    /// a failed outcome.
    pub async fn run(&self, kind: CheckKind, poll: &PollConfig) -> FleetResult<CheckOutcome> {
        info!(
            check = %kind,
            service = %self.service.service,
            timeout_secs = poll.timeout_secs,
            required = poll.required_successes(),
            "running deployment check"
        );

        let passed = poll_until(poll, || self.check(kind)).await?;
        if !passed {
            info!(check = %kind, service = %self.service.service, "deployment check timed out");
            return Ok(CheckOutcome::fail(kind.timeout_reason()));
        }

        info!(check = %kind, service = %self.service.service, "passed deployment check");
        Ok(CheckOutcome::pass())
    }

    /// A single observation of `kind`.
    pub async fn check(&self, kind: CheckKind) -> FleetResult<bool> {
        match kind {
            CheckKind::ActiveTasks => self.check_tasks_active().await,
            CheckKind::Daemon => self.check_daemon_fully_deployed().await,
            CheckKind::Loadbalancer => self.check_targets_healthy().await,
        }
    }

    /// At least `expected_replicas` running tasks of the expected task
    /// definition. Extra tasks are fine.
    pub async fn check_tasks_active(&self) -> FleetResult<bool> {
        let tasks = self.matching_running_tasks().await?;
        let expected = self.service.expected_replicas;
        let active = u32::try_from(tasks.len()).unwrap_or(u32::MAX);

        info!(
            service = %self.service.service,
            task_definition = %self.service.task_definition_arn,
            active,
            expected,
            "counted active tasks"
        );
        Ok(active >= expected)
    }

    /// Every cluster instance owns at least one running task of the expected
    /// task definition.
    pub async fn check_daemon_fully_deployed(&self) -> FleetResult<bool> {
        let instances = list_all_cluster_instances(self.client, &self.service.cluster).await?;
        let tasks = self.matching_running_tasks().await?;

        let covered: HashSet<&InstanceId> = tasks
            .iter()
            .filter_map(|task| task.instance_id.as_ref())
            .collect();
        let missing: Vec<&InstanceId> = instances
            .iter()
            .filter(|id| !covered.contains(id))
            .collect();

        if !missing.is_empty() {
            info!(
                service = %self.service.service,
                instances = instances.len(),
                missing = missing.len(),
                "daemon service is not running on every instance"
            );
            debug!(?missing, "instances without a daemon task");
            return Ok(false);
        }

        info!(
            service = %self.service.service,
            instances = instances.len(),
            "daemon service task found on every instance"
        );
        Ok(true)
    }

    /// Every registered target in every target group of the service reports
    /// healthy. A target group with no targets passes.
    pub async fn check_targets_healthy(&self) -> FleetResult<bool> {
        info!(
            count = self.service.target_groups.len(),
            service = %self.service.service,
            "found load balancer target groups for service"
        );

        for target_group in &self.service.target_groups {
            let targets = self.client.describe_target_health(target_group).await?;
            info!(count = targets.len(), %target_group, "found targets for target group");

            if let Some(target) = targets
                .iter()
                .find(|t| t.state != TargetHealthState::Healthy)
            {
                debug!(
                    %target_group,
                    target = %target.target_id,
                    state = ?target.state,
                    "target not healthy"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn matching_running_tasks(&self) -> FleetResult<Vec<TaskSummary>> {
        let tasks = self
            .client
            .list_tasks(&self.service.cluster, &TaskFilter::running())
            .await?;
        Ok(tasks
            .into_iter()
            .filter(|task| task.task_definition_arn == self.service.task_definition_arn)
            .filter(TaskSummary::is_running)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use fleetshift_core::{
        ClusterRef, ComputeInstance, FleetError, InMemoryControlPlane, SchedulingStrategy,
        TaskStatus,
    };

    use super::*;

    const TASK_DEF: &str = "arn:aws:ecs:us-east-1:123:task-definition/web:2";

    fn cluster() -> ClusterRef {
        ClusterRef::new("prod", "us-east-1")
    }

    fn service(replicas: u32, target_groups: &[&str]) -> ServiceDescriptor {
        ServiceDescriptor {
            cluster: cluster(),
            service: "web".to_string(),
            task_definition_arn: TASK_DEF.to_string(),
            expected_replicas: replicas,
            target_groups: target_groups.iter().map(|s| s.to_string()).collect(),
            scheduling_strategy: SchedulingStrategy::Replica,
        }
    }

    #[tokio::test]
    async fn active_tasks_boundary() {
        let plane = InMemoryControlPlane::new();
        let svc = service(3, &[]);
        let checker = DeploymentChecker::new(&plane, &svc);

        plane.start_task(&cluster(), None, TASK_DEF);
        plane.start_task(&cluster(), None, TASK_DEF);
        assert!(!checker.check_tasks_active().await.unwrap(), "r - 1 must fail");

        plane.start_task(&cluster(), None, TASK_DEF);
        assert!(checker.check_tasks_active().await.unwrap(), "r must pass");

        plane.start_task(&cluster(), None, TASK_DEF);
        assert!(checker.check_tasks_active().await.unwrap(), "over-provisioning passes");
    }

    #[tokio::test]
    async fn active_tasks_ignores_other_definitions_and_non_running() {
        let plane = InMemoryControlPlane::new();
        let svc = service(1, &[]);
        let checker = DeploymentChecker::new(&plane, &svc);

        plane.start_task(&cluster(), None, "arn:aws:ecs:us-east-1:123:task-definition/web:1");
        plane.add_task(&cluster(), None, None, TASK_DEF, TaskStatus::Pending);
        assert!(!checker.check_tasks_active().await.unwrap());

        plane.start_task(&cluster(), None, TASK_DEF);
        assert!(checker.check_tasks_active().await.unwrap());
    }

    #[tokio::test]
    async fn task_definition_matches_full_arn_only() {
        let plane = InMemoryControlPlane::new();
        let mut svc = service(1, &[]);
        svc.task_definition_arn = "web:2".to_string();
        let checker = DeploymentChecker::new(&plane, &svc);

        plane.start_task(&cluster(), None, TASK_DEF);
        assert!(!checker.check_tasks_active().await.unwrap());

        let svc = service(1, &[]);
        let checker = DeploymentChecker::new(&plane, &svc);
        assert!(checker.check_tasks_active().await.unwrap());
    }

    #[tokio::test]
    async fn daemon_requires_task_on_every_instance() {
        let plane = InMemoryControlPlane::new();
        plane.register_instance(&cluster(), ComputeInstance::active("ci-old"));
        plane.register_instance(&cluster(), ComputeInstance::active("ci-new"));
        plane.start_task(&cluster(), Some("ci-old"), TASK_DEF);

        let svc = service(0, &[]);
        let checker = DeploymentChecker::new(&plane, &svc);
        assert!(!checker.check_daemon_fully_deployed().await.unwrap());

        // A second task on the already-covered instance does not help.
        plane.start_task(&cluster(), Some("ci-old"), TASK_DEF);
        assert!(!checker.check_daemon_fully_deployed().await.unwrap());

        let task = plane.start_task(&cluster(), Some("ci-new"), TASK_DEF);
        assert!(checker.check_daemon_fully_deployed().await.unwrap());

        plane.stop_task(&cluster(), &task);
        assert!(!checker.check_daemon_fully_deployed().await.unwrap());
    }

    #[tokio::test]
    async fn daemon_ignores_tasks_of_other_definitions() {
        let plane = InMemoryControlPlane::new();
        plane.register_instance(&cluster(), ComputeInstance::active("ci-1"));
        plane.start_task(&cluster(), Some("ci-1"), "arn:other:1");

        let svc = service(0, &[]);
        let checker = DeploymentChecker::new(&plane, &svc);
        assert!(!checker.check_daemon_fully_deployed().await.unwrap());
    }

    #[tokio::test]
    async fn loadbalancer_all_targets_healthy() {
        let plane = InMemoryControlPlane::new();
        plane.set_target_health("tg-a", "10.0.0.1:80", TargetHealthState::Healthy);
        plane.set_target_health("tg-b", "10.0.0.2:80", TargetHealthState::Healthy);
        plane.set_target_health("tg-b", "10.0.0.3:80", TargetHealthState::Initial);

        let svc = service(1, &["tg-a", "tg-b"]);
        let checker = DeploymentChecker::new(&plane, &svc);
        assert!(!checker.check_targets_healthy().await.unwrap());

        plane.set_target_health("tg-b", "10.0.0.3:80", TargetHealthState::Healthy);
        assert!(checker.check_targets_healthy().await.unwrap());
    }

    #[tokio::test]
    async fn loadbalancer_empty_target_group_passes() {
        let plane = InMemoryControlPlane::new();
        plane.add_target_group("tg-empty");

        let svc = service(1, &["tg-empty"]);
        let checker = DeploymentChecker::new(&plane, &svc);
        assert!(checker.check_targets_healthy().await.unwrap());
        assert_eq!(plane.calls().describe_target_health, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_fixed_timeout_reason() {
        let plane = InMemoryControlPlane::new();
        plane.set_target_health("tg-a", "10.0.0.1:80", TargetHealthState::Unhealthy);

        let svc = service(1, &["tg-a"]);
        let checker = DeploymentChecker::new(&plane, &svc);
        let outcome = checker
            .run(CheckKind::Loadbalancer, &PollConfig::new(20, 1, 5))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CheckOutcome::fail("Timedout waiting for task to be healthy")
        );
        assert_eq!(plane.calls().describe_target_health, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn run_propagates_remote_errors() {
        let plane = InMemoryControlPlane::new();
        let svc = service(1, &[]);
        let checker = DeploymentChecker::new(&plane, &svc);

        plane.fail_next_call("access denied");
        let err = checker
            .run(CheckKind::ActiveTasks, &PollConfig::new(600, 1, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Remote(_)));
        assert_eq!(plane.calls().list_tasks, 1);
    }

    #[test]
    fn kinds_have_distinct_reasons() {
        let reasons: HashSet<_> = [CheckKind::ActiveTasks, CheckKind::Daemon, CheckKind::Loadbalancer]
            .into_iter()
            .map(CheckKind::timeout_reason)
            .collect();
        assert_eq!(reasons.len(), 3);
    }
}
