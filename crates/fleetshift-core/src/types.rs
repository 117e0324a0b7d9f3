//! Domain types for clusters, scaling groups, instances, tasks, and
//! load-balancer targets.
//!
//! These are read-only snapshots of remote state. The string forms used by
//! `from_api` match the ECS / ELBv2 wire values.

use serde::{Deserialize, Serialize};

/// Identifier of a container instance inside a cluster (an ECS container
/// instance ARN, not an EC2 instance id).
pub type InstanceId = String;

/// Full ARN of a task definition, as reported on running tasks. Short
/// `family:revision` forms are not resolved and never match.
pub type TaskDefinitionArn = String;

// ── Cluster ───────────────────────────────────────────────────────

/// Identifies a cluster: its name or ARN plus the region it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterRef {
    pub name: String,
    pub region: String,
}

impl ClusterRef {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
        }
    }
}

impl std::fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.region)
    }
}

// ── Scaling group ─────────────────────────────────────────────────

/// One scaling group as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingGroup {
    pub name: String,
    /// `None` when the control plane reports no desired capacity.
    pub desired_capacity: Option<u32>,
}

// ── Instance ──────────────────────────────────────────────────────

/// Registration status of a cluster instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Active,
    Draining,
    Inactive,
    Registering,
    Deregistering,
    RegistrationFailed,
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    pub fn from_api(value: &str) -> Self {
        match value {
            "ACTIVE" => Self::Active,
            "DRAINING" => Self::Draining,
            "INACTIVE" => Self::Inactive,
            "REGISTERING" => Self::Registering,
            "DEREGISTERING" => Self::Deregistering,
            "REGISTRATION_FAILED" => Self::RegistrationFailed,
            _ => Self::Unknown,
        }
    }
}

/// One cluster member at the moment it was described.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeInstance {
    pub instance_id: InstanceId,
    pub status: InstanceStatus,
    pub pending_task_count: u32,
    pub running_task_count: u32,
}

impl ComputeInstance {
    /// An idle, active instance.
    pub fn active(instance_id: impl Into<InstanceId>) -> Self {
        Self {
            instance_id: instance_id.into(),
            status: InstanceStatus::Active,
            pending_task_count: 0,
            running_task_count: 0,
        }
    }
}

/// One page of instance ids from a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstancePage {
    pub instance_ids: Vec<InstanceId>,
    /// Continuation token; `None` on the last page.
    pub next_token: Option<String>,
}

// ── Tasks ─────────────────────────────────────────────────────────

/// Lifecycle status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Provisioning,
    Pending,
    Activating,
    Running,
    Deactivating,
    Stopping,
    Deprovisioning,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn from_api(value: &str) -> Self {
        match value {
            "PROVISIONING" => Self::Provisioning,
            "PENDING" => Self::Pending,
            "ACTIVATING" => Self::Activating,
            "RUNNING" => Self::Running,
            "DEACTIVATING" => Self::Deactivating,
            "STOPPING" => Self::Stopping,
            "DEPROVISIONING" => Self::Deprovisioning,
            "STOPPED" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

/// One scheduled unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_arn: String,
    pub task_definition_arn: TaskDefinitionArn,
    pub last_status: TaskStatus,
    /// Owning instance. Tasks without an instance (Fargate) have none.
    pub instance_id: Option<InstanceId>,
}

impl TaskSummary {
    pub fn is_running(&self) -> bool {
        self.last_status == TaskStatus::Running
    }
}

/// Filter for task listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Only tasks started by this service.
    pub service_name: Option<String>,
    /// Only tasks whose desired status is running.
    pub desired_running: bool,
}

impl TaskFilter {
    /// Every task the scheduler intends to keep running, regardless of service.
    pub fn running() -> Self {
        Self {
            service_name: None,
            desired_running: true,
        }
    }
}

// ── Services ──────────────────────────────────────────────────────

/// How the scheduler places a service's tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingStrategy {
    /// Keep a fixed number of replicas anywhere in the cluster.
    #[default]
    Replica,
    /// Keep exactly one task on every instance.
    Daemon,
}

impl SchedulingStrategy {
    pub fn from_api(value: &str) -> Self {
        match value {
            "DAEMON" => Self::Daemon,
            _ => Self::Replica,
        }
    }
}

/// A service as the control plane currently describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescription {
    pub service_arn: String,
    pub task_definition_arn: TaskDefinitionArn,
    pub desired_count: u32,
    pub scheduling_strategy: SchedulingStrategy,
    /// Target groups of the service's load-balancer associations.
    pub target_groups: Vec<String>,
}

/// What a deployment is expected to converge to. Built once per check and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub cluster: ClusterRef,
    pub service: String,
    pub task_definition_arn: TaskDefinitionArn,
    pub expected_replicas: u32,
    pub target_groups: Vec<String>,
    pub scheduling_strategy: SchedulingStrategy,
}

impl ServiceDescriptor {
    /// Build a descriptor from a live description. `task_definition_arn` and
    /// `expected_replicas` override what the service currently reports.
    pub fn from_description(
        cluster: ClusterRef,
        service: &str,
        description: ServiceDescription,
        task_definition_arn: Option<String>,
        expected_replicas: Option<u32>,
    ) -> Self {
        Self {
            cluster,
            service: service.to_string(),
            task_definition_arn: task_definition_arn.unwrap_or(description.task_definition_arn),
            expected_replicas: expected_replicas.unwrap_or(description.desired_count),
            target_groups: description.target_groups,
            scheduling_strategy: description.scheduling_strategy,
        }
    }
}

// ── Load balancer targets ─────────────────────────────────────────

/// Health state of a single load-balancer target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetHealthState {
    Initial,
    Healthy,
    Unhealthy,
    Unused,
    Draining,
    Unavailable,
    #[serde(other)]
    Unknown,
}

impl TargetHealthState {
    pub fn from_api(value: &str) -> Self {
        match value {
            "initial" => Self::Initial,
            "healthy" => Self::Healthy,
            "unhealthy" => Self::Unhealthy,
            "unused" => Self::Unused,
            "draining" => Self::Draining,
            "unavailable" => Self::Unavailable,
            _ => Self::Unknown,
        }
    }
}

/// One registered target of a target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHealth {
    pub target_id: String,
    pub state: TargetHealthState,
}

// ── Outcomes ──────────────────────────────────────────────────────

/// Result of a deployment check. `reason` is empty iff `passed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub reason: String,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: String::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_strings_map_to_statuses() {
        assert_eq!(InstanceStatus::from_api("DRAINING"), InstanceStatus::Draining);
        assert_eq!(InstanceStatus::from_api("bogus"), InstanceStatus::Unknown);
        assert_eq!(TaskStatus::from_api("RUNNING"), TaskStatus::Running);
        assert_eq!(TargetHealthState::from_api("healthy"), TargetHealthState::Healthy);
        assert_eq!(SchedulingStrategy::from_api("DAEMON"), SchedulingStrategy::Daemon);
        assert_eq!(SchedulingStrategy::from_api("REPLICA"), SchedulingStrategy::Replica);
    }

    #[test]
    fn instance_status_serializes_like_the_api() {
        let json = serde_json::to_string(&InstanceStatus::RegistrationFailed).unwrap();
        assert_eq!(json, "\"REGISTRATION_FAILED\"");
        let back: InstanceStatus = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(back, InstanceStatus::Unknown);
    }

    #[test]
    fn descriptor_overrides_take_precedence() {
        let description = ServiceDescription {
            service_arn: "arn:svc/web".to_string(),
            task_definition_arn: "web:7".to_string(),
            desired_count: 4,
            scheduling_strategy: SchedulingStrategy::Replica,
            target_groups: vec!["tg-a".to_string()],
        };
        let cluster = ClusterRef::new("prod", "us-east-1");

        let defaulted =
            ServiceDescriptor::from_description(cluster.clone(), "web", description.clone(), None, None);
        assert_eq!(defaulted.task_definition_arn, "web:7");
        assert_eq!(defaulted.expected_replicas, 4);

        let overridden = ServiceDescriptor::from_description(
            cluster,
            "web",
            description,
            Some("web:8".to_string()),
            Some(2),
        );
        assert_eq!(overridden.task_definition_arn, "web:8");
        assert_eq!(overridden.expected_replicas, 2);
        assert_eq!(overridden.target_groups, vec!["tg-a".to_string()]);
    }

    #[test]
    fn outcome_reason_empty_iff_passed() {
        assert!(CheckOutcome::pass().reason.is_empty());
        let failed = CheckOutcome::fail("nope");
        assert!(!failed.passed);
        assert_eq!(failed.reason, "nope");
    }
}
