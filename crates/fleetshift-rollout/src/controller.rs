//! Rollout controller: drives the drain-and-wait state machine.
//!
//! ```text
//! Start → CapacityDoubled → InstancesDraining → WaitForDrain → CapacityRestored
//!                                                    └──────→ TimedOut
//! ```
//!
//! The set of instances to drain is snapshotted before capacity is doubled,
//! so instances that join during the rollout are never drained. The drain
//! deadline is measured from the start of the rollout.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use fleetshift_core::{
    ClusterRef, ComputeInstance, ControlPlane, FleetError, FleetResult, InstanceId, InstanceStatus,
    list_all_cluster_instances, poll_until_since, scaling_group_capacity,
};

use crate::config::RolloutConfig;
use crate::error::{RolloutError, RolloutResult};

/// Current phase of a cluster rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RolloutPhase {
    /// Rollout not started.
    Start,
    /// Scaling group set to twice its original capacity.
    CapacityDoubled,
    /// Snapshotted instances marked DRAINING.
    InstancesDraining,
    /// Waiting for snapshotted instances to shed their tasks.
    WaitForDrain,
    /// Original capacity restored. Terminal success.
    CapacityRestored,
    /// Drain did not finish in time. Terminal failure.
    TimedOut,
}

/// Summary of a completed rollout.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RolloutReport {
    pub scaling_group: String,
    pub cluster: ClusterRef,
    pub original_capacity: u32,
    /// Instances that were drained (the pre-rollout snapshot).
    pub drained_instances: Vec<InstanceId>,
    /// Number of drain checks performed.
    pub drain_polls: u32,
    pub elapsed: Duration,
}

/// One rollout of one cluster.
pub struct ClusterRollout<'a, C> {
    client: &'a C,
    scaling_group: String,
    cluster: ClusterRef,
    config: RolloutConfig,
    phase: RolloutPhase,
    history: Vec<RolloutPhase>,
}

impl<'a, C: ControlPlane> ClusterRollout<'a, C> {
    pub fn new(client: &'a C, scaling_group: &str, cluster: ClusterRef, config: RolloutConfig) -> Self {
        Self {
            client,
            scaling_group: scaling_group.to_string(),
            cluster,
            config,
            phase: RolloutPhase::Start,
            history: vec![RolloutPhase::Start],
        }
    }

    pub fn phase(&self) -> RolloutPhase {
        self.phase
    }

    /// Every phase entered so far, in order.
    pub fn history(&self) -> &[RolloutPhase] {
        &self.history
    }

    /// Run the rollout to completion.
    ///
    /// Lookup errors and remote failures abort immediately. A drain that does
    /// not finish before the timeout is fatal and leaves capacity doubled.
    pub async fn run(&mut self) -> RolloutResult<RolloutReport> {
        let started = Instant::now();
        info!(
            cluster = %self.cluster,
            asg = %self.scaling_group,
            timeout_secs = self.config.timeout_secs,
            "beginning roll out"
        );

        let original_capacity = scaling_group_capacity(self.client, &self.scaling_group).await?;
        let snapshot = list_all_cluster_instances(self.client, &self.cluster).await?;
        info!(
            cluster = %self.cluster,
            instances = snapshot.len(),
            "snapshotted instances to drain"
        );

        self.set_capacity(original_capacity.saturating_mul(2)).await?;
        self.enter(RolloutPhase::CapacityDoubled);

        let mut drain_polls = 0;
        if snapshot.is_empty() {
            warn!(cluster = %self.cluster, "cluster has no instances, nothing to drain");
        } else {
            self.mark_draining(&snapshot).await?;
            self.enter(RolloutPhase::InstancesDraining);

            drain_polls = self.wait_for_drain(&snapshot, started).await?;
        }

        self.set_capacity(original_capacity).await?;
        self.enter(RolloutPhase::CapacityRestored);

        info!(cluster = %self.cluster, "roll out complete");
        Ok(RolloutReport {
            scaling_group: self.scaling_group.clone(),
            cluster: self.cluster.clone(),
            original_capacity,
            drained_instances: snapshot,
            drain_polls,
            elapsed: started.elapsed(),
        })
    }

    fn enter(&mut self, phase: RolloutPhase) {
        info!(cluster = %self.cluster, from = ?self.phase, to = ?phase, "rollout phase change");
        self.phase = phase;
        self.history.push(phase);
    }

    async fn set_capacity(&self, desired_capacity: u32) -> FleetResult<()> {
        info!(
            asg = %self.scaling_group,
            desired_capacity,
            "setting desired capacity of scaling group"
        );
        self.client
            .set_scaling_group_capacity(&self.scaling_group, desired_capacity)
            .await
    }

    async fn mark_draining(&self, instance_ids: &[InstanceId]) -> FleetResult<()> {
        info!(
            cluster = %self.cluster,
            instances = ?instance_ids,
            "putting instances into DRAINING state"
        );
        self.client
            .set_instances_draining(&self.cluster, instance_ids)
            .await
    }

    /// Poll until every snapshotted instance is drained. Returns the number
    /// of drain checks made.
    async fn wait_for_drain(&mut self, snapshot: &[InstanceId], started: Instant) -> RolloutResult<u32> {
        self.enter(RolloutPhase::WaitForDrain);

        let client = self.client;
        let cluster = &self.cluster;
        let sleep_secs = self.config.sleep_secs;
        let mut polls = 0u32;

        let drained = poll_until_since(started, &self.config.drain_poll(), || {
            polls += 1;
            async move {
                let drained = all_instances_drained(client, cluster, snapshot).await?;
                if drained {
                    info!(%cluster, "all instances have been drained");
                } else {
                    info!(%cluster, sleep_secs, "will sleep and check again");
                }
                Ok::<_, FleetError>(drained)
            }
        })
        .await?;

        if !drained {
            self.enter(RolloutPhase::TimedOut);
            warn!(
                cluster = %self.cluster,
                polls,
                "drain timed out, leaving capacity doubled and instances draining"
            );
            return Err(RolloutError::DrainTimeout {
                timeout_secs: self.config.timeout_secs,
                elapsed_secs: started.elapsed().as_secs(),
                instances: snapshot.len(),
            });
        }

        Ok(polls)
    }
}

/// Describe the snapshotted instances and report whether all of them are
/// fully drained.
///
/// An empty describe result for a nonempty request means the remote state no
/// longer matches the snapshot and is a lookup error.
async fn all_instances_drained<C: ControlPlane>(
    client: &C,
    cluster: &ClusterRef,
    instance_ids: &[InstanceId],
) -> FleetResult<bool> {
    info!(%cluster, "checking if all tasks have been drained from the instances");

    let instances = client.describe_cluster_instances(cluster, instance_ids).await?;
    if instances.is_empty() {
        return Err(FleetError::Lookup(format!(
            "describing {} instances in cluster {} returned no instances",
            instance_ids.len(),
            cluster.name
        )));
    }

    Ok(instances.iter().all(instance_fully_drained))
}

/// An instance is drained once it has left ACTIVE and has no pending or
/// running tasks.
fn instance_fully_drained(instance: &ComputeInstance) -> bool {
    let instance_id = &instance.instance_id;

    if instance.status == InstanceStatus::Active {
        info!(%instance_id, "instance is still in ACTIVE status");
        return false;
    }
    if instance.pending_task_count > 0 {
        info!(%instance_id, pending = instance.pending_task_count, "instance still has pending tasks");
        return false;
    }
    if instance.running_task_count > 0 {
        info!(%instance_id, running = instance.running_task_count, "instance still has running tasks");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use fleetshift_core::InMemoryControlPlane;

    use super::*;

    fn cluster() -> ClusterRef {
        ClusterRef::new("prod", "us-east-1")
    }

    fn instance(id: &str, status: InstanceStatus, pending: u32, running: u32) -> ComputeInstance {
        ComputeInstance {
            instance_id: id.to_string(),
            status,
            pending_task_count: pending,
            running_task_count: running,
        }
    }

    fn fleet(capacity: u32, drain_after: Option<u32>) -> InMemoryControlPlane {
        let plane = match drain_after {
            Some(n) => InMemoryControlPlane::new().with_drain_after_describes(n),
            None => InMemoryControlPlane::new(),
        };
        plane.add_scaling_group("asg", Some(capacity));
        plane.link_scaling_group("asg", &cluster());
        for i in 0..capacity {
            let id = format!("ci-{i}");
            plane.register_instance(&cluster(), ComputeInstance::active(id.clone()));
            plane.start_task(&cluster(), Some(&id), "web:1");
        }
        plane
    }

    fn config(timeout_secs: u64, sleep_secs: u64) -> RolloutConfig {
        RolloutConfig { timeout_secs, sleep_secs }
    }

    #[test]
    fn drained_requires_inactive_and_idle() {
        assert!(!instance_fully_drained(&instance("a", InstanceStatus::Active, 0, 0)));
        assert!(!instance_fully_drained(&instance("a", InstanceStatus::Draining, 1, 0)));
        assert!(!instance_fully_drained(&instance("a", InstanceStatus::Draining, 0, 2)));
        assert!(instance_fully_drained(&instance("a", InstanceStatus::Draining, 0, 0)));
        assert!(instance_fully_drained(&instance("a", InstanceStatus::Inactive, 0, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn phases_follow_strict_sequence() {
        let plane = fleet(2, Some(1));
        let mut rollout = ClusterRollout::new(&plane, "asg", cluster(), config(60, 10));

        let report = rollout.run().await.unwrap();
        assert_eq!(
            rollout.history(),
            &[
                RolloutPhase::Start,
                RolloutPhase::CapacityDoubled,
                RolloutPhase::InstancesDraining,
                RolloutPhase::WaitForDrain,
                RolloutPhase::CapacityRestored,
            ]
        );
        assert_eq!(report.original_capacity, 2);
        assert_eq!(report.drain_polls, 1);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn phase_changes_are_logged_at_info() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .without_time()
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let plane = fleet(2, Some(1));
        let mut rollout = ClusterRollout::new(&plane, "asg", cluster(), config(60, 10));
        rollout.run().await.unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let changes: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("rollout phase change"))
            .collect();
        assert_eq!(changes.len(), 4, "{output}");
        assert!(changes.iter().all(|line| line.contains("INFO")));
        assert!(changes[0].contains("to=CapacityDoubled"));
        assert!(changes[3].contains("to=CapacityRestored"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_fatal_and_does_not_roll_back() {
        let plane = fleet(2, None);
        let mut rollout = ClusterRollout::new(&plane, "asg", cluster(), config(30, 10));

        let err = rollout.run().await.unwrap_err();
        assert!(matches!(
            err,
            RolloutError::DrainTimeout { timeout_secs: 30, instances: 2, .. }
        ));
        assert_eq!(rollout.phase(), RolloutPhase::TimedOut);
        assert_eq!(plane.desired_capacity("asg"), Some(4));
        assert_eq!(plane.calls().describe_instances, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_scaling_group_aborts_before_any_command() {
        let plane = InMemoryControlPlane::new();
        let mut rollout = ClusterRollout::new(&plane, "asg", cluster(), RolloutConfig::default());

        let err = rollout.run().await.unwrap_err();
        assert!(matches!(err, RolloutError::Fleet(FleetError::Lookup(_))));
        assert_eq!(rollout.phase(), RolloutPhase::Start);
        assert!(plane.capacity_changes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_describe_is_lookup_error() {
        let plane = InMemoryControlPlane::new();
        let ids = vec!["ci-gone".to_string()];

        let err = all_instances_drained(&plane, &cluster(), &ids).await.unwrap_err();
        assert!(matches!(err, FleetError::Lookup(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_cluster_skips_drain() {
        let plane = InMemoryControlPlane::new();
        plane.add_scaling_group("asg", Some(0));
        let mut rollout = ClusterRollout::new(&plane, "asg", cluster(), RolloutConfig::default());

        let report = rollout.run().await.unwrap();
        assert!(report.drained_instances.is_empty());
        assert!(plane.drain_commands().is_empty());
        assert_eq!(
            plane.capacity_changes(),
            vec![("asg".to_string(), 0), ("asg".to_string(), 0)]
        );
        assert_eq!(rollout.phase(), RolloutPhase::CapacityRestored);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_while_draining_propagates() {
        let plane = fleet(1, None);
        let mut rollout = ClusterRollout::new(&plane, "asg", cluster(), config(600, 10));

        // Fail the first drain check: scaling lookup, listing, capacity and
        // drain commands have already happened by then.
        let run = rollout.run();
        tokio::pin!(run);
        tokio::select! {
            biased;
            _ = &mut run => panic!("rollout should still be waiting"),
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
        plane.fail_next_call("rate exceeded");

        let err = run.await.unwrap_err();
        assert!(matches!(err, RolloutError::Fleet(FleetError::Remote(_))));
        assert_eq!(plane.desired_capacity("asg"), Some(2));
    }
}
