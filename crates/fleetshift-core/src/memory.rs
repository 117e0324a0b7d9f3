//! InMemoryControlPlane: a programmable, in-process control plane.
//!
//! Holds scaling groups, cluster instances, tasks, services, and target
//! groups behind a mutex and records every command it receives. Two optional
//! behaviors make it eventually consistent in the way the real fleet is:
//!
//! - **scale-out launches**: raising a scaling group's capacity registers
//!   new ACTIVE instances in a linked cluster.
//! - **drain progress**: an instance marked DRAINING sheds its tasks after a
//!   configurable number of describe calls.
//!
//! Used by every fleetshift test suite in place of a real remote system.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::client::ControlPlane;
use crate::error::{FleetError, FleetResult};
use crate::types::*;

const DEFAULT_PAGE_SIZE: usize = 100;

/// Per-method call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub describe_scaling_groups: u32,
    pub set_capacity: u32,
    pub list_instance_pages: u32,
    pub describe_instances: u32,
    pub set_draining: u32,
    pub describe_service: u32,
    pub list_tasks: u32,
    pub describe_target_health: u32,
}

#[derive(Debug, Clone)]
struct StoredTask {
    service: Option<String>,
    summary: TaskSummary,
}

#[derive(Debug, Default)]
struct FleetState {
    scaling_groups: Vec<ScalingGroup>,
    /// scaling group name → cluster that receives launched instances.
    launch_targets: HashMap<String, ClusterRef>,
    /// cluster name → instances in registration order.
    instances: HashMap<String, Vec<ComputeInstance>>,
    /// cluster name → tasks.
    tasks: HashMap<String, Vec<StoredTask>>,
    /// (cluster name, service) → description.
    services: HashMap<(String, String), ServiceDescription>,
    target_groups: HashMap<String, Vec<TargetHealth>>,
    /// instance id → describe calls left before it reports drained.
    drain_countdown: HashMap<InstanceId, u32>,
    drain_after_describes: Option<u32>,
    page_size: usize,
    next_serial: u64,
    pending_failure: Option<String>,
    capacity_changes: Vec<(String, u32)>,
    drain_commands: Vec<Vec<InstanceId>>,
    calls: CallCounts,
}

impl FleetState {
    fn serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    fn take_failure(&mut self) -> FleetResult<()> {
        match self.pending_failure.take() {
            Some(message) => Err(FleetError::Remote(message)),
            None => Ok(()),
        }
    }

    fn instance_mut(&mut self, cluster: &str, instance_id: &str) -> Option<&mut ComputeInstance> {
        self.instances
            .get_mut(cluster)?
            .iter_mut()
            .find(|inst| inst.instance_id == instance_id)
    }

    /// Adjust the owning instance's counters when a task changes state.
    fn recount(&mut self, cluster: &str, instance_id: &str) {
        let (pending, running) = self
            .tasks
            .get(cluster)
            .map(|tasks| {
                tasks.iter().fold((0, 0), |(p, r), task| {
                    if task.summary.instance_id.as_deref() != Some(instance_id) {
                        return (p, r);
                    }
                    match task.summary.last_status {
                        TaskStatus::Pending | TaskStatus::Provisioning | TaskStatus::Activating => {
                            (p + 1, r)
                        }
                        TaskStatus::Running => (p, r + 1),
                        _ => (p, r),
                    }
                })
            })
            .unwrap_or((0, 0));

        if let Some(inst) = self.instance_mut(cluster, instance_id) {
            inst.pending_task_count = pending;
            inst.running_task_count = running;
        }
    }

    /// Stop every task on a drained instance and zero its counters.
    fn finish_drain(&mut self, cluster: &str, instance_id: &str) {
        if let Some(tasks) = self.tasks.get_mut(cluster) {
            for task in tasks.iter_mut() {
                if task.summary.instance_id.as_deref() == Some(instance_id) {
                    task.summary.last_status = TaskStatus::Stopped;
                }
            }
        }
        self.recount(cluster, instance_id);
        debug!(%cluster, %instance_id, "simulated drain finished");
    }

    fn launch_instances(&mut self, scaling_group: &str, count: u32) {
        let Some(cluster) = self.launch_targets.get(scaling_group).cloned() else {
            return;
        };
        for _ in 0..count {
            let id = format!("{scaling_group}-launched-{}", self.serial());
            self.instances
                .entry(cluster.name.clone())
                .or_default()
                .push(ComputeInstance::active(id));
        }
    }
}

/// Thread-safe in-memory control plane.
#[derive(Debug)]
pub struct InMemoryControlPlane {
    state: Mutex<FleetState>,
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FleetState {
                page_size: DEFAULT_PAGE_SIZE,
                ..Default::default()
            }),
        }
    }

    /// Page size for instance listings.
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state().page_size = page_size.max(1);
        self
    }

    /// Draining instances shed their tasks on the `describes`-th describe
    /// call after being marked. Without this, draining never finishes.
    pub fn with_drain_after_describes(self, describes: u32) -> Self {
        self.state().drain_after_describes = Some(describes);
        self
    }

    fn state(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Setup ──────────────────────────────────────────────────────

    pub fn add_scaling_group(&self, name: &str, desired_capacity: Option<u32>) {
        self.state().scaling_groups.push(ScalingGroup {
            name: name.to_string(),
            desired_capacity,
        });
    }

    /// Capacity increases on `scaling_group` register new instances in `cluster`.
    pub fn link_scaling_group(&self, scaling_group: &str, cluster: &ClusterRef) {
        self.state()
            .launch_targets
            .insert(scaling_group.to_string(), cluster.clone());
    }

    pub fn register_instance(&self, cluster: &ClusterRef, instance: ComputeInstance) {
        self.state()
            .instances
            .entry(cluster.name.clone())
            .or_default()
            .push(instance);
    }

    pub fn add_service(&self, cluster: &ClusterRef, service: &str, description: ServiceDescription) {
        self.state()
            .services
            .insert((cluster.name.clone(), service.to_string()), description);
    }

    pub fn add_target_group(&self, target_group: &str) {
        self.state()
            .target_groups
            .entry(target_group.to_string())
            .or_default();
    }

    /// Register or update one target's health.
    pub fn set_target_health(&self, target_group: &str, target_id: &str, state: TargetHealthState) {
        let mut fleet = self.state();
        let targets = fleet.target_groups.entry(target_group.to_string()).or_default();
        match targets.iter_mut().find(|t| t.target_id == target_id) {
            Some(target) => target.state = state,
            None => targets.push(TargetHealth {
                target_id: target_id.to_string(),
                state,
            }),
        }
    }

    /// Start a running task and return its ARN.
    pub fn start_task(
        &self,
        cluster: &ClusterRef,
        instance_id: Option<&str>,
        task_definition_arn: &str,
    ) -> String {
        self.add_task(cluster, None, instance_id, task_definition_arn, TaskStatus::Running)
    }

    /// Add a task in any status, optionally owned by a service.
    pub fn add_task(
        &self,
        cluster: &ClusterRef,
        service: Option<&str>,
        instance_id: Option<&str>,
        task_definition_arn: &str,
        status: TaskStatus,
    ) -> String {
        let mut fleet = self.state();
        let task_arn = format!("arn:task/{}/{}", cluster.name, fleet.serial());
        fleet
            .tasks
            .entry(cluster.name.clone())
            .or_default()
            .push(StoredTask {
                service: service.map(str::to_string),
                summary: TaskSummary {
                    task_arn: task_arn.clone(),
                    task_definition_arn: task_definition_arn.to_string(),
                    last_status: status,
                    instance_id: instance_id.map(str::to_string),
                },
            });
        if let Some(instance_id) = instance_id {
            fleet.recount(&cluster.name, instance_id);
        }
        task_arn
    }

    pub fn stop_task(&self, cluster: &ClusterRef, task_arn: &str) {
        let mut fleet = self.state();
        let owner = fleet.tasks.get_mut(&cluster.name).and_then(|tasks| {
            let task = tasks.iter_mut().find(|t| t.summary.task_arn == task_arn)?;
            task.summary.last_status = TaskStatus::Stopped;
            task.summary.instance_id.clone()
        });
        if let Some(instance_id) = owner {
            fleet.recount(&cluster.name, &instance_id);
        }
    }

    /// The next control plane call fails with a remote error.
    pub fn fail_next_call(&self, message: &str) {
        self.state().pending_failure = Some(message.to_string());
    }

    // ── Inspection ─────────────────────────────────────────────────

    pub fn desired_capacity(&self, name: &str) -> Option<u32> {
        self.state()
            .scaling_groups
            .iter()
            .find(|g| g.name == name)
            .and_then(|g| g.desired_capacity)
    }

    pub fn instances(&self, cluster: &ClusterRef) -> Vec<ComputeInstance> {
        self.state()
            .instances
            .get(&cluster.name)
            .cloned()
            .unwrap_or_default()
    }

    /// Every `set_scaling_group_capacity` command, in order.
    pub fn capacity_changes(&self) -> Vec<(String, u32)> {
        self.state().capacity_changes.clone()
    }

    /// Every `set_instances_draining` command, in order.
    pub fn drain_commands(&self) -> Vec<Vec<InstanceId>> {
        self.state().drain_commands.clone()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls.clone()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn describe_scaling_groups(&self, name: &str) -> FleetResult<Vec<ScalingGroup>> {
        let mut fleet = self.state();
        fleet.calls.describe_scaling_groups += 1;
        fleet.take_failure()?;
        Ok(fleet
            .scaling_groups
            .iter()
            .filter(|g| g.name == name)
            .cloned()
            .collect())
    }

    async fn set_scaling_group_capacity(&self, name: &str, desired_capacity: u32) -> FleetResult<()> {
        let mut fleet = self.state();
        fleet.calls.set_capacity += 1;
        fleet.take_failure()?;

        let group = fleet
            .scaling_groups
            .iter_mut()
            .find(|g| g.name == name)
            .ok_or_else(|| FleetError::Remote(format!("scaling group {name} does not exist")))?;
        let previous = group.desired_capacity.unwrap_or(0);
        group.desired_capacity = Some(desired_capacity);

        fleet.capacity_changes.push((name.to_string(), desired_capacity));
        if desired_capacity > previous {
            fleet.launch_instances(name, desired_capacity - previous);
        }
        Ok(())
    }

    async fn list_cluster_instances(
        &self,
        cluster: &ClusterRef,
        next_token: Option<&str>,
    ) -> FleetResult<InstancePage> {
        let mut fleet = self.state();
        fleet.calls.list_instance_pages += 1;
        fleet.take_failure()?;

        let start = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| FleetError::Remote(format!("invalid continuation token {token}")))?,
            None => 0,
        };
        let all = fleet.instances.get(&cluster.name).cloned().unwrap_or_default();
        let end = (start + fleet.page_size).min(all.len());
        let instance_ids = all
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|inst| inst.instance_id.clone())
            .collect();
        let next_token = (end < all.len()).then(|| end.to_string());

        Ok(InstancePage {
            instance_ids,
            next_token,
        })
    }

    async fn describe_cluster_instances(
        &self,
        cluster: &ClusterRef,
        instance_ids: &[InstanceId],
    ) -> FleetResult<Vec<ComputeInstance>> {
        let mut fleet = self.state();
        fleet.calls.describe_instances += 1;
        fleet.take_failure()?;

        for id in instance_ids {
            let Some(remaining) = fleet.drain_countdown.get_mut(id) else {
                continue;
            };
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                fleet.drain_countdown.remove(id);
                fleet.finish_drain(&cluster.name, id);
            }
        }

        let known = fleet.instances.get(&cluster.name).cloned().unwrap_or_default();
        Ok(known
            .into_iter()
            .filter(|inst| instance_ids.contains(&inst.instance_id))
            .collect())
    }

    async fn set_instances_draining(
        &self,
        cluster: &ClusterRef,
        instance_ids: &[InstanceId],
    ) -> FleetResult<()> {
        let mut fleet = self.state();
        fleet.calls.set_draining += 1;
        fleet.take_failure()?;

        fleet.drain_commands.push(instance_ids.to_vec());
        let drain_after = fleet.drain_after_describes;
        for id in instance_ids {
            let Some(inst) = fleet.instance_mut(&cluster.name, id) else {
                continue;
            };
            inst.status = InstanceStatus::Draining;
            match drain_after {
                Some(0) => fleet.finish_drain(&cluster.name, id),
                Some(describes) => {
                    fleet.drain_countdown.insert(id.clone(), describes);
                }
                None => {}
            }
        }
        Ok(())
    }

    async fn describe_service(
        &self,
        cluster: &ClusterRef,
        service: &str,
    ) -> FleetResult<ServiceDescription> {
        let mut fleet = self.state();
        fleet.calls.describe_service += 1;
        fleet.take_failure()?;

        fleet
            .services
            .get(&(cluster.name.clone(), service.to_string()))
            .cloned()
            .ok_or_else(|| {
                FleetError::Lookup(format!("service {service} not found in cluster {}", cluster.name))
            })
    }

    async fn list_tasks(&self, cluster: &ClusterRef, filter: &TaskFilter) -> FleetResult<Vec<TaskSummary>> {
        let mut fleet = self.state();
        fleet.calls.list_tasks += 1;
        fleet.take_failure()?;

        Ok(fleet
            .tasks
            .get(&cluster.name)
            .map(|tasks| {
                tasks
                    .iter()
                    .filter(|t| match &filter.service_name {
                        Some(service) => t.service.as_deref() == Some(service.as_str()),
                        None => true,
                    })
                    .filter(|t| !filter.desired_running || t.summary.last_status != TaskStatus::Stopped)
                    .map(|t| t.summary.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn describe_target_health(&self, target_group: &str) -> FleetResult<Vec<TargetHealth>> {
        let mut fleet = self.state();
        fleet.calls.describe_target_health += 1;
        fleet.take_failure()?;

        fleet
            .target_groups
            .get(target_group)
            .cloned()
            .ok_or_else(|| FleetError::Remote(format!("target group {target_group} not found")))
    }
}
