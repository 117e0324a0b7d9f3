//! SDK-backed control plane.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ecs::error::DisplayErrorContext;
use aws_sdk_ecs::types::{
    ContainerInstance, ContainerInstanceStatus, DesiredStatus, Failure, Service, Task,
};
use aws_sdk_elasticloadbalancingv2::types::TargetHealthDescription;
use tracing::debug;

use fleetshift_core::{
    ClusterRef, ComputeInstance, ControlPlane, FleetError, FleetResult, InstanceId, InstancePage,
    InstanceStatus, ScalingGroup, SchedulingStrategy, ServiceDescription, TargetHealth,
    TargetHealthState, TaskFilter, TaskStatus, TaskSummary,
};

/// `DescribeTasks` accepts at most this many task ARNs per call.
const DESCRIBE_TASKS_BATCH: usize = 100;
/// `DescribeContainerInstances` accepts at most this many instances per call.
const DESCRIBE_INSTANCES_BATCH: usize = 100;
/// `UpdateContainerInstancesState` accepts at most this many instances per call.
const DRAIN_BATCH: usize = 10;

/// Control plane for a single AWS region.
#[derive(Debug, Clone)]
pub struct AwsControlPlane {
    region: String,
    ecs: aws_sdk_ecs::Client,
    autoscaling: aws_sdk_autoscaling::Client,
    elb: aws_sdk_elasticloadbalancingv2::Client,
}

impl AwsControlPlane {
    /// Load shared SDK config for `region` and build one client per service.
    pub async fn from_region(region: &str) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            region: region.to_string(),
            ecs: aws_sdk_ecs::Client::new(&sdk_config),
            autoscaling: aws_sdk_autoscaling::Client::new(&sdk_config),
            elb: aws_sdk_elasticloadbalancingv2::Client::new(&sdk_config),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn describe_task_batch(
        &self,
        cluster: &ClusterRef,
        task_arns: Vec<String>,
    ) -> FleetResult<Vec<TaskSummary>> {
        let output = self
            .ecs
            .describe_tasks()
            .cluster(&cluster.name)
            .set_tasks(Some(task_arns))
            .send()
            .await
            .map_err(|e| remote("DescribeTasks", e))?;
        reject_failures("DescribeTasks", output.failures())?;

        Ok(output.tasks().iter().filter_map(task_summary).collect())
    }
}

#[async_trait]
impl ControlPlane for AwsControlPlane {
    async fn describe_scaling_groups(&self, name: &str) -> FleetResult<Vec<ScalingGroup>> {
        let output = self
            .autoscaling
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .map_err(|e| remote("DescribeAutoScalingGroups", e))?;

        Ok(output
            .auto_scaling_groups()
            .iter()
            .map(|group| ScalingGroup {
                name: group.auto_scaling_group_name().unwrap_or(name).to_string(),
                desired_capacity: group.desired_capacity().and_then(count),
            })
            .collect())
    }

    async fn set_scaling_group_capacity(&self, name: &str, desired_capacity: u32) -> FleetResult<()> {
        let capacity = i32::try_from(desired_capacity).map_err(|_| {
            FleetError::Remote(format!("desired capacity {desired_capacity} is out of range"))
        })?;

        self.autoscaling
            .set_desired_capacity()
            .auto_scaling_group_name(name)
            .desired_capacity(capacity)
            .honor_cooldown(false)
            .send()
            .await
            .map_err(|e| remote("SetDesiredCapacity", e))?;
        Ok(())
    }

    async fn list_cluster_instances(
        &self,
        cluster: &ClusterRef,
        next_token: Option<&str>,
    ) -> FleetResult<InstancePage> {
        let output = self
            .ecs
            .list_container_instances()
            .cluster(&cluster.name)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| remote("ListContainerInstances", e))?;

        Ok(InstancePage {
            instance_ids: output.container_instance_arns().to_vec(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn describe_cluster_instances(
        &self,
        cluster: &ClusterRef,
        instance_ids: &[InstanceId],
    ) -> FleetResult<Vec<ComputeInstance>> {
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut instances = Vec::with_capacity(instance_ids.len());
        for batch in batches(instance_ids, DESCRIBE_INSTANCES_BATCH) {
            let output = self
                .ecs
                .describe_container_instances()
                .cluster(&cluster.name)
                .set_container_instances(Some(batch))
                .send()
                .await
                .map_err(|e| remote("DescribeContainerInstances", e))?;

            // Instances that vanished are reported as failures. They are simply
            // absent from the result rather than fatal.
            for failure in output.failures() {
                debug!(
                    %cluster,
                    arn = failure.arn().unwrap_or_default(),
                    reason = failure.reason().unwrap_or_default(),
                    "instance not described"
                );
            }

            instances.extend(output.container_instances().iter().filter_map(compute_instance));
        }
        Ok(instances)
    }

    async fn set_instances_draining(
        &self,
        cluster: &ClusterRef,
        instance_ids: &[InstanceId],
    ) -> FleetResult<()> {
        for batch in batches(instance_ids, DRAIN_BATCH) {
            let output = self
                .ecs
                .update_container_instances_state()
                .cluster(&cluster.name)
                .set_container_instances(Some(batch))
                .status(ContainerInstanceStatus::Draining)
                .send()
                .await
                .map_err(|e| remote("UpdateContainerInstancesState", e))?;
            reject_failures("UpdateContainerInstancesState", output.failures())?;
        }
        Ok(())
    }

    async fn describe_service(
        &self,
        cluster: &ClusterRef,
        service: &str,
    ) -> FleetResult<ServiceDescription> {
        let output = self
            .ecs
            .describe_services()
            .cluster(&cluster.name)
            .services(service)
            .send()
            .await
            .map_err(|e| remote("DescribeServices", e))?;

        output
            .services()
            .first()
            .map(service_description)
            .ok_or_else(|| {
                FleetError::Lookup(format!("service {service} not found in cluster {cluster}"))
            })
    }

    async fn list_tasks(
        &self,
        cluster: &ClusterRef,
        filter: &TaskFilter,
    ) -> FleetResult<Vec<TaskSummary>> {
        let mut task_arns = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut request = self
                .ecs
                .list_tasks()
                .cluster(&cluster.name)
                .set_service_name(filter.service_name.clone())
                .set_next_token(next_token.take());
            if filter.desired_running {
                request = request.desired_status(DesiredStatus::Running);
            }

            let output = request.send().await.map_err(|e| remote("ListTasks", e))?;
            task_arns.extend_from_slice(output.task_arns());

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        let mut tasks = Vec::with_capacity(task_arns.len());
        for batch in batches(&task_arns, DESCRIBE_TASKS_BATCH) {
            tasks.extend(self.describe_task_batch(cluster, batch).await?);
        }
        debug!(%cluster, listed = task_arns.len(), described = tasks.len(), "listed tasks");
        Ok(tasks)
    }

    async fn describe_target_health(&self, target_group: &str) -> FleetResult<Vec<TargetHealth>> {
        let output = self
            .elb
            .describe_target_health()
            .target_group_arn(target_group)
            .send()
            .await
            .map_err(|e| remote("DescribeTargetHealth", e))?;

        Ok(output
            .target_health_descriptions()
            .iter()
            .map(target_health)
            .collect())
    }
}

/// Split `ids` into owned request-sized batches, preserving order.
fn batches(ids: &[String], size: usize) -> impl Iterator<Item = Vec<String>> + '_ {
    ids.chunks(size.max(1)).map(<[String]>::to_vec)
}

fn remote<E>(operation: &str, err: E) -> FleetError
where
    E: std::error::Error + Send + Sync + 'static,
{
    FleetError::Remote(format!("{operation} failed: {}", DisplayErrorContext(err)))
}

fn reject_failures(operation: &str, failures: &[Failure]) -> FleetResult<()> {
    match failures.first() {
        None => Ok(()),
        Some(failure) => Err(FleetError::Remote(format!(
            "{operation} reported {} failure(s), first: {} ({})",
            failures.len(),
            failure.arn().unwrap_or("unknown arn"),
            failure.reason().unwrap_or("no reason given"),
        ))),
    }
}

/// Counts from the API are signed; negative values never occur in practice.
fn count(value: i32) -> Option<u32> {
    u32::try_from(value).ok()
}

fn compute_instance(instance: &ContainerInstance) -> Option<ComputeInstance> {
    Some(ComputeInstance {
        instance_id: instance.container_instance_arn()?.to_string(),
        status: InstanceStatus::from_api(instance.status().unwrap_or_default()),
        pending_task_count: count(instance.pending_tasks_count()).unwrap_or(0),
        running_task_count: count(instance.running_tasks_count()).unwrap_or(0),
    })
}

fn task_summary(task: &Task) -> Option<TaskSummary> {
    Some(TaskSummary {
        task_arn: task.task_arn()?.to_string(),
        task_definition_arn: task.task_definition_arn().unwrap_or_default().to_string(),
        last_status: TaskStatus::from_api(task.last_status().unwrap_or_default()),
        instance_id: task.container_instance_arn().map(str::to_string),
    })
}

fn service_description(service: &Service) -> ServiceDescription {
    ServiceDescription {
        service_arn: service.service_arn().unwrap_or_default().to_string(),
        task_definition_arn: service.task_definition().unwrap_or_default().to_string(),
        desired_count: count(service.desired_count()).unwrap_or(0),
        scheduling_strategy: service
            .scheduling_strategy()
            .map(|strategy| SchedulingStrategy::from_api(strategy.as_str()))
            .unwrap_or_default(),
        target_groups: service
            .load_balancers()
            .iter()
            .filter_map(|lb| lb.target_group_arn().map(str::to_string))
            .collect(),
    }
}

fn target_health(description: &TargetHealthDescription) -> TargetHealth {
    TargetHealth {
        target_id: description
            .target()
            .and_then(|target| target.id())
            .unwrap_or_default()
            .to_string(),
        state: description
            .target_health()
            .and_then(|health| health.state())
            .map(|state| TargetHealthState::from_api(state.as_str()))
            .unwrap_or(TargetHealthState::Unknown),
    }
}
