//! The narrow query/command surface fleetshift needs from the remote
//! control plane, plus the lookups built directly on top of it.
//!
//! Each method is one logical query or command. Implementations may split it
//! into several wire requests (pagination inside `list_tasks`, per-request id
//! limits) but never retry. Callers that need call-level retry wrap the
//! implementation.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{FleetError, FleetResult};
use crate::types::*;

/// Cluster, scaling-group, service, and load-balancer operations against an
/// eventually-consistent remote control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// All scaling groups matching `name`. Zero or several matches are
    /// returned as-is; [`scaling_group_capacity`] enforces exactly one.
    async fn describe_scaling_groups(&self, name: &str) -> FleetResult<Vec<ScalingGroup>>;

    async fn set_scaling_group_capacity(&self, name: &str, desired_capacity: u32) -> FleetResult<()>;

    /// One page of the cluster's instance ids.
    async fn list_cluster_instances(
        &self,
        cluster: &ClusterRef,
        next_token: Option<&str>,
    ) -> FleetResult<InstancePage>;

    async fn describe_cluster_instances(
        &self,
        cluster: &ClusterRef,
        instance_ids: &[InstanceId],
    ) -> FleetResult<Vec<ComputeInstance>>;

    /// Mark every instance in `instance_ids` as DRAINING. One logical
    /// command, however the implementation splits it on the wire.
    async fn set_instances_draining(
        &self,
        cluster: &ClusterRef,
        instance_ids: &[InstanceId],
    ) -> FleetResult<()>;

    async fn describe_service(
        &self,
        cluster: &ClusterRef,
        service: &str,
    ) -> FleetResult<ServiceDescription>;

    async fn list_tasks(
        &self,
        cluster: &ClusterRef,
        filter: &TaskFilter,
    ) -> FleetResult<Vec<TaskSummary>>;

    async fn describe_target_health(&self, target_group: &str) -> FleetResult<Vec<TargetHealth>>;
}

/// Desired capacity of the scaling group named `name`.
///
/// Fails with [`FleetError::Lookup`] unless the name resolves to exactly one
/// group that reports a desired capacity.
pub async fn scaling_group_capacity<C: ControlPlane>(client: &C, name: &str) -> FleetResult<u32> {
    info!(asg = %name, "looking up size of scaling group");

    let groups = client.describe_scaling_groups(name).await?;
    if groups.len() != 1 {
        return Err(FleetError::Lookup(format!(
            "expected to find one scaling group named {name} but found {}",
            groups.len()
        )));
    }

    groups[0].desired_capacity.ok_or_else(|| {
        FleetError::Lookup(format!("could not find a desired capacity for scaling group {name}"))
    })
}

/// Every instance id in the cluster, following continuation tokens until the
/// listing is exhausted.
pub async fn list_all_cluster_instances<C: ControlPlane>(
    client: &C,
    cluster: &ClusterRef,
) -> FleetResult<Vec<InstanceId>> {
    info!(%cluster, "looking up cluster instances");

    let mut ids = Vec::new();
    let mut next_token: Option<String> = None;
    loop {
        let page = client
            .list_cluster_instances(cluster, next_token.as_deref())
            .await?;
        ids.extend(page.instance_ids);

        match page.next_token {
            Some(token) if !token.is_empty() => {
                debug!(%cluster, fetched = ids.len(), "following instance listing continuation token");
                next_token = Some(token);
            }
            _ => return Ok(ids),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryControlPlane;

    fn cluster() -> ClusterRef {
        ClusterRef::new("prod", "us-east-1")
    }

    #[tokio::test]
    async fn capacity_of_single_group() {
        let plane = InMemoryControlPlane::new();
        plane.add_scaling_group("asg", Some(3));
        assert_eq!(scaling_group_capacity(&plane, "asg").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn missing_group_is_lookup_error() {
        let plane = InMemoryControlPlane::new();
        let err = scaling_group_capacity(&plane, "asg").await.unwrap_err();
        assert!(matches!(err, FleetError::Lookup(_)));
        assert!(err.to_string().contains("found 0"));
    }

    #[tokio::test]
    async fn ambiguous_group_is_lookup_error() {
        let plane = InMemoryControlPlane::new();
        plane.add_scaling_group("asg", Some(3));
        plane.add_scaling_group("asg", Some(5));
        let err = scaling_group_capacity(&plane, "asg").await.unwrap_err();
        assert!(err.to_string().contains("found 2"));
    }

    #[tokio::test]
    async fn undefined_capacity_is_lookup_error() {
        let plane = InMemoryControlPlane::new();
        plane.add_scaling_group("asg", None);
        let err = scaling_group_capacity(&plane, "asg").await.unwrap_err();
        assert!(matches!(err, FleetError::Lookup(_)));
    }

    #[tokio::test]
    async fn listing_follows_every_page() {
        let plane = InMemoryControlPlane::new().with_page_size(2);
        for i in 0..5 {
            plane.register_instance(&cluster(), ComputeInstance::active(format!("ci-{i}")));
        }

        let ids = list_all_cluster_instances(&plane, &cluster()).await.unwrap();
        assert_eq!(ids, vec!["ci-0", "ci-1", "ci-2", "ci-3", "ci-4"]);
        assert_eq!(plane.calls().list_instance_pages, 3);
    }

    #[tokio::test]
    async fn listing_empty_cluster() {
        let plane = InMemoryControlPlane::new();
        let ids = list_all_cluster_instances(&plane, &cluster()).await.unwrap();
        assert!(ids.is_empty());
    }
}
