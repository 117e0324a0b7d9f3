use anyhow::Context;
use tracing::info;

use fleetshift_aws::AwsControlPlane;
use fleetshift_core::{ClusterRef, FleetshiftConfig};
use fleetshift_rollout::{ClusterRollout, RolloutConfig};

pub struct RolloutArgs {
    pub asg_name: String,
    pub cluster_name: String,
    pub aws_region: String,
    pub timeout: Option<u64>,
}

/// `--timeout` wins over `[rollout] timeout_secs`, which wins over the default.
pub fn rollout_config(args: &RolloutArgs, config: &FleetshiftConfig) -> RolloutConfig {
    let mut rollout = RolloutConfig::from_settings(&config.rollout());
    if let Some(timeout) = args.timeout {
        rollout.timeout_secs = timeout;
    }
    rollout
}

pub async fn roll_out(args: RolloutArgs, config: &FleetshiftConfig) -> anyhow::Result<()> {
    let rollout_config = rollout_config(&args, config);
    let cluster = ClusterRef::new(&args.cluster_name, &args.aws_region);
    let client = AwsControlPlane::from_region(&args.aws_region).await;

    let mut rollout = ClusterRollout::new(&client, &args.asg_name, cluster, rollout_config);
    let report = rollout
        .run()
        .await
        .with_context(|| format!("roll-out of cluster {} failed", args.cluster_name))?;

    info!(
        cluster = %report.cluster,
        asg = %report.scaling_group,
        capacity = report.original_capacity,
        drained = report.drained_instances.len(),
        drain_polls = report.drain_polls,
        elapsed_secs = report.elapsed.as_secs(),
        "roll-out complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(timeout: Option<u64>) -> RolloutArgs {
        RolloutArgs {
            asg_name: "asg".into(),
            cluster_name: "prod".into(),
            aws_region: "eu-west-1".into(),
            timeout,
        }
    }

    #[test]
    fn defaults_without_flag_or_file() {
        let config = rollout_config(&args(None), &FleetshiftConfig::default());
        assert_eq!(config, RolloutConfig::default());
    }

    #[test]
    fn flag_overrides_file() {
        let file = FleetshiftConfig::parse("[rollout]\ntimeout_secs = 300\nsleep_secs = 2\n").unwrap();

        let from_file = rollout_config(&args(None), &file);
        assert_eq!(from_file.timeout_secs, 300);
        assert_eq!(from_file.sleep_secs, 2);

        let from_flag = rollout_config(&args(Some(1200)), &file);
        assert_eq!(from_flag.timeout_secs, 1200);
        assert_eq!(from_flag.sleep_secs, 2);
    }

    #[test]
    fn reads_config_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleetshift.toml");
        std::fs::write(&path, "[rollout]\ntimeout_secs = 45\n").unwrap();

        let file = FleetshiftConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(rollout_config(&args(None), &file).timeout_secs, 45);
    }
}
