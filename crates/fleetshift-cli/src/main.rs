//! fleetshift — zero-downtime cluster roll-out and deployment verification.
//!
//! ```text
//! fleetshift roll-out --asg-name web-asg --cluster-name prod --aws-region eu-west-1
//! fleetshift check-deployment --cluster-name prod --service-name web --aws-region eu-west-1
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "fleetshift",
    about = "Roll out new cluster instances and verify deployments",
    version,
    propagate_version = true
)]
struct Cli {
    /// Optional fleetshift.toml with timing overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace every instance of a cluster without dropping capacity.
    ///
    /// Doubles the scaling group, drains the original instances, waits for
    /// them to empty, then restores the original capacity.
    RollOut {
        /// Scaling group backing the cluster.
        #[arg(long)]
        asg_name: String,
        /// Cluster name or ARN.
        #[arg(long)]
        cluster_name: String,
        #[arg(long)]
        aws_region: String,
        /// Seconds to wait for the drain before giving up [default: 900].
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Verify that a service deployment has converged.
    CheckDeployment {
        #[arg(long)]
        aws_region: String,
        #[arg(long)]
        cluster_name: String,
        #[arg(long)]
        service_name: String,
        /// Full ARN of the task definition the running tasks must use
        /// (default: the service's current one).
        #[arg(long)]
        task_definition: Option<String>,
        /// Minimum number of running tasks (default: the service's desired
        /// count).
        #[arg(long)]
        min_active_tasks: Option<u32>,
        /// Seconds each check may take [default: 600].
        #[arg(long)]
        check_timeout: Option<u64>,
        /// Consecutive healthy observations required [default: 3].
        #[arg(long)]
        loadbalancer_consecutive_successes: Option<u32>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = fleetshift_core::FleetshiftConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::RollOut {
            asg_name,
            cluster_name,
            aws_region,
            timeout,
        } => {
            let args = commands::rollout::RolloutArgs {
                asg_name,
                cluster_name,
                aws_region,
                timeout,
            };
            commands::rollout::roll_out(args, &config).await
        }
        Commands::CheckDeployment {
            aws_region,
            cluster_name,
            service_name,
            task_definition,
            min_active_tasks,
            check_timeout,
            loadbalancer_consecutive_successes,
        } => {
            let args = commands::check::CheckArgs {
                aws_region,
                cluster_name,
                service_name,
                task_definition,
                min_active_tasks,
                check_timeout,
                loadbalancer_consecutive_successes,
            };
            commands::check::check_deployment(args, &config).await
        }
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("fleetshift=info"),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
