//! fleetshift-aws — the [`ControlPlane`](fleetshift_core::ControlPlane)
//! implementation that talks to ECS, EC2 Auto Scaling, and ELBv2.
//!
//! One [`AwsControlPlane`] serves one region. Credentials come from the
//! default provider chain.

pub mod client;

pub use client::AwsControlPlane;
