//! The cluster-manager driver contract.
//!
//! The wire codec is an external collaborator. Deployments implement
//! [`Driver`] over their transport and feed [`DriverEvent`]s into the
//! scheduler worker's channel; the worker calls back through the trait.

use std::net::IpAddr;

use async_trait::async_trait;
use osprey_id::{AgentId, AppId, FrameworkId, OfferId, TaskId, VersionId};

use crate::error::DriverError;
use crate::offer::{Offer, Resources};
use crate::state::TaskStatus;

/// Everything the driver needs to launch one task.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub task_id: TaskId,
    pub app_id: AppId,
    pub slot_index: u32,
    pub version_id: VersionId,
    pub image: String,
    pub resources: Resources,
    pub ports: Vec<u16>,
    pub agent_id: AgentId,
    pub hostname: String,
}

/// A task status callback from the cluster manager.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub ip: Option<IpAddr>,
    pub healthy: Option<bool>,
    pub message: Option<String>,
}

/// Callbacks arriving from the cluster manager.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// Fresh resource offers.
    Offers(Vec<Offer>),
    /// A previously sent offer is no longer valid.
    OfferRescinded(OfferId),
    /// A task changed status.
    StatusUpdate(StatusUpdate),
    /// The master connection is gone.
    Disconnected,
    /// Registration (or re-registration after failover) completed.
    Reregistered(FrameworkId),
}

/// Outbound calls to the cluster manager.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Launches tasks against a (portion of an) offer.
    async fn launch_tasks(
        &self,
        offer_id: &OfferId,
        tasks: &[LaunchSpec],
    ) -> Result<(), DriverError>;

    /// Kills one task.
    async fn kill_task(&self, task_id: &TaskId) -> Result<(), DriverError>;

    /// Declines an offer so it returns after `refuse_seconds`.
    async fn decline_offer(&self, offer_id: &OfferId, refuse_seconds: u64)
        -> Result<(), DriverError>;

    /// Asks the master to resend filtered offers; called when new demand
    /// appears.
    async fn revive_offers(&self) -> Result<(), DriverError>;

    /// Re-establishes the master connection, returning the framework ID the
    /// master acknowledged. The worker calls this with backoff after a
    /// disconnect.
    async fn reconnect(&self) -> Result<FrameworkId, DriverError>;
}
