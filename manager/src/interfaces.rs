// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collaborators the manager drives but does not implement

use async_trait::async_trait;
use vrouter_common::api::ApplianceAddresses;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::DeploymentPlan;
use vrouter_common::api::Error;
use vrouter_common::api::GuestNetwork;
use vrouter_common::api::Host;
use vrouter_common::api::HypervisorType;
use vrouter_common::api::ListResultVec;
use vrouter_common::api::LookupResult;
use vrouter_common::api::Placement;
use vrouter_common::api::RouterTemplate;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::ClusterUuid;
use vrouter_common::typed_uuid::HostUuid;
use vrouter_common::typed_uuid::NetworkUuid;
use vrouter_common::typed_uuid::PodUuid;
use vrouter_common::typed_uuid::ZoneUuid;

/// Failure reported by the compute layer
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// No host admitted by the plan has room for the appliance.
    #[error("insufficient capacity: {message}")]
    InsufficientCapacity { message: String },
    /// The operation did not complete within the compute layer's own
    /// deadline.
    #[error("timed out: {message}")]
    TimedOut { message: String },
    #[error(transparent)]
    Failed(#[from] Error),
}

impl From<ComputeError> for Error {
    fn from(e: ComputeError) -> Self {
        match e {
            ComputeError::InsufficientCapacity { message } => {
                Error::InsufficientCapacity { message }
            }
            ComputeError::TimedOut { message } => {
                Error::unavail(&format!("timed out: {}", message))
            }
            ComputeError::Failed(e) => e,
        }
    }
}

/// What the compute layer reports once an appliance is running
#[derive(Clone, Debug)]
pub struct StartedAppliance {
    pub placement: Placement,
    pub addresses: ApplianceAddresses,
    /// version string the booted image reports
    pub template_version: Option<String>,
    pub script_version: Option<String>,
}

/// Power and placement operations on appliance VMs
#[async_trait]
pub trait ComputeOrchestrator: Send + Sync {
    /// Reserve resources for a freshly created appliance record.
    async fn allocate(
        &self,
        appliance: &ApplianceInstance,
        template: &RouterTemplate,
        plan: &DeploymentPlan,
    ) -> Result<(), ComputeError>;

    /// Place (if needed) and boot the appliance.  The record's priority is
    /// part of the boot parameters.
    async fn advance_start(
        &self,
        appliance: &ApplianceInstance,
        plan: &DeploymentPlan,
    ) -> Result<StartedAppliance, ComputeError>;

    async fn advance_stop(
        &self,
        id: ApplianceUuid,
        forced: bool,
    ) -> Result<(), ComputeError>;

    /// Release every resource held by the appliance.
    async fn expunge(&self, id: ApplianceUuid) -> Result<(), ComputeError>;
}

/// Read access to networks, hosts and the hypervisor/template inventory,
/// plus network activation
#[async_trait]
pub trait PlacementCatalog: Send + Sync {
    async fn network_fetch(
        &self,
        network_id: NetworkUuid,
    ) -> LookupResult<GuestNetwork>;

    /// Every guest network that wants a redundant pair.
    async fn network_list_redundant(&self) -> ListResultVec<NetworkUuid>;

    /// Make sure the network is implemented before an appliance serving it
    /// boots.
    async fn network_start(&self, network_id: NetworkUuid)
        -> Result<(), Error>;

    async fn host_fetch(&self, host_id: HostUuid) -> LookupResult<Host>;

    async fn cluster_hypervisor(
        &self,
        cluster_id: ClusterUuid,
    ) -> LookupResult<HypervisorType>;

    async fn zone_default_hypervisor(
        &self,
        zone_id: ZoneUuid,
    ) -> LookupResult<Option<HypervisorType>>;

    /// Hypervisor types present in the zone (restricted to `pod_id` when
    /// given), in preference order.
    async fn supported_hypervisors(
        &self,
        zone_id: ZoneUuid,
        pod_id: Option<PodUuid>,
    ) -> ListResultVec<HypervisorType>;

    /// Router template for `hypervisor` in the zone, if there is one.
    async fn router_template(
        &self,
        zone_id: ZoneUuid,
        hypervisor: HypervisorType,
    ) -> LookupResult<Option<RouterTemplate>>;
}
