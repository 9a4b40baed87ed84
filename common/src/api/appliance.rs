// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Appliance (virtual router) records

use super::Placement;
use crate::typed_uuid::ApplianceUuid;
use crate::typed_uuid::HostUuid;
use crate::typed_uuid::NetworkUuid;
use crate::typed_uuid::OwnerUuid;
use crate::typed_uuid::ZoneUuid;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Lifecycle state of an appliance instance
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ApplianceState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Destroyed,
}

impl ApplianceState {
    pub fn label(&self) -> &'static str {
        match self {
            ApplianceState::Starting => "starting",
            ApplianceState::Running => "running",
            ApplianceState::Stopping => "stopping",
            ApplianceState::Stopped => "stopped",
            ApplianceState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ApplianceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Role an appliance plays within its redundant pair, as last reported by
/// the appliance itself
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RedundantState {
    #[default]
    Unknown,
    Master,
    Backup,
}

impl RedundantState {
    pub fn label(&self) -> &'static str {
        match self {
            RedundantState::Unknown => "unknown",
            RedundantState::Master => "master",
            RedundantState::Backup => "backup",
        }
    }
}

impl fmt::Display for RedundantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HypervisorType {
    XenServer,
    Kvm,
    Vmware,
    Hyperv,
    Lxc,
    Simulator,
}

impl HypervisorType {
    pub fn label(&self) -> &'static str {
        match self {
            HypervisorType::XenServer => "xen_server",
            HypervisorType::Kvm => "kvm",
            HypervisorType::Vmware => "vmware",
            HypervisorType::Hyperv => "hyperv",
            HypervisorType::Lxc => "lxc",
            HypervisorType::Simulator => "simulator",
        }
    }
}

impl fmt::Display for HypervisorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Addresses an appliance is reachable on
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ApplianceAddresses {
    pub public_ip: Option<IpAddr>,
    /// Address the host agent uses to reach the appliance.  Status checks
    /// are impossible without it.
    pub private_ip: Option<IpAddr>,
    pub control_ip: Option<IpAddr>,
}

/// One deployed router appliance
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ApplianceInstance {
    pub id: ApplianceUuid,
    pub name: String,
    pub owner_id: OwnerUuid,
    pub zone_id: ZoneUuid,
    pub network_ids: Vec<NetworkUuid>,
    pub hypervisor: Option<HypervisorType>,
    /// `None` until the compute layer has placed the appliance.
    pub placement: Option<Placement>,
    pub state: ApplianceState,
    pub is_redundant: bool,
    pub redundant_state: RedundantState,
    /// `0` means "not assigned yet".
    pub priority: u32,
    pub priority_bumped: bool,
    /// Set when the appliance lost contact while it was supposed to be
    /// running; the next host reconnect stops it.
    pub stop_pending: bool,
    pub template_version: Option<String>,
    pub script_version: Option<String>,
    pub addresses: ApplianceAddresses,
}

/// Parameters for creating a new appliance record
#[derive(Clone, Debug)]
pub struct ApplianceCreate {
    pub name: String,
    pub owner_id: OwnerUuid,
    pub zone_id: ZoneUuid,
    pub network_id: NetworkUuid,
    pub hypervisor: HypervisorType,
    pub is_redundant: bool,
    pub template_version: Option<String>,
}

impl ApplianceInstance {
    /// Builds the record persisted before allocation begins: no placement,
    /// `Stopped`, priority unassigned.
    pub fn new(id: ApplianceUuid, params: ApplianceCreate) -> Self {
        ApplianceInstance {
            id,
            name: params.name,
            owner_id: params.owner_id,
            zone_id: params.zone_id,
            network_ids: vec![params.network_id],
            hypervisor: Some(params.hypervisor),
            placement: None,
            state: ApplianceState::Stopped,
            is_redundant: params.is_redundant,
            redundant_state: RedundantState::Unknown,
            priority: 0,
            priority_bumped: false,
            stop_pending: false,
            template_version: params.template_version,
            script_version: None,
            addresses: ApplianceAddresses::default(),
        }
    }

    pub fn host_id(&self) -> Option<HostUuid> {
        self.placement.as_ref().map(|p| p.host_id)
    }

    pub fn is_running(&self) -> bool {
        self.state == ApplianceState::Running
    }

    /// Priority as compared against peers: the stored priority, raised by
    /// `delta` when the appliance has been bumped.
    pub fn effective_priority(&self, delta: u32) -> u32 {
        if self.priority_bumped {
            self.priority + delta
        } else {
            self.priority
        }
    }

    /// Moves the appliance to `state`.  Leaving `Running` forgets the
    /// appliance's redundant role.
    pub fn set_state(&mut self, state: ApplianceState) {
        self.state = state;
        if state != ApplianceState::Running {
            self.redundant_state = RedundantState::Unknown;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::typed_uuid::*;

    fn appliance() -> ApplianceInstance {
        ApplianceInstance::new(
            ApplianceUuid::new_v4(),
            ApplianceCreate {
                name: String::from("r-1"),
                owner_id: OwnerUuid::new_v4(),
                zone_id: ZoneUuid::new_v4(),
                network_id: NetworkUuid::new_v4(),
                hypervisor: HypervisorType::Kvm,
                is_redundant: true,
                template_version: Some(String::from("4.2.0")),
            },
        )
    }

    #[test]
    fn test_new_record_is_unplaced() {
        let a = appliance();
        assert_eq!(a.state, ApplianceState::Stopped);
        assert_eq!(a.priority, 0);
        assert!(!a.priority_bumped);
        assert_eq!(a.host_id(), None);
        assert_eq!(a.network_ids.len(), 1);
    }

    #[test]
    fn test_effective_priority() {
        let mut a = appliance();
        a.priority = 99;
        assert_eq!(a.effective_priority(2), 99);
        a.priority_bumped = true;
        assert_eq!(a.effective_priority(2), 101);
    }

    #[test]
    fn test_leaving_running_resets_role() {
        let mut a = appliance();
        a.set_state(ApplianceState::Running);
        a.redundant_state = RedundantState::Master;
        a.set_state(ApplianceState::Running);
        assert_eq!(a.redundant_state, RedundantState::Master);
        a.set_state(ApplianceState::Stopping);
        assert_eq!(a.redundant_state, RedundantState::Unknown);
    }
}
