// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated compute orchestration

use super::FleetState;
use super::SimVm;
use crate::interfaces::ComputeError;
use crate::interfaces::ComputeOrchestrator;
use crate::interfaces::StartedAppliance;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::Mutex;
use vrouter_common::api::ApplianceAddresses;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::DeploymentPlan;
use vrouter_common::api::Error;
use vrouter_common::api::HostStatus;
use vrouter_common::api::HypervisorType;
use vrouter_common::api::Placement;
use vrouter_common::api::RouterTemplate;
use vrouter_common::typed_uuid::ApplianceUuid;

/// Failures to inject into the simulated compute layer
#[derive(Debug, Default)]
struct Faults {
    allocate_no_capacity: BTreeSet<HypervisorType>,
    start_no_capacity: BTreeSet<HypervisorType>,
    start_timeout: bool,
    stop_fails: BTreeSet<ApplianceUuid>,
}

#[derive(Debug, Default)]
struct Calls {
    allocate: BTreeMap<HypervisorType, usize>,
    start: BTreeMap<HypervisorType, usize>,
    stop: BTreeMap<ApplianceUuid, usize>,
    expunge: usize,
}

pub struct SimCompute {
    state: Arc<Mutex<FleetState>>,
    faults: Mutex<Faults>,
    calls: Mutex<Calls>,
}

impl SimCompute {
    pub(crate) fn new(state: Arc<Mutex<FleetState>>) -> SimCompute {
        SimCompute {
            state,
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Calls::default()),
        }
    }

    /// Makes allocation on `hypervisor` fail for lack of capacity.
    pub fn fail_allocate(&self, hypervisor: HypervisorType, fail: bool) {
        let faults = &mut self.faults.lock().unwrap().allocate_no_capacity;
        if fail {
            faults.insert(hypervisor);
        } else {
            faults.remove(&hypervisor);
        }
    }

    /// Makes starts on `hypervisor` fail for lack of capacity.
    pub fn fail_start(&self, hypervisor: HypervisorType, fail: bool) {
        let faults = &mut self.faults.lock().unwrap().start_no_capacity;
        if fail {
            faults.insert(hypervisor);
        } else {
            faults.remove(&hypervisor);
        }
    }

    pub fn time_out_starts(&self, timeout: bool) {
        self.faults.lock().unwrap().start_timeout = timeout;
    }

    pub fn fail_stop(&self, id: ApplianceUuid, fail: bool) {
        let faults = &mut self.faults.lock().unwrap().stop_fails;
        if fail {
            faults.insert(id);
        } else {
            faults.remove(&id);
        }
    }

    pub fn allocate_calls(&self, hypervisor: HypervisorType) -> usize {
        self.calls.lock().unwrap().allocate.get(&hypervisor).copied().unwrap_or(0)
    }

    pub fn start_calls(&self, hypervisor: HypervisorType) -> usize {
        self.calls.lock().unwrap().start.get(&hypervisor).copied().unwrap_or(0)
    }

    pub fn stop_calls(&self, id: ApplianceUuid) -> usize {
        self.calls.lock().unwrap().stop.get(&id).copied().unwrap_or(0)
    }

    pub fn expunge_calls(&self) -> usize {
        self.calls.lock().unwrap().expunge
    }
}

fn address(n: u32, octet: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, octet, (n >> 8) as u8, n as u8))
}

#[async_trait]
impl ComputeOrchestrator for SimCompute {
    async fn allocate(
        &self,
        appliance: &ApplianceInstance,
        template: &RouterTemplate,
        plan: &DeploymentPlan,
    ) -> Result<(), ComputeError> {
        let hypervisor = template.hypervisor;
        *self.calls.lock().unwrap().allocate.entry(hypervisor).or_default() += 1;
        if self.faults.lock().unwrap().allocate_no_capacity.contains(&hypervisor)
        {
            return Err(ComputeError::InsufficientCapacity {
                message: format!("no {} capacity", hypervisor),
            });
        }

        let mut state = self.state.lock().unwrap();
        let any_host = state.hosts.iter().any(|h| {
            h.host.hypervisor == hypervisor
                && h.host.zone_id == plan.zone_id
                && h.host.status == HostStatus::Up
        });
        if !any_host {
            return Err(ComputeError::InsufficientCapacity {
                message: format!("no {} hosts are up", hypervisor),
            });
        }
        state.vms.insert(
            appliance.id,
            SimVm {
                name: appliance.name.clone(),
                network_id: appliance.network_ids.first().copied(),
                host_id: None,
                running: false,
                is_redundant: appliance.is_redundant,
                priority: 0,
                bumped: false,
                configured: Vec::new(),
            },
        );
        Ok(())
    }

    async fn advance_start(
        &self,
        appliance: &ApplianceInstance,
        plan: &DeploymentPlan,
    ) -> Result<StartedAppliance, ComputeError> {
        let Some(hypervisor) = appliance.hypervisor else {
            return Err(ComputeError::Failed(Error::internal_error(
                "appliance has no hypervisor type",
            )));
        };
        *self.calls.lock().unwrap().start.entry(hypervisor).or_default() += 1;
        {
            let faults = self.faults.lock().unwrap();
            if faults.start_timeout {
                return Err(ComputeError::TimedOut {
                    message: format!("starting {}", appliance.name),
                });
            }
            if faults.start_no_capacity.contains(&hypervisor) {
                return Err(ComputeError::InsufficientCapacity {
                    message: format!("no {} capacity", hypervisor),
                });
            }
        }

        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        let candidates: Vec<_> = state
            .hosts
            .iter()
            .filter(|h| {
                h.host.hypervisor == hypervisor
                    && h.host.status == HostStatus::Up
                    && plan.admits_host(&h.host)
                    && !plan.avoid.excludes_storage_pool(&h.storage_pool_id)
            })
            .map(|h| (h.host.clone(), h.storage_pool_id, h.capacity))
            .collect();
        // Prefer the host the appliance last ran on.
        let last_host = appliance.host_id();
        let chosen = candidates
            .iter()
            .filter(|(host, _, capacity)| state.running_on(host.id) < *capacity)
            .min_by_key(|(host, _, _)| Some(host.id) != last_host)
            .cloned();
        let Some((host, storage_pool_id, _)) = chosen else {
            return Err(ComputeError::InsufficientCapacity {
                message: format!(
                    "no {} host admitted by the plan has room for {}",
                    hypervisor, appliance.name
                ),
            });
        };

        let n = state.next_address;
        state.next_address += 1;
        let template_version =
            state.templates.get(&hypervisor).map(|t| t.version.clone());
        let vm = state.vms.entry(appliance.id).or_insert_with(|| SimVm {
            name: appliance.name.clone(),
            network_id: appliance.network_ids.first().copied(),
            host_id: None,
            running: false,
            is_redundant: appliance.is_redundant,
            priority: 0,
            bumped: false,
            configured: Vec::new(),
        });
        vm.host_id = Some(host.id);
        vm.running = true;
        vm.priority = appliance.priority;
        vm.bumped = false;

        Ok(StartedAppliance {
            placement: Placement {
                zone_id: host.zone_id,
                pod_id: host.pod_id,
                cluster_id: host.cluster_id,
                host_id: host.id,
                storage_pool_id: Some(storage_pool_id),
            },
            addresses: ApplianceAddresses {
                public_ip: Some(address(n, 100)),
                private_ip: Some(address(n, 1)),
                control_ip: Some(address(n, 254)),
            },
            template_version,
            script_version: Some(String::from("sim-1")),
        })
    }

    async fn advance_stop(
        &self,
        id: ApplianceUuid,
        _forced: bool,
    ) -> Result<(), ComputeError> {
        *self.calls.lock().unwrap().stop.entry(id).or_default() += 1;
        if self.faults.lock().unwrap().stop_fails.contains(&id) {
            return Err(ComputeError::Failed(Error::unavail(&format!(
                "hypervisor refused to stop {}",
                id
            ))));
        }
        if let Some(vm) = self.state.lock().unwrap().vms.get_mut(&id) {
            vm.running = false;
            vm.bumped = false;
        }
        Ok(())
    }

    async fn expunge(&self, id: ApplianceUuid) -> Result<(), ComputeError> {
        self.calls.lock().unwrap().expunge += 1;
        self.state.lock().unwrap().vms.remove(&id);
        Ok(())
    }
}
