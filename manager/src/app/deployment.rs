// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Finding or creating the appliances that serve a guest network

use crate::context::OpContext;
use crate::interfaces::ComputeError;
use std::collections::BTreeMap;
use vrouter_common::api::ApplianceCreate;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::ApplianceState;
use vrouter_common::api::DeploymentPlan;
use vrouter_common::api::Error;
use vrouter_common::api::GuestNetwork;
use vrouter_common::api::HypervisorType;
use vrouter_common::api::RouterTemplate;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::ClusterUuid;
use vrouter_common::typed_uuid::HostUuid;
use vrouter_common::typed_uuid::NetworkUuid;
use vrouter_common::typed_uuid::OwnerUuid;
use vrouter_common::typed_uuid::PodUuid;

/// How many appliances a guest network wants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedundancyLevel {
    Single,
    Redundant,
}

impl RedundancyLevel {
    pub fn instance_count(&self) -> usize {
        match self {
            RedundancyLevel::Single => 1,
            RedundancyLevel::Redundant => 2,
        }
    }

    pub fn is_redundant(&self) -> bool {
        *self == RedundancyLevel::Redundant
    }
}

/// Optional narrowing of where new appliances may be placed
#[derive(Clone, Debug, Default)]
pub struct PlacementHints {
    pub pod_id: Option<PodUuid>,
    pub cluster_id: Option<ClusterUuid>,
    pub host_id: Option<HostUuid>,
}

impl super::RouterManager {
    /// Makes sure `network_id` is served by as many appliances as `level`
    /// asks for, creating the missing ones and starting any that are not
    /// running.
    ///
    /// The network's allocation token is held for the whole decision,
    /// including the starts, so concurrent callers for the same network see
    /// each other's appliances.  Calling this again once the network is
    /// served changes nothing.
    pub async fn appliances_ensure(
        &self,
        opctx: &OpContext,
        network_id: NetworkUuid,
        owner_id: OwnerUuid,
        level: RedundancyLevel,
        hints: PlacementHints,
    ) -> Result<Vec<ApplianceInstance>, Error> {
        let opctx = opctx.child(BTreeMap::from([(
            String::from("network_id"),
            network_id.to_string(),
        )]));
        let _token = self.network_locks.acquire(network_id).await?;

        let network = self.catalog.network_fetch(network_id).await?;
        if level.is_redundant() && !network.is_redundant {
            return Err(Error::invalid_request(&format!(
                "network {} does not support redundant routers",
                network_id
            )));
        }
        let plan = DeploymentPlan {
            zone_id: network.zone_id,
            pod_id: hints.pod_id,
            cluster_id: hints.cluster_id,
            host_id: hints.host_id,
            avoid: Default::default(),
        };

        let mut appliances =
            self.datastore.appliance_list_by_network(&opctx, network_id).await?;
        let wanted = level.instance_count();
        if appliances.len() < wanted {
            if level.is_redundant() && !appliances.is_empty() {
                self.reset_priorities_if_all_stopped(&opctx, &mut appliances)
                    .await?;
            }
            let candidates =
                self.candidate_templates(&opctx, &network, &plan).await?;
            while appliances.len() < wanted {
                let created = self
                    .deploy_appliance(
                        &opctx,
                        &network,
                        owner_id,
                        level.is_redundant(),
                        &plan,
                        &candidates,
                    )
                    .await?;
                appliances.push(created);
            }
        } else if appliances.len() > wanted {
            debug!(opctx.log, "network has more appliances than needed";
                "found" => appliances.len(),
                "wanted" => wanted,
            );
        }

        self.start_appliances(&opctx, appliances, &plan).await
    }

    /// When every existing member of a pair is stopped the old priorities
    /// mean nothing; forget them so the next start assigns fresh ones.
    async fn reset_priorities_if_all_stopped(
        &self,
        opctx: &OpContext,
        appliances: &mut [ApplianceInstance],
    ) -> Result<(), Error> {
        let all_stopped = appliances
            .iter()
            .all(|a| a.is_redundant && a.state == ApplianceState::Stopped);
        if !all_stopped {
            return Ok(());
        }
        for a in appliances.iter_mut() {
            a.priority = 0;
            a.priority_bumped = false;
            self.datastore
                .appliance_update_priority(opctx, a.id, 0, false)
                .await?;
        }
        debug!(opctx.log, "reset priorities of stopped redundant routers";
            "count" => appliances.len(),
        );
        Ok(())
    }

    /// Hypervisor types a new appliance may use, in preference order, each
    /// with the zone's router template for it.  Types without a template
    /// are skipped.
    async fn candidate_templates(
        &self,
        opctx: &OpContext,
        network: &GuestNetwork,
        plan: &DeploymentPlan,
    ) -> Result<Vec<(HypervisorType, RouterTemplate)>, Error> {
        let hypervisors = if let Some(cluster_id) = plan.cluster_id {
            vec![self.catalog.cluster_hypervisor(cluster_id).await?]
        } else if let Some(default) =
            self.catalog.zone_default_hypervisor(network.zone_id).await?
        {
            vec![default]
        } else {
            self.catalog
                .supported_hypervisors(network.zone_id, plan.pod_id)
                .await?
        };

        let mut candidates = Vec::new();
        for hypervisor in hypervisors {
            match self.catalog.router_template(network.zone_id, hypervisor).await? {
                Some(template) => candidates.push((hypervisor, template)),
                None => {
                    debug!(opctx.log, "no router template, skipping hypervisor";
                        "hypervisor" => %hypervisor,
                    );
                }
            }
        }
        if candidates.is_empty() {
            return Err(Error::insufficient_capacity(&format!(
                "no hypervisor in zone {} can host a router",
                network.zone_id
            )));
        }
        Ok(candidates)
    }

    /// Creates, allocates and starts one appliance, moving on to the next
    /// hypervisor type when one runs out of room.
    async fn deploy_appliance(
        &self,
        opctx: &OpContext,
        network: &GuestNetwork,
        owner_id: OwnerUuid,
        is_redundant: bool,
        plan: &DeploymentPlan,
        candidates: &[(HypervisorType, RouterTemplate)],
    ) -> Result<ApplianceInstance, Error> {
        let allocation_retries = self.config.deployment.allocation_retries;
        let start_retries = self.config.deployment.start_retries;
        let mut allocate_attempts = 0;
        let mut start_attempts = 0;

        for (i, (hypervisor, template)) in candidates.iter().enumerate() {
            let more_candidates = i + 1 < candidates.len();
            let id = ApplianceUuid::new_v4();
            let record = ApplianceInstance::new(
                id,
                ApplianceCreate {
                    name: router_name(id),
                    owner_id,
                    zone_id: network.zone_id,
                    network_id: network.id,
                    hypervisor: *hypervisor,
                    is_redundant,
                    template_version: Some(template.version.clone()),
                },
            );
            debug!(opctx.log, "allocating router";
                "instance_id" => %id,
                "hypervisor" => %hypervisor,
                "template" => &template.name,
            );
            let record = self.datastore.appliance_create(opctx, record).await?;

            allocate_attempts += 1;
            match self.compute.allocate(&record, template, plan).await {
                Ok(()) => (),
                Err(ComputeError::InsufficientCapacity { message })
                    if allocate_attempts < allocation_retries
                        && more_candidates =>
                {
                    debug!(opctx.log, "failed to allocate router, trying the \
                                       next hypervisor";
                        "hypervisor" => %hypervisor,
                        "message" => message,
                    );
                    self.discard_record(opctx, record).await?;
                    continue;
                }
                Err(error) => {
                    self.discard_record(opctx, record).await?;
                    return Err(error.into());
                }
            }

            start_attempts += 1;
            match self.start_appliance(opctx, record, plan).await {
                Ok(started) => return Ok(started),
                Err(Error::InsufficientCapacity { message })
                    if start_attempts < start_retries && more_candidates =>
                {
                    debug!(opctx.log, "failed to start router, destroying it \
                                       and trying the next hypervisor";
                        "instance_id" => %id,
                        "hypervisor" => %hypervisor,
                        "message" => message,
                    );
                    self.appliance_destroy(opctx, id).await?;
                }
                Err(error) => return Err(error),
            }
        }

        Err(Error::insufficient_capacity(&format!(
            "unable to deploy a router for network {} on any hypervisor",
            network.id
        )))
    }

    /// Retires a record whose allocation never completed.
    async fn discard_record(
        &self,
        opctx: &OpContext,
        mut record: ApplianceInstance,
    ) -> Result<(), Error> {
        record.set_state(ApplianceState::Destroyed);
        self.datastore.appliance_update(opctx, &record).await
    }

    /// Starts every appliance that is not running and returns the running
    /// ones.  Appliances whose host is known but not up are left alone and
    /// left out.
    async fn start_appliances(
        &self,
        opctx: &OpContext,
        appliances: Vec<ApplianceInstance>,
        plan: &DeploymentPlan,
    ) -> Result<Vec<ApplianceInstance>, Error> {
        let mut result = Vec::with_capacity(appliances.len());
        for appliance in appliances {
            if appliance.is_running() {
                result.push(appliance);
                continue;
            }
            if let Some(host_id) = appliance.host_id() {
                let host = self.catalog.host_fetch(host_id).await?;
                if !host.is_up() {
                    debug!(opctx.log, "skipping router on host that is not up";
                        "instance_id" => %appliance.id,
                        "host_id" => %host_id,
                        "host_status" => %host.status,
                    );
                    continue;
                }
            }
            // Re-read so priorities assigned to peers started earlier in
            // this pass are visible.
            let fresh =
                self.datastore.appliance_fetch(opctx, appliance.id).await?;
            result.push(self.start_appliance(opctx, fresh, plan).await?);
        }
        Ok(result)
    }
}

fn router_name(id: ApplianceUuid) -> String {
    let simple = id.as_untyped_uuid().simple().to_string();
    format!("r-{}", &simple[..8])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_redundancy_level() {
        assert_eq!(RedundancyLevel::Single.instance_count(), 1);
        assert_eq!(RedundancyLevel::Redundant.instance_count(), 2);
        assert!(!RedundancyLevel::Single.is_redundant());
    }

    #[test]
    fn test_router_name() {
        let id = ApplianceUuid::new_v4();
        let name = router_name(id);
        assert!(name.starts_with("r-"));
        assert_eq!(name.len(), 10);
    }
}
