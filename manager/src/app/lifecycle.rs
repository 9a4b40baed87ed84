// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Appliance start, stop, reboot and destroy

use crate::context::OpContext;
use crate::interfaces::ComputeError;
use std::collections::BTreeMap;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::ApplianceState;
use vrouter_common::api::DeploymentPlan;
use vrouter_common::api::Error;
use vrouter_common::api::ExcludeList;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::ClusterUuid;
use vrouter_common::typed_uuid::HostUuid;
use vrouter_common::typed_uuid::OwnerUuid;
use vrouter_common::typed_uuid::PodUuid;
use vrouter_common::typed_uuid::ZoneUuid;

/// Which appliances a template upgrade applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeScope {
    Instance(ApplianceUuid),
    Zone(ZoneUuid),
    Pod(PodUuid),
    Cluster(ClusterUuid),
    Owner(OwnerUuid),
}

/// Upgrade request as an operator expresses it: exactly one of the fields
/// must be set.
#[derive(Clone, Debug, Default)]
pub struct UpgradeParams {
    pub instance_id: Option<ApplianceUuid>,
    pub zone_id: Option<ZoneUuid>,
    pub pod_id: Option<PodUuid>,
    pub cluster_id: Option<ClusterUuid>,
    pub owner_id: Option<OwnerUuid>,
}

impl TryFrom<UpgradeParams> for UpgradeScope {
    type Error = Error;

    fn try_from(params: UpgradeParams) -> Result<Self, Self::Error> {
        let scopes: Vec<UpgradeScope> = [
            params.instance_id.map(UpgradeScope::Instance),
            params.zone_id.map(UpgradeScope::Zone),
            params.pod_id.map(UpgradeScope::Pod),
            params.cluster_id.map(UpgradeScope::Cluster),
            params.owner_id.map(UpgradeScope::Owner),
        ]
        .into_iter()
        .flatten()
        .collect();
        match scopes.as_slice() {
            [scope] => Ok(*scope),
            [] => Err(Error::invalid_request(
                "one of instance, zone, pod, cluster or owner is required",
            )),
            _ => Err(Error::invalid_request(
                "only one of instance, zone, pod, cluster or owner may be given",
            )),
        }
    }
}

impl UpgradeScope {
    fn matches(&self, appliance: &ApplianceInstance) -> bool {
        let placement = appliance.placement.as_ref();
        match self {
            UpgradeScope::Instance(id) => appliance.id == *id,
            UpgradeScope::Zone(id) => appliance.zone_id == *id,
            UpgradeScope::Pod(id) => placement.map_or(false, |p| p.pod_id == *id),
            UpgradeScope::Cluster(id) => {
                placement.map_or(false, |p| p.cluster_id == *id)
            }
            UpgradeScope::Owner(id) => appliance.owner_id == *id,
        }
    }
}

/// Outcome of upgrading one appliance
#[derive(Debug)]
pub struct UpgradeResult {
    pub instance_id: ApplianceUuid,
    pub result: Result<(), Error>,
}

impl super::RouterManager {
    /// Starts the appliance with the default plan for its zone.
    pub async fn appliance_start(
        &self,
        opctx: &OpContext,
        id: ApplianceUuid,
    ) -> Result<ApplianceInstance, Error> {
        let appliance = self.datastore.appliance_fetch(opctx, id).await?;
        let plan = DeploymentPlan::for_zone(appliance.zone_id);
        self.start_appliance(opctx, appliance, &plan).await
    }

    /// Starts `appliance`, keeping a redundant appliance physically apart
    /// from its running peer when there is one.
    pub(crate) async fn start_appliance(
        &self,
        opctx: &OpContext,
        appliance: ApplianceInstance,
        plan: &DeploymentPlan,
    ) -> Result<ApplianceInstance, Error> {
        if appliance.is_running() {
            return Ok(appliance);
        }
        if !appliance.is_redundant {
            return self.start_with_plan(opctx, appliance, plan).await;
        }

        let network_id = match appliance.network_ids.as_slice() {
            [network_id] => *network_id,
            _ => {
                return Err(Error::unavail(&format!(
                    "redundant appliance {} must serve exactly one guest \
                     network",
                    appliance.id
                )))
            }
        };

        let running_peers: Vec<ApplianceInstance> = self
            .datastore
            .appliance_list_by_network(opctx, network_id)
            .await?
            .into_iter()
            .filter(|a| a.id != appliance.id && a.is_redundant && a.is_running())
            .collect();
        let peer_placement = match running_peers.as_slice() {
            [] => return self.start_with_plan(opctx, appliance, plan).await,
            [peer] => peer.placement.clone(),
            _ => {
                return Err(Error::unavail(&format!(
                    "network {} already has two running redundant routers",
                    network_id
                )))
            }
        };
        let Some(peer_placement) = peer_placement else {
            return self.start_with_plan(opctx, appliance, plan).await;
        };

        let mut appliance = appliance;
        for avoid in ExcludeList::separation_ladder(&peer_placement) {
            let attempt = plan.with_avoid(avoid);
            match self.start_with_plan(opctx, appliance.clone(), &attempt).await {
                Ok(started) => return Ok(started),
                Err(Error::InsufficientCapacity { message }) => {
                    debug!(opctx.log, "no room with this separation";
                        "instance_id" => %appliance.id,
                        "avoid" => ?attempt.avoid,
                        "message" => message,
                    );
                    appliance =
                        self.datastore.appliance_fetch(opctx, appliance.id).await?;
                }
                Err(error) => return Err(error),
            }
        }
        Err(Error::insufficient_capacity(&format!(
            "unable to start redundant router {} with any separation from \
             its peer",
            appliance.id
        )))
    }

    async fn start_with_plan(
        &self,
        opctx: &OpContext,
        mut appliance: ApplianceInstance,
        plan: &DeploymentPlan,
    ) -> Result<ApplianceInstance, Error> {
        for network_id in &appliance.network_ids {
            self.catalog.network_start(*network_id).await?;
        }

        if appliance.is_redundant {
            if let Some(network_id) = appliance.network_ids.first().copied() {
                let peers = self
                    .datastore
                    .appliance_list_by_network(opctx, network_id)
                    .await?;
                appliance.priority = self.priority.updated_priority(
                    network_id,
                    appliance.id,
                    &peers,
                )?;
                appliance.priority_bumped = false;
            }
        }

        let previous = appliance.state;
        appliance.set_state(ApplianceState::Starting);
        self.datastore.appliance_update(opctx, &appliance).await?;

        match self.compute.advance_start(&appliance, plan).await {
            Ok(started) => {
                appliance.placement = Some(started.placement);
                appliance.addresses = started.addresses;
                appliance.template_version = started.template_version;
                appliance.script_version = started.script_version;
                appliance.set_state(ApplianceState::Running);
                appliance.stop_pending = false;
                self.datastore.appliance_update(opctx, &appliance).await?;
                info!(opctx.log, "started appliance";
                    "instance_id" => %appliance.id,
                    "host_id" => ?appliance.host_id(),
                    "priority" => appliance.priority,
                );
                Ok(appliance)
            }
            Err(error) => {
                appliance.set_state(if previous == ApplianceState::Starting {
                    ApplianceState::Stopped
                } else {
                    previous
                });
                self.datastore.appliance_update(opctx, &appliance).await?;
                warn!(opctx.log, "failed to start appliance";
                    "instance_id" => %appliance.id,
                    "error" => %error,
                );
                Err(match error {
                    ComputeError::TimedOut { message } => Error::unavail(
                        &format!("timed out starting {}: {}", appliance.id, message),
                    ),
                    error => error.into(),
                })
            }
        }
    }

    /// Powers the appliance off and clears any pending stop.
    pub async fn appliance_stop(
        &self,
        opctx: &OpContext,
        id: ApplianceUuid,
        forced: bool,
    ) -> Result<ApplianceInstance, Error> {
        let mut appliance = self.datastore.appliance_fetch(opctx, id).await?;
        match appliance.state {
            ApplianceState::Destroyed => {
                return Err(Error::invalid_request(&format!(
                    "appliance {} is destroyed",
                    id
                )))
            }
            ApplianceState::Stopped => {
                if appliance.stop_pending {
                    appliance.stop_pending = false;
                    self.datastore.appliance_update(opctx, &appliance).await?;
                }
                return Ok(appliance);
            }
            _ => (),
        }

        let previous = appliance.state;
        appliance.set_state(ApplianceState::Stopping);
        self.datastore.appliance_update(opctx, &appliance).await?;

        if let Err(error) = self.compute.advance_stop(id, forced).await {
            let mut restored =
                self.datastore.appliance_fetch(opctx, id).await?;
            restored.set_state(previous);
            self.datastore.appliance_update(opctx, &restored).await?;
            warn!(opctx.log, "failed to stop appliance";
                "instance_id" => %id,
                "error" => %error,
            );
            return Err(Error::unavail(&format!(
                "unable to stop appliance {}: {}",
                id, error
            )));
        }

        appliance.set_state(ApplianceState::Stopped);
        appliance.stop_pending = false;
        self.datastore.appliance_update(opctx, &appliance).await?;
        info!(opctx.log, "stopped appliance"; "instance_id" => %id);
        Ok(appliance)
    }

    /// Stops then starts a running appliance.  A failed stop fails the
    /// reboot without attempting the start.
    pub async fn appliance_reboot(
        &self,
        opctx: &OpContext,
        id: ApplianceUuid,
    ) -> Result<ApplianceInstance, Error> {
        let appliance = self.datastore.appliance_fetch(opctx, id).await?;
        if !appliance.is_running() {
            return Err(Error::unavail(&format!(
                "unable to reboot appliance {} in state {}",
                id, appliance.state
            )));
        }
        info!(opctx.log, "rebooting appliance"; "instance_id" => %id);

        let stopped = self.appliance_stop(opctx, id, false).await.map_err(
            |error| {
                Error::unavail(&format!(
                    "failed to reboot appliance {}: {}",
                    id, error
                ))
            },
        )?;
        let plan = DeploymentPlan::for_zone(stopped.zone_id);
        self.start_appliance(opctx, stopped, &plan).await
    }

    /// Stops (if needed) and expunges the appliance, then marks the record
    /// destroyed.
    pub async fn appliance_destroy(
        &self,
        opctx: &OpContext,
        id: ApplianceUuid,
    ) -> Result<(), Error> {
        let appliance = self.datastore.appliance_fetch(opctx, id).await?;
        if appliance.state == ApplianceState::Destroyed {
            return Ok(());
        }
        if appliance.state != ApplianceState::Stopped {
            self.appliance_stop(opctx, id, true).await?;
        }
        self.compute.expunge(id).await?;

        let mut appliance = self.datastore.appliance_fetch(opctx, id).await?;
        appliance.set_state(ApplianceState::Destroyed);
        appliance.stop_pending = false;
        self.datastore.appliance_update(opctx, &appliance).await?;
        info!(opctx.log, "destroyed appliance"; "instance_id" => %id);
        Ok(())
    }

    /// Stops every stop-pending appliance on a host whose agent just
    /// reconnected.  Returns how many were stopped.
    pub async fn host_reconnected(
        &self,
        opctx: &OpContext,
        host_id: HostUuid,
    ) -> Result<usize, Error> {
        let opctx = opctx.child(BTreeMap::from([(
            String::from("host_id"),
            host_id.to_string(),
        )]));
        let appliances =
            self.datastore.appliance_list_by_host(&opctx, host_id).await?;

        let mut stopped = 0;
        for appliance in appliances.into_iter().filter(|a| a.stop_pending) {
            if appliance.state == ApplianceState::Stopped {
                continue;
            }
            info!(opctx.log, "stopping router left running while its host \
                              was disconnected";
                "instance_id" => %appliance.id,
                "state" => %appliance.state,
            );
            self.appliance_stop(&opctx, appliance.id, false).await.map_err(
                |error| {
                    Error::unavail(&format!(
                        "failed to stop stop-pending router {} on host {}: {}",
                        appliance.id, host_id, error
                    ))
                },
            )?;
            stopped += 1;
        }
        Ok(stopped)
    }

    /// Reboots every appliance in `scope` whose version fails the version
    /// gate.  Instances that are up to date are skipped.
    pub async fn appliances_upgrade(
        &self,
        opctx: &OpContext,
        scope: UpgradeScope,
    ) -> Result<Vec<UpgradeResult>, Error> {
        let candidates: Vec<ApplianceInstance> = match scope {
            UpgradeScope::Instance(id) => {
                vec![self.datastore.appliance_fetch(opctx, id).await?]
            }
            _ => self
                .datastore
                .appliance_list_all(opctx)
                .await?
                .into_iter()
                .filter(|a| a.is_running() && scope.matches(a))
                .collect(),
        };

        let gate = self.dispatcher.version_gate();
        let mut results = Vec::new();
        for appliance in candidates {
            if gate.admits(&appliance) {
                continue;
            }
            debug!(opctx.log, "upgrading appliance";
                "instance_id" => %appliance.id,
                "found" => ?appliance.template_version,
                "minimum" => %gate.minimum(),
            );
            let result = self
                .appliance_reboot(opctx, appliance.id)
                .await
                .map(|_| ());
            if let Err(error) = &result {
                warn!(opctx.log, "failed to upgrade appliance";
                    "instance_id" => %appliance.id,
                    "error" => %error,
                );
            }
            results.push(UpgradeResult { instance_id: appliance.id, result });
        }
        Ok(results)
    }
}
