// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One reconciliation pass over a redundant network

use super::SanityVerdict;
use crate::alert::AlertKind;
use crate::context::OpContext;
use std::collections::BTreeMap;
use vrouter_agent_client::AnswerPayload;
use vrouter_agent_client::Command;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::Error;
use vrouter_common::api::RedundantState;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::NetworkUuid;

/// What polling one appliance found out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The appliance is not running, so it plays no role.
    NotRunning,
    /// The agent answered the status check.
    Reachable,
    /// The agent could not be reached, or the appliance's host is not up.
    Unreachable,
    /// The agent was not asked, or its answer made no sense.
    Indeterminate,
}

/// Why a pass did nothing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Only networks with exactly two appliances are reconciled.
    NotAPair { count: usize },
    /// The owning appliance has not been placed on a host.
    OwnerUnplaced,
    /// The owning appliance's host is attached to another management node.
    OwnedElsewhere,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    Reconciled {
        polls: Vec<(ApplianceUuid, PollOutcome)>,
        duplicate_masters: usize,
        sanity: SanityVerdict,
        survivor_handled: bool,
    },
}

impl super::RouterManager {
    /// Refreshes the redundant state of both members of `network_id`'s pair
    /// and repairs what can be repaired.
    ///
    /// Exactly one management node acts on a given pair: the one attached
    /// to the host of the pair's owner (the member with the lower id if it
    /// is placed, the other one otherwise).
    pub async fn reconcile_redundant_network(
        &self,
        opctx: &OpContext,
        network_id: NetworkUuid,
    ) -> Result<ReconcileOutcome, Error> {
        let opctx = opctx.child(BTreeMap::from([(
            String::from("network_id"),
            network_id.to_string(),
        )]));
        let mut appliances =
            self.datastore.appliance_list_by_network(&opctx, network_id).await?;
        if appliances.len() != 2 {
            return Ok(ReconcileOutcome::Skipped(SkipReason::NotAPair {
                count: appliances.len(),
            }));
        }

        let owner = if appliances[0].id < appliances[1].id
            && appliances[0].host_id().is_some()
        {
            &appliances[0]
        } else {
            &appliances[1]
        };
        let Some(owner_host) = owner.host_id() else {
            return Ok(ReconcileOutcome::Skipped(SkipReason::OwnerUnplaced));
        };
        // A host the catalog no longer knows has no management node.
        let management_node = match self.catalog.host_fetch(owner_host).await {
            Ok(host) => host.management_node,
            Err(Error::ObjectNotFound { .. }) => None,
            Err(error) => return Err(error),
        };
        if management_node != Some(self.node_id) {
            trace!(opctx.log, "pair is reconciled by another node";
                "owner" => %owner.id,
                "host_id" => %owner_host,
            );
            return Ok(ReconcileOutcome::Skipped(SkipReason::OwnedElsewhere));
        }

        let mut polls = Vec::with_capacity(appliances.len());
        for appliance in appliances.iter_mut() {
            let outcome = self.redundancy_poll_status(&opctx, appliance).await?;
            polls.push((appliance.id, outcome));
        }

        let duplicate_masters =
            self.redundancy_check_duplicate_masters(&opctx, &appliances);
        let sanity =
            self.redundancy_check_sanity(&opctx, network_id, &appliances).await?;

        let survivor = match (polls[0].1, polls[1].1) {
            (PollOutcome::Reachable, PollOutcome::Unreachable) => Some((0, 1)),
            (PollOutcome::Unreachable, PollOutcome::Reachable) => Some((1, 0)),
            _ => None,
        };
        let mut survivor_handled = false;
        if let Some((connected, lost)) = survivor {
            let (connected, lost) = (&appliances[connected], &appliances[lost]);
            if !lost.stop_pending {
                let reason =
                    format!("status check of router {} failed", lost.name);
                self.redundancy_handle_single_survivor(
                    &opctx, connected, lost, &reason,
                )
                .await?;
                survivor_handled = true;
            }
        }

        Ok(ReconcileOutcome::Reconciled {
            polls,
            duplicate_masters,
            sanity,
            survivor_handled,
        })
    }

    /// Asks the appliance's agent for its redundant state and records the
    /// answer.  Anything short of a good answer records `Unknown`.
    pub(crate) async fn redundancy_poll_status(
        &self,
        opctx: &OpContext,
        appliance: &mut ApplianceInstance,
    ) -> Result<PollOutcome, Error> {
        let previous = appliance.redundant_state;
        let outcome = if !appliance.is_running() {
            appliance.redundant_state = RedundantState::Unknown;
            appliance.priority_bumped = false;
            PollOutcome::NotRunning
        } else if !self.appliance_host_up(appliance).await? {
            appliance.redundant_state = RedundantState::Unknown;
            PollOutcome::Unreachable
        } else if appliance.addresses.private_ip.is_none() {
            appliance.redundant_state = RedundantState::Unknown;
            PollOutcome::Indeterminate
        } else {
            let command =
                Command::CheckRouter { router_name: appliance.name.clone() };
            match self.dispatcher.send(opctx, appliance, vec![command]).await {
                Ok(result) => match result.first().map(|a| &a.payload) {
                    Some(AnswerPayload::RouterStatus { state, bumped })
                        if result.is_success() =>
                    {
                        appliance.redundant_state = *state;
                        appliance.priority_bumped = *bumped;
                        PollOutcome::Reachable
                    }
                    _ => {
                        warn!(opctx.log, "unable to get router status";
                            "instance_id" => %appliance.id,
                            "details" => result.failure_details(),
                        );
                        appliance.redundant_state = RedundantState::Unknown;
                        PollOutcome::Indeterminate
                    }
                },
                Err(Error::AgentUnavailable { .. }) => {
                    appliance.redundant_state = RedundantState::Unknown;
                    PollOutcome::Unreachable
                }
                Err(error @ Error::VersionMismatch { .. }) => {
                    warn!(opctx.log, "not polling router"; "error" => %error);
                    appliance.redundant_state = RedundantState::Unknown;
                    PollOutcome::Indeterminate
                }
                Err(error) => return Err(error),
            }
        };

        self.datastore
            .appliance_update_redundant_state(
                opctx,
                appliance.id,
                appliance.redundant_state,
                appliance.priority_bumped,
            )
            .await?;

        if previous != appliance.redundant_state {
            let subject = format!(
                "redundant virtual router {} moved from {} to {}",
                appliance.name, previous, appliance.redundant_state
            );
            info!(opctx.log, "{}", subject;
                "instance_id" => %appliance.id,
                "poll" => ?outcome,
            );
            if appliance.redundant_state == RedundantState::Master {
                self.alert(
                    AlertKind::BecameMaster,
                    appliance.network_ids.first().copied(),
                    appliance,
                    subject,
                );
            }
        }
        Ok(outcome)
    }

    /// Whether the appliance's host is known and up.  A host that has been
    /// removed from the catalog counts as down.
    pub(super) async fn appliance_host_up(
        &self,
        appliance: &ApplianceInstance,
    ) -> Result<bool, Error> {
        let Some(host_id) = appliance.host_id() else {
            return Ok(false);
        };
        match self.catalog.host_fetch(host_id).await {
            Ok(host) => Ok(host.is_up()),
            Err(Error::ObjectNotFound { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }
}
