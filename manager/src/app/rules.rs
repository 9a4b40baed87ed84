// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pushing configuration to every appliance of a network

use crate::context::OpContext;
use std::collections::BTreeMap;
use vrouter_agent_client::Command;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::ApplianceState;
use vrouter_common::api::Error;
use vrouter_common::typed_uuid::NetworkUuid;

impl super::RouterManager {
    /// Sends `commands` to each appliance serving `network_id`.
    ///
    /// `what` names the configuration for messages.  Appliances that are
    /// stopped or stopping are skipped.  A command that fails on an
    /// appliance that did answer aborts the whole call.  Appliances whose
    /// agent cannot be reached are tolerated as long as at least one other
    /// appliance took the configuration; if they belong to a redundant pair
    /// the survivor is told to take over.
    ///
    /// With `fail_when_disconnected`, the return value says whether any
    /// appliance accepted the commands.  Otherwise it is always `true`.
    pub async fn network_apply_rules(
        &self,
        opctx: &OpContext,
        network_id: NetworkUuid,
        what: &str,
        commands: Vec<Command>,
        fail_when_disconnected: bool,
    ) -> Result<bool, Error> {
        let opctx = opctx.child(BTreeMap::from([
            (String::from("network_id"), network_id.to_string()),
            (String::from("rules"), what.to_string()),
        ]));
        let appliances =
            self.datastore.appliance_list_by_network(&opctx, network_id).await?;
        if appliances.is_empty() {
            return Err(Error::unavail(&format!(
                "unable to apply {}: network {} has no routers",
                what, network_id
            )));
        }

        let mut connected: Vec<ApplianceInstance> = Vec::new();
        let mut disconnected: Vec<ApplianceInstance> = Vec::new();
        for appliance in appliances {
            match appliance.state {
                ApplianceState::Running => (),
                ApplianceState::Stopped | ApplianceState::Stopping => {
                    debug!(opctx.log, "router is not running, skipping";
                        "instance_id" => %appliance.id,
                        "state" => %appliance.state,
                    );
                    continue;
                }
                state => {
                    warn!(opctx.log, "router is in an unexpected state";
                        "instance_id" => %appliance.id,
                        "state" => %state,
                    );
                    return Err(Error::unavail(&format!(
                        "unable to apply {} on router {} in state {}",
                        what, appliance.name, state
                    )));
                }
            }

            if appliance.stop_pending {
                if self.appliance_host_up(&appliance).await? {
                    return Err(Error::unavail(&format!(
                        "router {} is pending stop while its host is up; \
                         unable to apply {}",
                        appliance.name, what
                    )));
                }
                debug!(opctx.log, "router is pending stop, skipping";
                    "instance_id" => %appliance.id,
                );
                continue;
            }

            match self.dispatcher.send(&opctx, &appliance, commands.clone()).await {
                Ok(result) if result.is_success() => connected.push(appliance),
                Ok(result) => {
                    let details = result.failure_details().unwrap_or_default();
                    warn!(opctx.log, "failed to apply rules";
                        "instance_id" => %appliance.id,
                        "details" => &details,
                    );
                    return Err(Error::unavail(&format!(
                        "unable to apply {} on router {}: {}",
                        what, appliance.name, details
                    )));
                }
                Err(Error::AgentUnavailable { internal_message, .. }) => {
                    warn!(opctx.log, "router is disconnected";
                        "instance_id" => %appliance.id,
                        "error" => internal_message,
                    );
                    disconnected.push(appliance);
                }
                Err(error) => return Err(error),
            }
        }

        if !connected.is_empty() {
            if let ([survivor], [lost]) =
                (connected.as_slice(), disconnected.as_slice())
            {
                if lost.is_redundant {
                    let reason = format!("unable to apply {}", what);
                    self.redundancy_handle_single_survivor(
                        &opctx, survivor, lost, &reason,
                    )
                    .await?;
                }
            }
        } else if let Some(first) = disconnected.first() {
            return Err(Error::agent_unavailable(
                first.host_id(),
                &format!(
                    "unable to apply {} on network {}: all routers are \
                     disconnected",
                    what, network_id
                ),
            ));
        }

        if fail_when_disconnected {
            Ok(!connected.is_empty())
        } else {
            Ok(true)
        }
    }
}
