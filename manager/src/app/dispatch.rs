// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sending commands to the agent that owns an appliance

use crate::config::AgentConfig;
use crate::context::OpContext;
use std::sync::Arc;
use std::time::Duration;
use vrouter_agent_client::AgentTransport;
use vrouter_agent_client::Command;
use vrouter_agent_client::CommandBatch;
use vrouter_agent_client::CommandResult;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::Error;
use vrouter_common::version::ApplianceVersion;

/// Refuses to talk to appliances older than a minimum release
#[derive(Clone, Debug)]
pub struct VersionGate {
    enabled: bool,
    minimum: ApplianceVersion,
}

impl VersionGate {
    pub fn new(enabled: bool, minimum: ApplianceVersion) -> VersionGate {
        VersionGate { enabled, minimum }
    }

    pub fn from_config(config: &AgentConfig) -> VersionGate {
        VersionGate::new(
            config.version_check_enabled,
            config.minimum_version.clone(),
        )
    }

    pub fn minimum(&self) -> &ApplianceVersion {
        &self.minimum
    }

    /// Returns whether `appliance` may receive commands.  With the gate
    /// disabled every appliance passes; otherwise a missing version fails.
    pub fn admits(&self, appliance: &ApplianceInstance) -> bool {
        !self.enabled
            || self.minimum.is_satisfied_by(appliance.template_version.as_deref())
    }

    pub fn check(&self, appliance: &ApplianceInstance) -> Result<(), Error> {
        if self.admits(appliance) {
            Ok(())
        } else {
            Err(Error::VersionMismatch {
                instance_id: appliance.id,
                found: appliance.template_version.clone(),
                minimum: self.minimum.to_string(),
            })
        }
    }
}

/// Sends command batches to the agent on an appliance's host
///
/// Nothing is retried here.  An unreachable agent surfaces as
/// [`Error::AgentUnavailable`]; what that means for the appliance is the
/// caller's call.
pub struct CommandDispatcher {
    transport: Arc<dyn AgentTransport>,
    gate: VersionGate,
    timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        gate: VersionGate,
        timeout: Duration,
    ) -> CommandDispatcher {
        CommandDispatcher { transport, gate, timeout }
    }

    pub fn version_gate(&self) -> &VersionGate {
        &self.gate
    }

    /// Send `commands` to `appliance` as one batch.
    ///
    /// `Ok` means the agent answered; check [`CommandResult::is_success`]
    /// for whether every command succeeded.
    pub async fn send(
        &self,
        opctx: &OpContext,
        appliance: &ApplianceInstance,
        commands: Vec<Command>,
    ) -> Result<CommandResult, Error> {
        self.gate.check(appliance)?;

        let host_id = appliance.host_id().ok_or_else(|| {
            Error::agent_unavailable(
                None,
                &format!("appliance {} is not placed on a host", appliance.id),
            )
        })?;

        let batch = CommandBatch::new(appliance.id, commands);
        let log = opctx.log.new(o!(
            "instance_id" => appliance.id.to_string(),
            "host_id" => host_id.to_string(),
        ));
        trace!(log, "sending command batch"; "commands" => batch.commands.len());

        let answers = self
            .transport
            .send(host_id, &batch, self.timeout)
            .await
            .map_err(|error| {
                warn!(log, "agent unavailable"; "error" => %error);
                Error::from(error)
            })?;

        let result = CommandResult::new(&batch, answers);
        if let Some(details) = result.failure_details() {
            debug!(log, "command batch failed"; "details" => details);
        }
        Ok(result)
    }
}
