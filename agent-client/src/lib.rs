// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface for sending commands to the agent running on a hypervisor host
//!
//! Every command addresses one appliance on the host.  The agent executes a
//! [`CommandBatch`] in order and returns one [`CommandAnswer`] per command it
//! got to.  How the bytes travel is up to the [`AgentTransport`]
//! implementation.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use vrouter_common::api::Error;
use vrouter_common::api::RedundantState;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::HostUuid;

/// One command understood by the host agent
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Ask the appliance which role it currently plays in its pair.
    CheckRouter { router_name: String },
    /// Raise the appliance's advertised priority by the configured delta.
    BumpUpPriority { router_name: String },
    /// Configuration owned by other subsystems (DHCP entries, firewall
    /// rules, load balancer pools, ...).  The manager only routes it.
    Configure { kind: String, payload: serde_json::Value },
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Command::CheckRouter { .. } => "check_router",
            Command::BumpUpPriority { .. } => "bump_up_priority",
            Command::Configure { kind, .. } => kind,
        }
    }
}

/// Commands addressed to one appliance
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CommandBatch {
    pub instance_id: ApplianceUuid,
    pub commands: Vec<Command>,
    /// Stop executing at the first failed command.
    pub stop_on_error: bool,
}

impl CommandBatch {
    pub fn new(instance_id: ApplianceUuid, commands: Vec<Command>) -> Self {
        CommandBatch { instance_id, commands, stop_on_error: true }
    }

    pub fn single(instance_id: ApplianceUuid, command: Command) -> Self {
        Self::new(instance_id, vec![command])
    }
}

/// Command-specific data carried by a successful answer
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerPayload {
    #[default]
    None,
    RouterStatus { state: RedundantState, bumped: bool },
}

/// The agent's answer to one command
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CommandAnswer {
    pub result: bool,
    pub details: String,
    #[serde(default)]
    pub payload: AnswerPayload,
}

impl CommandAnswer {
    pub fn success(details: impl Into<String>) -> Self {
        CommandAnswer {
            result: true,
            details: details.into(),
            payload: AnswerPayload::None,
        }
    }

    pub fn failure(details: impl Into<String>) -> Self {
        CommandAnswer {
            result: false,
            details: details.into(),
            payload: AnswerPayload::None,
        }
    }

    pub fn router_status(state: RedundantState, bumped: bool) -> Self {
        CommandAnswer {
            result: true,
            details: format!("state: {}", state),
            payload: AnswerPayload::RouterStatus { state, bumped },
        }
    }
}

/// Outcome of dispatching a [`CommandBatch`]
///
/// The batch succeeds only if the agent answered every command and every
/// answer succeeded.  Individual answers stay available either way.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandResult {
    pub answers: Vec<CommandAnswer>,
    expected: usize,
}

impl CommandResult {
    pub fn new(batch: &CommandBatch, answers: Vec<CommandAnswer>) -> Self {
        CommandResult { answers, expected: batch.commands.len() }
    }

    pub fn is_success(&self) -> bool {
        self.answers.len() == self.expected
            && self.answers.iter().all(|a| a.result)
    }

    /// Diagnostic text of the first failure, if any.
    pub fn failure_details(&self) -> Option<String> {
        if let Some(failed) = self.answers.iter().find(|a| !a.result) {
            return Some(failed.details.clone());
        }
        if self.answers.len() != self.expected {
            return Some(format!(
                "expected {} answers, got {}",
                self.expected,
                self.answers.len()
            ));
        }
        None
    }

    pub fn first(&self) -> Option<&CommandAnswer> {
        self.answers.first()
    }
}

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum TransportError {
    #[error("agent on host {host_id} unreachable: {message}")]
    Unavailable { host_id: HostUuid, message: String },
    #[error("agent on host {host_id} did not answer within {timeout:?}")]
    TimedOut { host_id: HostUuid, timeout: Duration },
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        let host_id = match &e {
            TransportError::Unavailable { host_id, .. }
            | TransportError::TimedOut { host_id, .. } => *host_id,
        };
        Error::agent_unavailable(Some(host_id), &e.to_string())
    }
}

/// Delivers command batches to host agents
///
/// Implementations must not retry on their own: an unreachable agent is
/// reported to the caller, which decides what that means for the appliance.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send(
        &self,
        host_id: HostUuid,
        batch: &CommandBatch,
        timeout: Duration,
    ) -> Result<Vec<CommandAnswer>, TransportError>;
}
