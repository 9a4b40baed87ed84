// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated host agents

use super::FleetState;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use vrouter_agent_client::AgentTransport;
use vrouter_agent_client::Command;
use vrouter_agent_client::CommandAnswer;
use vrouter_agent_client::CommandBatch;
use vrouter_agent_client::TransportError;
use vrouter_common::api::RedundantState;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::HostUuid;

#[derive(Debug, Default)]
struct Overrides {
    /// routers that report this state no matter what
    router_state: BTreeMap<ApplianceUuid, RedundantState>,
    /// routers that reject configuration
    reject_configure: BTreeSet<ApplianceUuid>,
    /// routers whose status answer is garbage
    garbled_status: BTreeSet<ApplianceUuid>,
    /// how long every batch spends in flight
    latency: Duration,
}

#[derive(Debug, Default)]
struct Calls {
    total: usize,
    by_command: BTreeMap<String, usize>,
}

/// Every host's agent, answering for the routers the simulated compute
/// layer has booted
///
/// A router's redundant state follows VRRP: among the running members of
/// its pair whose hosts can talk to each other, the one with the highest
/// effective priority is master (the lower id wins a tie).
pub struct SimAgent {
    state: Arc<Mutex<FleetState>>,
    overrides: Mutex<Overrides>,
    calls: Mutex<Calls>,
}

impl SimAgent {
    pub(crate) fn new(state: Arc<Mutex<FleetState>>) -> SimAgent {
        SimAgent {
            state,
            overrides: Mutex::new(Overrides::default()),
            calls: Mutex::new(Calls::default()),
        }
    }

    /// Forces the router to report `state` regardless of its peers.
    pub fn force_router_state(
        &self,
        id: ApplianceUuid,
        state: Option<RedundantState>,
    ) {
        let overrides = &mut self.overrides.lock().unwrap().router_state;
        match state {
            Some(state) => overrides.insert(id, state),
            None => overrides.remove(&id),
        };
    }

    pub fn reject_configure(&self, id: ApplianceUuid, reject: bool) {
        let overrides = &mut self.overrides.lock().unwrap().reject_configure;
        if reject {
            overrides.insert(id);
        } else {
            overrides.remove(&id);
        }
    }

    /// Makes the router's status answer unusable.
    pub fn garble_status(&self, id: ApplianceUuid, garble: bool) {
        let overrides = &mut self.overrides.lock().unwrap().garbled_status;
        if garble {
            overrides.insert(id);
        } else {
            overrides.remove(&id);
        }
    }

    /// Delays every batch by `latency` before any agent looks at it.
    pub fn set_latency(&self, latency: Duration) {
        self.overrides.lock().unwrap().latency = latency;
    }

    /// Number of batches that reached any agent.
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().total
    }

    /// Number of commands named `name` that reached any agent.
    pub fn command_calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().by_command.get(name).copied().unwrap_or(0)
    }

    fn router_status(
        &self,
        state: &FleetState,
        id: ApplianceUuid,
    ) -> RedundantState {
        if let Some(forced) = self.overrides.lock().unwrap().router_state.get(&id)
        {
            return *forced;
        }
        let Some(vm) = state.vms.get(&id) else {
            return RedundantState::Unknown;
        };
        let delta = state.priority_delta;
        let effective = |bumped: bool, priority: u32| {
            if bumped {
                priority + delta
            } else {
                priority
            }
        };
        let winner = state
            .vms
            .iter()
            .filter(|(_, peer)| {
                peer.running
                    && peer.is_redundant
                    && peer.network_id == vm.network_id
                    && state.host_reachable(peer.host_id)
            })
            .max_by(|(a_id, a), (b_id, b)| {
                effective(a.bumped, a.priority)
                    .cmp(&effective(b.bumped, b.priority))
                    .then(b_id.cmp(a_id))
            })
            .map(|(winner_id, _)| *winner_id);
        if winner == Some(id) {
            RedundantState::Master
        } else {
            RedundantState::Backup
        }
    }

    fn execute(
        &self,
        state: &mut FleetState,
        host_id: HostUuid,
        instance_id: ApplianceUuid,
        command: &Command,
    ) -> CommandAnswer {
        let Some(vm) = state.vms.get(&instance_id) else {
            return CommandAnswer::failure(format!(
                "no router {} on this host",
                instance_id
            ));
        };
        if !vm.running || vm.host_id != Some(host_id) {
            return CommandAnswer::failure(format!(
                "router {} is not running on this host",
                vm.name
            ));
        }

        match command {
            Command::CheckRouter { router_name } => {
                if *router_name != vm.name {
                    return CommandAnswer::failure(format!(
                        "unknown router {}",
                        router_name
                    ));
                }
                if self.overrides.lock().unwrap().garbled_status.contains(&instance_id)
                {
                    return CommandAnswer::success("Status: ???");
                }
                let bumped = vm.bumped;
                let status = self.router_status(state, instance_id);
                CommandAnswer::router_status(status, bumped)
            }
            Command::BumpUpPriority { .. } => {
                if let Some(vm) = state.vms.get_mut(&instance_id) {
                    vm.bumped = true;
                }
                CommandAnswer::success("priority bumped")
            }
            Command::Configure { kind, .. } => {
                if self
                    .overrides
                    .lock()
                    .unwrap()
                    .reject_configure
                    .contains(&instance_id)
                {
                    return CommandAnswer::failure(format!(
                        "router rejected {}",
                        kind
                    ));
                }
                if let Some(vm) = state.vms.get_mut(&instance_id) {
                    vm.configured.push(kind.clone());
                }
                CommandAnswer::success(format!("applied {}", kind))
            }
        }
    }
}

#[async_trait]
impl AgentTransport for SimAgent {
    async fn send(
        &self,
        host_id: HostUuid,
        batch: &CommandBatch,
        timeout: Duration,
    ) -> Result<Vec<CommandAnswer>, TransportError> {
        let latency = self.overrides.lock().unwrap().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        match state.host(host_id) {
            None => {
                return Err(TransportError::Unavailable {
                    host_id,
                    message: String::from("unknown host"),
                })
            }
            Some(h) if !h.agent_reachable => {
                return Err(TransportError::TimedOut { host_id, timeout })
            }
            Some(h) if !h.host.is_up() => {
                return Err(TransportError::Unavailable {
                    host_id,
                    message: format!("host is {}", h.host.status),
                })
            }
            Some(_) => (),
        }

        {
            let mut calls = self.calls.lock().unwrap();
            calls.total += 1;
            for command in &batch.commands {
                *calls.by_command.entry(command.name().to_string()).or_default() +=
                    1;
            }
        }

        let mut answers = Vec::with_capacity(batch.commands.len());
        for command in &batch.commands {
            let answer =
                self.execute(&mut state, host_id, batch.instance_id, command);
            let failed = !answer.result;
            answers.push(answer);
            if failed && batch.stop_on_error {
                break;
            }
        }
        Ok(answers)
    }
}
