// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Redundant pair priority protocol
//!
//! Each member of a redundant pair advertises a priority; the highest
//! effective priority among the reachable members is master.  The manager
//! never elects a master itself.  It only assigns priorities so that the
//! pair stays well ordered:
//!
//! * a freshly (re)started member gets `max(peer) - delta + 1`, one below
//!   what a bumped peer would advertise;
//! * when the master disappears, the surviving backup is bumped by `delta`
//!   so it outranks the old master even if that one comes back;
//! * a pair where `master == backup + delta - 1` does not hold, or whose
//!   backup is bumped, is repaired by rebooting the backup.

use crate::alert::Alert;
use crate::alert::AlertKind;
use crate::config::PriorityConfig;
use crate::context::OpContext;
use std::collections::BTreeMap;
use vrouter_agent_client::Command;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::Error;
use vrouter_common::api::RedundantState;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::NetworkUuid;

/// Priority constants of the protocol
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorityPolicy {
    pub default: u32,
    pub delta: u32,
    pub lower_bound: u32,
    pub upper_bound: u32,
}

impl From<&PriorityConfig> for PriorityPolicy {
    fn from(config: &PriorityConfig) -> Self {
        PriorityPolicy {
            default: config.default,
            delta: config.delta,
            lower_bound: config.lower_bound,
            upper_bound: config.upper_bound,
        }
    }
}

/// Result of checking a redundant pair's priorities
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SanityVerdict {
    /// The network does not currently have exactly one master and one
    /// backup, so there is nothing to compare.
    Indeterminate,
    Consistent,
    /// The backup must be rebooted to pick up a fresh priority.
    NeedsRecovery { master: ApplianceUuid, backup: ApplianceUuid },
}

impl PriorityPolicy {
    pub fn effective(&self, appliance: &ApplianceInstance) -> u32 {
        appliance.effective_priority(self.delta)
    }

    /// Priority to assign to `appliance_id` as it (re)starts, given every
    /// appliance on its network (itself included).
    pub fn updated_priority(
        &self,
        network_id: NetworkUuid,
        appliance_id: ApplianceUuid,
        appliances: &[ApplianceInstance],
    ) -> Result<u32, Error> {
        let mut max_priority = 0;
        for a in appliances {
            if !a.is_redundant {
                return Err(Error::internal_error(&format!(
                    "non-redundant appliance {} found on redundant network {}",
                    a.id, network_id
                )));
            }
            if a.id != appliance_id {
                max_priority = max_priority.max(self.effective(a));
            }
        }

        if max_priority == 0 {
            return Ok(self.default);
        }
        if max_priority < self.lower_bound {
            return Err(Error::InsufficientVirtualNetworkCapacity {
                network_id,
                message: format!(
                    "current maximum priority {} is below {}",
                    max_priority, self.lower_bound
                ),
            });
        }
        if max_priority > self.upper_bound {
            return Err(Error::InsufficientVirtualNetworkCapacity {
                network_id,
                message: format!(
                    "too many fail-overs: current maximum priority {} \
                     is above {}",
                    max_priority, self.upper_bound
                ),
            });
        }
        Ok(max_priority - self.delta + 1)
    }

    /// Checks the master/backup ordering of a network's appliances.
    pub fn check_pair(&self, appliances: &[ApplianceInstance]) -> SanityVerdict {
        if appliances.len() != 2 {
            return SanityVerdict::Indeterminate;
        }
        let masters: Vec<_> = appliances
            .iter()
            .filter(|a| a.redundant_state == RedundantState::Master)
            .collect();
        let backups: Vec<_> = appliances
            .iter()
            .filter(|a| a.redundant_state == RedundantState::Backup)
            .collect();
        let (master, backup) = match (masters.as_slice(), backups.as_slice()) {
            ([master], [backup]) => (*master, *backup),
            _ => return SanityVerdict::Indeterminate,
        };

        let well_ordered =
            self.effective(master) == self.effective(backup) + self.delta - 1;
        if well_ordered && !backup.priority_bumped {
            SanityVerdict::Consistent
        } else {
            SanityVerdict::NeedsRecovery { master: master.id, backup: backup.id }
        }
    }
}

/// Pairs of appliances that both claim to be master on the same network
pub fn duplicate_masters(
    appliances: &[ApplianceInstance],
) -> Vec<(NetworkUuid, &ApplianceInstance, &ApplianceInstance)> {
    let mut first_master = BTreeMap::new();
    let mut duplicates = Vec::new();
    for a in appliances {
        if a.redundant_state != RedundantState::Master {
            continue;
        }
        for network_id in &a.network_ids {
            match first_master.get(network_id) {
                Some(other) => duplicates.push((*network_id, *other, a)),
                None => {
                    first_master.insert(*network_id, a);
                }
            }
        }
    }
    duplicates
}

impl super::RouterManager {
    pub(crate) fn alert(
        &self,
        kind: AlertKind,
        network_id: Option<NetworkUuid>,
        appliance: &ApplianceInstance,
        subject: String,
    ) {
        self.alerts.send_alert(Alert {
            kind,
            zone_id: appliance.zone_id,
            network_id,
            instance_id: appliance.id,
            subject,
        });
    }

    /// Alerts on every network where two appliances claim to be master.
    /// Nothing is changed; operators resolve duplicate masters.
    pub fn redundancy_check_duplicate_masters(
        &self,
        opctx: &OpContext,
        appliances: &[ApplianceInstance],
    ) -> usize {
        let duplicates = duplicate_masters(appliances);
        for (network_id, a, b) in &duplicates {
            let subject = format!(
                "more than one redundant virtual router is master: {} and {}",
                a.name, b.name
            );
            warn!(opctx.log, "{}", subject;
                "network_id" => %network_id,
                "first" => %a.id,
                "second" => %b.id,
            );
            self.alert(AlertKind::DuplicateMaster, Some(*network_id), a, subject.clone());
            self.alert(AlertKind::DuplicateMaster, Some(*network_id), b, subject);
        }
        duplicates.len()
    }

    /// Checks the pair's priorities and reboots the backup if they are out
    /// of order.
    pub async fn redundancy_check_sanity(
        &self,
        opctx: &OpContext,
        network_id: NetworkUuid,
        appliances: &[ApplianceInstance],
    ) -> Result<SanityVerdict, Error> {
        let verdict = self.priority.check_pair(appliances);
        if let SanityVerdict::NeedsRecovery { master, backup } = &verdict {
            let find = |id: &ApplianceUuid| {
                appliances.iter().find(|a| a.id == *id).ok_or_else(|| {
                    Error::internal_error("sanity verdict names unknown appliance")
                })
            };
            self.redundancy_recover_network(
                opctx,
                network_id,
                find(master)?,
                find(backup)?,
            )
            .await?;
        }
        Ok(verdict)
    }

    /// Reboots `backup` so it restarts with a priority derived from
    /// `master`.  Only done when both are running on hosts that are up.
    /// Returns whether the reboot was attempted.
    pub async fn redundancy_recover_network(
        &self,
        opctx: &OpContext,
        network_id: NetworkUuid,
        master: &ApplianceInstance,
        backup: &ApplianceInstance,
    ) -> Result<bool, Error> {
        if !master.is_running() || !backup.is_running() {
            return Ok(false);
        }
        for a in [master, backup] {
            if !self.appliance_host_up(a).await? {
                return Ok(false);
            }
        }

        let subject = format!(
            "rebooting {} to restore redundant virtual router priorities",
            backup.name
        );
        info!(opctx.log, "{}", subject;
            "network_id" => %network_id,
            "master" => %master.id,
            "master_priority" => self.priority.effective(master),
            "backup" => %backup.id,
            "backup_priority" => self.priority.effective(backup),
            "backup_bumped" => backup.priority_bumped,
        );
        self.alert(AlertKind::SanityRecovery, Some(network_id), backup, subject);

        if let Err(error) = self.appliance_reboot(opctx, backup.id).await {
            warn!(opctx.log, "failed to reboot backup router";
                "instance_id" => %backup.id,
                "error" => %error,
            );
        }
        Ok(true)
    }

    /// Reacts to exactly one member of a pair being reachable.
    ///
    /// The unreachable member is marked stop-pending so that it is stopped
    /// when its host reconnects.  If the survivor currently ranks below it,
    /// the survivor is bumped so that it stays master afterwards.
    pub async fn redundancy_handle_single_survivor(
        &self,
        opctx: &OpContext,
        connected: &ApplianceInstance,
        disconnected: &ApplianceInstance,
        reason: &str,
    ) -> Result<(), Error> {
        for a in [connected, disconnected] {
            if !a.is_redundant {
                return Err(Error::unavail(&format!(
                    "appliance {} is not a redundant router",
                    a.id
                )));
            }
        }

        let subject = format!(
            "virtual router {} will be stopped after connecting back: {}",
            disconnected.name, reason
        );
        debug!(opctx.log, "{}", subject;
            "instance_id" => %disconnected.id,
            "survivor" => %connected.id,
        );
        self.alert(
            AlertKind::SingleSurvivor,
            disconnected.network_ids.first().copied(),
            disconnected,
            subject,
        );

        self.datastore
            .appliance_set_stop_pending(opctx, disconnected.id, true)
            .await?;
        let disconnected =
            self.datastore.appliance_fetch(opctx, disconnected.id).await?;

        let survivor_priority = self.priority.effective(connected);
        let lost_priority = self.priority.effective(&disconnected);
        if survivor_priority >= lost_priority {
            return Ok(());
        }

        if connected.priority_bumped {
            let subject = format!(
                "cannot bump up virtual router {}'s priority: already bumped",
                connected.name
            );
            self.alert(
                AlertKind::AlreadyBumped,
                connected.network_ids.first().copied(),
                connected,
                subject,
            );
            return Ok(());
        }

        let command =
            Command::BumpUpPriority { router_name: connected.name.clone() };
        match self.dispatcher.send(opctx, connected, vec![command]).await {
            Ok(result) if result.is_success() => {
                info!(opctx.log, "bumped up surviving router's priority";
                    "instance_id" => %connected.id,
                    "priority" => survivor_priority,
                    "peer_priority" => lost_priority,
                );
            }
            Ok(result) => {
                error!(opctx.log, "failed to bump up router's priority";
                    "instance_id" => %connected.id,
                    "details" => result.failure_details(),
                );
            }
            Err(error) => {
                error!(opctx.log, "failed to bump up router's priority";
                    "instance_id" => %connected.id,
                    "error" => %error,
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use vrouter_common::api::ApplianceCreate;
    use vrouter_common::api::ApplianceState;
    use vrouter_common::api::HypervisorType;
    use vrouter_common::typed_uuid::OwnerUuid;
    use vrouter_common::typed_uuid::ZoneUuid;

    fn policy() -> PriorityPolicy {
        PriorityPolicy::from(&PriorityConfig::default())
    }

    fn member(
        network_id: NetworkUuid,
        priority: u32,
        bumped: bool,
        state: RedundantState,
    ) -> ApplianceInstance {
        let mut a = ApplianceInstance::new(
            ApplianceUuid::new_v4(),
            ApplianceCreate {
                name: format!("r-{}", priority),
                owner_id: OwnerUuid::new_v4(),
                zone_id: ZoneUuid::new_v4(),
                network_id,
                hypervisor: HypervisorType::Simulator,
                is_redundant: true,
                template_version: None,
            },
        );
        a.set_state(ApplianceState::Running);
        a.priority = priority;
        a.priority_bumped = bumped;
        a.redundant_state = state;
        a
    }

    #[test]
    fn test_first_member_gets_default() {
        let n = NetworkUuid::new_v4();
        let p = policy();
        let me = member(n, 0, false, RedundantState::Unknown);
        assert_eq!(p.updated_priority(n, me.id, &[]).unwrap(), 100);
        assert_eq!(p.updated_priority(n, me.id, &[me.clone()]).unwrap(), 100);

        // Peers that were reset count as unassigned.
        let peer = member(n, 0, false, RedundantState::Unknown);
        assert_eq!(p.updated_priority(n, me.id, &[me, peer]).unwrap(), 100);
    }

    #[test]
    fn test_second_member_ranks_below() {
        let n = NetworkUuid::new_v4();
        let p = policy();
        let master = member(n, 100, false, RedundantState::Master);
        let me = member(n, 0, false, RedundantState::Unknown);
        assert_eq!(
            p.updated_priority(n, me.id, &[master.clone(), me.clone()]).unwrap(),
            99
        );

        // A bumped survivor at 99 advertises 101; its replacement gets 100.
        let survivor = member(n, 99, true, RedundantState::Master);
        assert_eq!(p.updated_priority(n, me.id, &[survivor, me]).unwrap(), 100);

        // Restarting a member ignores its own stale priority.
        assert_eq!(
            p.updated_priority(n, master.id, &[master.clone()]).unwrap(),
            100
        );
    }

    #[test]
    fn test_priority_bounds() {
        let n = NetworkUuid::new_v4();
        let p = policy();
        let me = member(n, 0, false, RedundantState::Unknown);

        let low = member(n, 19, false, RedundantState::Master);
        assert_matches!(
            p.updated_priority(n, me.id, &[low]),
            Err(Error::InsufficientVirtualNetworkCapacity { network_id, .. })
                if network_id == n
        );
        let high = member(n, 200, true, RedundantState::Master);
        assert_matches!(
            p.updated_priority(n, me.id, &[high]),
            Err(Error::InsufficientVirtualNetworkCapacity { .. })
        );
        let edge = member(n, 200, false, RedundantState::Master);
        assert_eq!(p.updated_priority(n, me.id, &[edge]).unwrap(), 199);
    }

    #[test]
    fn test_mixed_network_is_internal_error() {
        let n = NetworkUuid::new_v4();
        let me = member(n, 0, false, RedundantState::Unknown);
        let mut single = member(n, 100, false, RedundantState::Unknown);
        single.is_redundant = false;
        assert_matches!(
            policy().updated_priority(n, me.id, &[single, me.clone()]),
            Err(Error::InternalError { .. })
        );
    }

    #[test]
    fn test_check_pair() {
        let n = NetworkUuid::new_v4();
        let p = policy();

        let master = member(n, 100, false, RedundantState::Master);
        let backup = member(n, 99, false, RedundantState::Backup);
        assert_eq!(
            p.check_pair(&[master.clone(), backup.clone()]),
            SanityVerdict::Consistent
        );

        // Bumped survivor as master with the replacement below it.
        let bumped_master = member(n, 99, true, RedundantState::Master);
        let fresh = member(n, 100, false, RedundantState::Backup);
        assert_eq!(
            p.check_pair(&[bumped_master, fresh]),
            SanityVerdict::Consistent
        );

        let bumped_backup = member(n, 97, true, RedundantState::Backup);
        assert_eq!(
            p.check_pair(&[master.clone(), bumped_backup.clone()]),
            SanityVerdict::NeedsRecovery {
                master: master.id,
                backup: bumped_backup.id
            }
        );

        let stale_backup = member(n, 95, false, RedundantState::Backup);
        assert_matches!(
            p.check_pair(&[master.clone(), stale_backup]),
            SanityVerdict::NeedsRecovery { .. }
        );

        let other_master = member(n, 99, false, RedundantState::Master);
        assert_eq!(
            p.check_pair(&[master.clone(), other_master]),
            SanityVerdict::Indeterminate
        );
        let unknown = member(n, 99, false, RedundantState::Unknown);
        assert_eq!(p.check_pair(&[master.clone(), unknown]), SanityVerdict::Indeterminate);
        assert_eq!(p.check_pair(&[master]), SanityVerdict::Indeterminate);
    }

    #[test]
    fn test_duplicate_masters() {
        let n = NetworkUuid::new_v4();
        let a = member(n, 100, false, RedundantState::Master);
        let b = member(n, 99, false, RedundantState::Master);
        let c = member(NetworkUuid::new_v4(), 100, false, RedundantState::Master);
        let members = [a.clone(), b.clone(), c];
        let found = duplicate_masters(&members);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, n);
        assert_eq!((found[0].1.id, found[0].2.id), (a.id, b.id));

        let backup = member(n, 99, false, RedundantState::Backup);
        assert!(duplicate_masters(&[a, backup]).is_empty());
    }
}
