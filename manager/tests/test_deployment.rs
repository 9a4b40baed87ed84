// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deployment and appliance lifecycle against the simulated fleet

mod common;

use assert_matches::assert_matches;
use common::RouterTestContext;
use vrouter_common::api::ApplianceCreate;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::ApplianceState;
use vrouter_common::api::Error;
use vrouter_common::api::HostStatus;
use vrouter_common::api::HypervisorType;
use vrouter_common::api::Placement;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::PodUuid;
use vrouter_common::typed_uuid::StoragePoolUuid;
use vrouter_manager::app::PlacementHints;
use vrouter_manager::app::RedundancyLevel;
use vrouter_manager::app::UpgradeParams;
use vrouter_manager::app::UpgradeScope;
use vrouter_manager::datastore::ApplianceStore;

fn hypervisors(appliances: &[ApplianceInstance]) -> Vec<Option<HypervisorType>> {
    appliances.iter().map(|a| a.hypervisor).collect()
}

/// Placements of a freshly deployed pair, the first started member first.
fn pair_placements(appliances: &[ApplianceInstance]) -> (Placement, Placement) {
    assert_eq!(appliances.len(), 2);
    let mut sorted = appliances.to_vec();
    sorted.sort_by_key(|a| std::cmp::Reverse(a.priority));
    let placement = |a: &ApplianceInstance| {
        a.placement.clone().expect("running router has a placement")
    };
    (placement(&sorted[0]), placement(&sorted[1]))
}

#[tokio::test]
async fn test_allocation_moves_to_next_hypervisor() {
    let cptestctx =
        RouterTestContext::new("test_allocation_moves_to_next_hypervisor");
    let compute = &cptestctx.fleet.compute;
    compute.fail_allocate(HypervisorType::Kvm, true);

    let appliances = cptestctx
        .ensure(cptestctx.network_id, RedundancyLevel::Redundant)
        .await;
    assert_eq!(
        hypervisors(&appliances),
        vec![Some(HypervisorType::XenServer); 2]
    );
    assert!(appliances.iter().all(|a| a.is_running()));
    assert_eq!(compute.allocate_calls(HypervisorType::Kvm), 2);
    assert_eq!(compute.allocate_calls(HypervisorType::XenServer), 2);

    // Records whose allocation failed are not part of the network.
    let listed = cptestctx
        .manager
        .datastore()
        .appliance_list_by_network(&cptestctx.opctx, cptestctx.network_id)
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);

    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_start_failure_moves_to_next_hypervisor() {
    let cptestctx =
        RouterTestContext::new("test_start_failure_moves_to_next_hypervisor");
    let compute = &cptestctx.fleet.compute;
    compute.fail_start(HypervisorType::Kvm, true);

    let appliances = cptestctx
        .ensure(cptestctx.network_id, RedundancyLevel::Redundant)
        .await;
    assert_eq!(
        hypervisors(&appliances),
        vec![Some(HypervisorType::XenServer); 2]
    );
    let mut priorities: Vec<_> = appliances.iter().map(|a| a.priority).collect();
    priorities.sort();
    assert_eq!(priorities, vec![99, 100]);
    // Each KVM router that failed to start was torn down.
    assert_eq!(compute.expunge_calls(), 2);

    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_no_capacity_anywhere() {
    let cptestctx = RouterTestContext::new("test_no_capacity_anywhere");
    let compute = &cptestctx.fleet.compute;
    compute.fail_allocate(HypervisorType::Kvm, true);
    compute.fail_allocate(HypervisorType::XenServer, true);

    let error = cptestctx
        .manager
        .appliances_ensure(
            &cptestctx.opctx,
            cptestctx.network_id,
            cptestctx.owner_id,
            RedundancyLevel::Redundant,
            PlacementHints::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(error, Error::InsufficientCapacity { .. });
    let listed = cptestctx
        .manager
        .datastore()
        .appliance_list_by_network(&cptestctx.opctx, cptestctx.network_id)
        .await
        .unwrap();
    assert!(listed.is_empty());

    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_hypervisor_preferences() {
    let cptestctx = RouterTestContext::new("test_hypervisor_preferences");
    let fleet = &cptestctx.fleet;

    // An explicit cluster wins.
    let cluster_id = fleet.add_cluster(HypervisorType::Vmware, 2, 4);
    fleet.set_template(HypervisorType::Vmware, common::RELEASE);
    let appliances = cptestctx
        .manager
        .appliances_ensure(
            &cptestctx.opctx,
            cptestctx.network_id,
            cptestctx.owner_id,
            RedundancyLevel::Redundant,
            PlacementHints { cluster_id: Some(cluster_id), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(hypervisors(&appliances), vec![Some(HypervisorType::Vmware); 2]);
    assert!(appliances
        .iter()
        .all(|a| a.placement.as_ref().unwrap().cluster_id == cluster_id));

    // Then the zone's default.
    fleet.set_default_hypervisor(Some(HypervisorType::XenServer));
    let other = fleet.add_network("guest-1", true);
    let appliances = cptestctx.ensure(other, RedundancyLevel::Redundant).await;
    assert_eq!(
        hypervisors(&appliances),
        vec![Some(HypervisorType::XenServer); 2]
    );

    // A default without a router template leaves nothing to deploy.
    fleet.set_default_hypervisor(Some(HypervisorType::Lxc));
    let third = fleet.add_network("guest-2", true);
    let error = cptestctx
        .manager
        .appliances_ensure(
            &cptestctx.opctx,
            third,
            cptestctx.owner_id,
            RedundancyLevel::Redundant,
            PlacementHints::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(error, Error::InsufficientCapacity { .. });

    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_redundancy_must_be_supported() {
    let cptestctx = RouterTestContext::new("test_redundancy_must_be_supported");
    let single = cptestctx.fleet.add_network("guest-1", false);
    let error = cptestctx
        .manager
        .appliances_ensure(
            &cptestctx.opctx,
            single,
            cptestctx.owner_id,
            RedundancyLevel::Redundant,
            PlacementHints::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(error, Error::InvalidRequest { .. });

    let appliances = cptestctx.ensure(single, RedundancyLevel::Single).await;
    assert_eq!(appliances.len(), 1);
    assert!(!appliances[0].is_redundant);
    assert_eq!(appliances[0].priority, 0);
    assert!(appliances[0].is_running());

    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_stopped_pair_gets_fresh_priorities() {
    let cptestctx =
        RouterTestContext::new("test_stopped_pair_gets_fresh_priorities");
    let manager = &cptestctx.manager;
    let opctx = &cptestctx.opctx;
    let (master, backup) = cptestctx.ensure_pair().await;

    // Lose the master for good, then stop the bumped survivor as well.
    manager.appliance_destroy(opctx, master.id).await.unwrap();
    let mut survivor = cptestctx.fetch(backup.id).await;
    survivor.priority_bumped = true;
    manager.datastore().appliance_update(opctx, &survivor).await.unwrap();
    manager.appliance_stop(opctx, backup.id, false).await.unwrap();

    let appliances = cptestctx
        .ensure(cptestctx.network_id, RedundancyLevel::Redundant)
        .await;
    assert_eq!(appliances.len(), 2);
    // The replacement is started first, so the old survivor ranks below it.
    let replacement = appliances.iter().find(|a| a.id != backup.id).unwrap();
    assert_eq!(replacement.priority, 100);
    let restarted = appliances.iter().find(|a| a.id == backup.id).unwrap();
    assert_eq!(restarted.priority, 99);
    assert!(!restarted.priority_bumped);
    assert!(restarted.is_running());

    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_third_redundant_router_refused() {
    let cptestctx = RouterTestContext::new("test_third_redundant_router_refused");
    let (master, _backup) = cptestctx.ensure_pair().await;

    let extra = ApplianceInstance::new(
        ApplianceUuid::new_v4(),
        ApplianceCreate {
            name: String::from("r-extra"),
            owner_id: cptestctx.owner_id,
            zone_id: master.zone_id,
            network_id: cptestctx.network_id,
            hypervisor: HypervisorType::Kvm,
            is_redundant: true,
            template_version: None,
        },
    );
    let extra = cptestctx
        .manager
        .datastore()
        .appliance_create(&cptestctx.opctx, extra)
        .await
        .unwrap();
    let error = cptestctx
        .manager
        .appliance_start(&cptestctx.opctx, extra.id)
        .await
        .unwrap_err();
    assert_matches!(error, Error::ResourceUnavailable { .. });
    assert_eq!(cptestctx.fetch(extra.id).await.state, ApplianceState::Stopped);

    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_start_timeout() {
    let cptestctx = RouterTestContext::new("test_start_timeout");
    cptestctx.fleet.compute.time_out_starts(true);

    let error = cptestctx
        .manager
        .appliances_ensure(
            &cptestctx.opctx,
            cptestctx.network_id,
            cptestctx.owner_id,
            RedundancyLevel::Redundant,
            PlacementHints::default(),
        )
        .await
        .unwrap_err();
    assert_matches!(error, Error::ResourceUnavailable { .. });

    // The record survives, stopped, and a later ensure starts it.
    let listed = cptestctx
        .manager
        .datastore()
        .appliance_list_by_network(&cptestctx.opctx, cptestctx.network_id)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].state, ApplianceState::Stopped);

    cptestctx.fleet.compute.time_out_starts(false);
    let appliances = cptestctx
        .ensure(cptestctx.network_id, RedundancyLevel::Redundant)
        .await;
    assert_eq!(appliances.len(), 2);
    assert!(appliances.iter().any(|a| a.id == listed[0].id));
    assert!(appliances.iter().all(|a| a.is_running()));

    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_reboot() {
    let cptestctx = RouterTestContext::new("test_reboot");
    let manager = &cptestctx.manager;
    let opctx = &cptestctx.opctx;
    let (master, backup) = cptestctx.ensure_pair().await;

    // A failed stop fails the reboot and leaves the router running.
    cptestctx.fleet.compute.fail_stop(backup.id, true);
    let error = manager.appliance_reboot(opctx, backup.id).await.unwrap_err();
    assert_matches!(error, Error::ResourceUnavailable { .. });
    assert_eq!(cptestctx.fetch(backup.id).await.state, ApplianceState::Running);
    assert!(cptestctx.fleet.vm_running(backup.id));

    cptestctx.fleet.compute.fail_stop(backup.id, false);
    let rebooted = manager.appliance_reboot(opctx, backup.id).await.unwrap();
    assert!(rebooted.is_running());
    assert_eq!(rebooted.priority, 99);
    assert_ne!(
        RouterTestContext::host_of(&rebooted),
        RouterTestContext::host_of(&master)
    );

    manager.appliance_stop(opctx, backup.id, false).await.unwrap();
    let error = manager.appliance_reboot(opctx, backup.id).await.unwrap_err();
    assert_matches!(error, Error::ResourceUnavailable { .. });

    manager.appliance_destroy(opctx, backup.id).await.unwrap();
    let error = manager.appliance_stop(opctx, backup.id, false).await.unwrap_err();
    assert_matches!(error, Error::InvalidRequest { .. });

    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_upgrade_by_scope() {
    let cptestctx = RouterTestContext::new("test_upgrade_by_scope");
    let manager = &cptestctx.manager;
    let opctx = &cptestctx.opctx;
    let fleet = &cptestctx.fleet;
    fleet.set_template(HypervisorType::Kvm, common::OLD_RELEASE);
    fleet.set_template(HypervisorType::XenServer, common::OLD_RELEASE);
    let (master, backup) = cptestctx.ensure_pair().await;

    // Current routers are skipped.
    fleet.set_template(HypervisorType::Kvm, common::RELEASE);
    fleet.set_template(HypervisorType::XenServer, common::RELEASE);
    let scope = UpgradeScope::try_from(UpgradeParams {
        instance_id: Some(master.id),
        ..Default::default()
    })
    .unwrap();
    let results = manager.appliances_upgrade(opctx, scope).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].instance_id, master.id);
    assert!(results[0].result.is_ok());
    assert_eq!(
        cptestctx.fetch(master.id).await.template_version.as_deref(),
        Some(common::RELEASE)
    );

    let results = manager
        .appliances_upgrade(opctx, UpgradeScope::Owner(cptestctx.owner_id))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].instance_id, backup.id);
    assert!(results[0].result.is_ok());

    let results = manager
        .appliances_upgrade(opctx, UpgradeScope::Zone(fleet.zone_id()))
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(fleet.compute.stop_calls(master.id), 1);
    assert_eq!(fleet.compute.stop_calls(backup.id), 1);

    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_pair_spans_pods() {
    let cptestctx =
        RouterTestContext::with_topology("test_pair_spans_pods", |fleet| {
            fleet.add_cluster(HypervisorType::Kvm, 2, 4);
            fleet.add_cluster(HypervisorType::Kvm, 2, 4);
        });
    let appliances = cptestctx
        .ensure(cptestctx.network_id, RedundancyLevel::Redundant)
        .await;
    let (first, second) = pair_placements(&appliances);
    assert_ne!(first.pod_id, second.pod_id);
    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_pair_spans_clusters_of_one_pod() {
    let pod_id = PodUuid::new_v4();
    let cptestctx = RouterTestContext::with_topology(
        "test_pair_spans_clusters_of_one_pod",
        |fleet| {
            fleet.add_cluster_to_pod(pod_id, HypervisorType::Kvm, 1, 4);
            fleet.add_cluster_to_pod(pod_id, HypervisorType::Kvm, 1, 4);
        },
    );
    let appliances = cptestctx
        .ensure(cptestctx.network_id, RedundancyLevel::Redundant)
        .await;
    let (first, second) = pair_placements(&appliances);
    assert_eq!(first.pod_id, pod_id);
    assert_eq!(second.pod_id, pod_id);
    assert_ne!(first.cluster_id, second.cluster_id);
    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_pair_spans_hosts_when_other_pods_are_full() {
    let cptestctx = RouterTestContext::with_topology(
        "test_pair_spans_hosts_when_other_pods_are_full",
        |fleet| {
            fleet.add_cluster(HypervisorType::Kvm, 2, 4);
            // No room at all in the second pod.
            fleet.add_cluster(HypervisorType::Kvm, 1, 0);
        },
    );
    let appliances = cptestctx
        .ensure(cptestctx.network_id, RedundancyLevel::Redundant)
        .await;
    let (first, second) = pair_placements(&appliances);
    assert_eq!(first.cluster_id, second.cluster_id);
    assert_ne!(first.host_id, second.host_id);
    assert_ne!(first.storage_pool_id, second.storage_pool_id);
    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_pair_may_share_storage_pool() {
    let cptestctx = RouterTestContext::with_topology(
        "test_pair_may_share_storage_pool",
        |fleet| {
            fleet.add_cluster(HypervisorType::Kvm, 2, 4);
            let pool = StoragePoolUuid::new_v4();
            for host in fleet.hosts() {
                fleet.set_host_storage_pool(host.id, pool);
            }
        },
    );
    let appliances = cptestctx
        .ensure(cptestctx.network_id, RedundancyLevel::Redundant)
        .await;
    let (first, second) = pair_placements(&appliances);
    assert_ne!(first.host_id, second.host_id);
    assert_eq!(first.storage_pool_id, second.storage_pool_id);
    assert_eq!(
        first.storage_pool_id,
        cptestctx.fleet.host_storage_pool(first.host_id)
    );
    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_pair_may_share_host() {
    let cptestctx =
        RouterTestContext::with_topology("test_pair_may_share_host", |fleet| {
            fleet.add_cluster(HypervisorType::Kvm, 1, 2);
        });
    let appliances = cptestctx
        .ensure(cptestctx.network_id, RedundancyLevel::Redundant)
        .await;
    let (first, second) = pair_placements(&appliances);
    assert_eq!(first.host_id, second.host_id);
    assert!(appliances.iter().all(|a| a.is_running()));
    cptestctx.cleanup_successful();
}

#[tokio::test]
async fn test_ensure_leaves_out_routers_on_down_hosts() {
    let cptestctx =
        RouterTestContext::new("test_ensure_leaves_out_routers_on_down_hosts");
    let manager = &cptestctx.manager;
    let (master, backup) = cptestctx.ensure_pair().await;
    manager.appliance_stop(&cptestctx.opctx, backup.id, false).await.unwrap();
    cptestctx.fleet.set_host_status(
        RouterTestContext::host_of(&backup),
        HostStatus::Disconnected,
    );

    let appliances = cptestctx
        .ensure(cptestctx.network_id, RedundancyLevel::Redundant)
        .await;
    assert_eq!(
        appliances.iter().map(|a| a.id).collect::<Vec<_>>(),
        vec![master.id]
    );
    assert_eq!(cptestctx.fetch(backup.id).await.state, ApplianceState::Stopped);
    assert!(!cptestctx.fleet.vm_running(backup.id));
    cptestctx.cleanup_successful();
}
