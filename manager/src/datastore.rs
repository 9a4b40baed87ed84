// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistence of appliance records
//!
//! The manager never holds appliance records across operations: every
//! decision starts from a fresh read and ends with a write.  Writes are
//! last-writer-wins.

use crate::context::OpContext;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use vrouter_common::api::ApplianceInstance;
use vrouter_common::api::ApplianceState;
use vrouter_common::api::CreateResult;
use vrouter_common::api::Error;
use vrouter_common::api::ListResultVec;
use vrouter_common::api::RedundantState;
use vrouter_common::api::LookupResult;
use vrouter_common::api::ResourceType;
use vrouter_common::api::UpdateResult;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::HostUuid;
use vrouter_common::typed_uuid::NetworkUuid;

#[async_trait]
pub trait ApplianceStore: Send + Sync {
    async fn appliance_create(
        &self,
        opctx: &OpContext,
        appliance: ApplianceInstance,
    ) -> CreateResult<ApplianceInstance>;

    async fn appliance_fetch(
        &self,
        opctx: &OpContext,
        id: ApplianceUuid,
    ) -> LookupResult<ApplianceInstance>;

    async fn appliance_update(
        &self,
        opctx: &OpContext,
        appliance: &ApplianceInstance,
    ) -> UpdateResult<()>;

    /// Records what a status poll found.  No other field is written, so a
    /// concurrent start or stop is never undone.
    async fn appliance_update_redundant_state(
        &self,
        opctx: &OpContext,
        id: ApplianceUuid,
        redundant_state: RedundantState,
        priority_bumped: bool,
    ) -> UpdateResult<()>;

    /// Sets the priority the appliance advertises the next time it starts.
    async fn appliance_update_priority(
        &self,
        opctx: &OpContext,
        id: ApplianceUuid,
        priority: u32,
        priority_bumped: bool,
    ) -> UpdateResult<()>;

    async fn appliance_set_stop_pending(
        &self,
        opctx: &OpContext,
        id: ApplianceUuid,
        stop_pending: bool,
    ) -> UpdateResult<()>;

    /// Appliances serving `network_id` that are not `Destroyed`, ordered by
    /// id.
    async fn appliance_list_by_network(
        &self,
        opctx: &OpContext,
        network_id: NetworkUuid,
    ) -> ListResultVec<ApplianceInstance>;

    /// Appliances placed on `host_id` that are not `Destroyed`, ordered by id.
    async fn appliance_list_by_host(
        &self,
        opctx: &OpContext,
        host_id: HostUuid,
    ) -> ListResultVec<ApplianceInstance>;

    /// Every appliance that is not `Destroyed`, ordered by id.
    async fn appliance_list_all(
        &self,
        opctx: &OpContext,
    ) -> ListResultVec<ApplianceInstance>;
}

/// [`ApplianceStore`] kept in process memory
#[derive(Default)]
pub struct InMemoryDataStore {
    appliances: Mutex<BTreeMap<ApplianceUuid, ApplianceInstance>>,
}

impl InMemoryDataStore {
    pub fn new() -> InMemoryDataStore {
        InMemoryDataStore::default()
    }

    fn list_where<F>(&self, filter: F) -> Vec<ApplianceInstance>
    where
        F: Fn(&ApplianceInstance) -> bool,
    {
        self.appliances
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.state != ApplianceState::Destroyed)
            .filter(|a| filter(a))
            .cloned()
            .collect()
    }

    fn modify<F>(&self, id: ApplianceUuid, f: F) -> UpdateResult<()>
    where
        F: FnOnce(&mut ApplianceInstance),
    {
        match self.appliances.lock().unwrap().get_mut(&id) {
            Some(stored) => {
                f(stored);
                Ok(())
            }
            None => Err(Error::not_found_by_id(
                ResourceType::Appliance,
                id.as_untyped_uuid(),
            )),
        }
    }
}

#[async_trait]
impl ApplianceStore for InMemoryDataStore {
    async fn appliance_create(
        &self,
        opctx: &OpContext,
        appliance: ApplianceInstance,
    ) -> CreateResult<ApplianceInstance> {
        let mut appliances = self.appliances.lock().unwrap();
        if appliances.contains_key(&appliance.id) {
            return Err(Error::internal_error(&format!(
                "appliance {} already exists",
                appliance.id
            )));
        }
        debug!(opctx.log, "created appliance record";
            "instance_id" => %appliance.id,
            "name" => &appliance.name,
        );
        appliances.insert(appliance.id, appliance.clone());
        Ok(appliance)
    }

    async fn appliance_fetch(
        &self,
        _opctx: &OpContext,
        id: ApplianceUuid,
    ) -> LookupResult<ApplianceInstance> {
        self.appliances.lock().unwrap().get(&id).cloned().ok_or_else(|| {
            Error::not_found_by_id(ResourceType::Appliance, id.as_untyped_uuid())
        })
    }

    async fn appliance_update(
        &self,
        _opctx: &OpContext,
        appliance: &ApplianceInstance,
    ) -> UpdateResult<()> {
        self.modify(appliance.id, |stored| *stored = appliance.clone())
    }

    async fn appliance_update_redundant_state(
        &self,
        _opctx: &OpContext,
        id: ApplianceUuid,
        redundant_state: RedundantState,
        priority_bumped: bool,
    ) -> UpdateResult<()> {
        self.modify(id, |stored| {
            stored.redundant_state = redundant_state;
            stored.priority_bumped = priority_bumped;
        })
    }

    async fn appliance_update_priority(
        &self,
        _opctx: &OpContext,
        id: ApplianceUuid,
        priority: u32,
        priority_bumped: bool,
    ) -> UpdateResult<()> {
        self.modify(id, |stored| {
            stored.priority = priority;
            stored.priority_bumped = priority_bumped;
        })
    }

    async fn appliance_set_stop_pending(
        &self,
        _opctx: &OpContext,
        id: ApplianceUuid,
        stop_pending: bool,
    ) -> UpdateResult<()> {
        self.modify(id, |stored| stored.stop_pending = stop_pending)
    }

    async fn appliance_list_by_network(
        &self,
        _opctx: &OpContext,
        network_id: NetworkUuid,
    ) -> ListResultVec<ApplianceInstance> {
        Ok(self.list_where(|a| a.network_ids.contains(&network_id)))
    }

    async fn appliance_list_by_host(
        &self,
        _opctx: &OpContext,
        host_id: HostUuid,
    ) -> ListResultVec<ApplianceInstance> {
        Ok(self.list_where(|a| a.host_id() == Some(host_id)))
    }

    async fn appliance_list_all(
        &self,
        _opctx: &OpContext,
    ) -> ListResultVec<ApplianceInstance> {
        Ok(self.list_where(|_| true))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use vrouter_common::api::ApplianceCreate;
    use vrouter_common::api::HypervisorType;
    use vrouter_common::typed_uuid::OwnerUuid;
    use vrouter_common::typed_uuid::ZoneUuid;
    use vrouter_test_utils::dev::test_setup_log;

    fn appliance(network_id: NetworkUuid) -> ApplianceInstance {
        ApplianceInstance::new(
            ApplianceUuid::new_v4(),
            ApplianceCreate {
                name: String::from("r-test"),
                owner_id: OwnerUuid::new_v4(),
                zone_id: ZoneUuid::new_v4(),
                network_id,
                hypervisor: HypervisorType::Simulator,
                is_redundant: true,
                template_version: None,
            },
        )
    }

    #[tokio::test]
    async fn test_list_skips_destroyed() {
        let logctx = test_setup_log("test_list_skips_destroyed");
        let opctx = OpContext::for_tests(logctx.log.clone());
        let store = InMemoryDataStore::new();
        let network_id = NetworkUuid::new_v4();

        let a = store.appliance_create(&opctx, appliance(network_id)).await.unwrap();
        let mut b =
            store.appliance_create(&opctx, appliance(network_id)).await.unwrap();
        store
            .appliance_create(&opctx, appliance(NetworkUuid::new_v4()))
            .await
            .unwrap();

        let listed =
            store.appliance_list_by_network(&opctx, network_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].id < listed[1].id);

        b.set_state(ApplianceState::Destroyed);
        store.appliance_update(&opctx, &b).await.unwrap();
        let listed =
            store.appliance_list_by_network(&opctx, network_id).await.unwrap();
        assert_eq!(listed.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a.id]);
        assert_eq!(store.appliance_list_all(&opctx).await.unwrap().len(), 2);

        // Destroyed records can still be fetched directly.
        let fetched = store.appliance_fetch(&opctx, b.id).await.unwrap();
        assert_eq!(fetched.state, ApplianceState::Destroyed);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_missing_records() {
        let logctx = test_setup_log("test_missing_records");
        let opctx = OpContext::for_tests(logctx.log.clone());
        let store = InMemoryDataStore::new();
        let a = appliance(NetworkUuid::new_v4());

        assert_matches!(
            store.appliance_fetch(&opctx, a.id).await,
            Err(Error::ObjectNotFound { type_name: ResourceType::Appliance, .. })
        );
        assert_matches!(
            store.appliance_update(&opctx, &a).await,
            Err(Error::ObjectNotFound { .. })
        );
        assert_matches!(
            store
                .appliance_update_redundant_state(
                    &opctx,
                    a.id,
                    RedundantState::Master,
                    false
                )
                .await,
            Err(Error::ObjectNotFound { .. })
        );
        store.appliance_create(&opctx, a.clone()).await.unwrap();
        assert_matches!(
            store.appliance_create(&opctx, a).await,
            Err(Error::InternalError { .. })
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_field_updates_leave_the_rest_alone() {
        let logctx = test_setup_log("test_field_updates_leave_the_rest_alone");
        let opctx = OpContext::for_tests(logctx.log.clone());
        let store = InMemoryDataStore::new();
        let stale = store
            .appliance_create(&opctx, appliance(NetworkUuid::new_v4()))
            .await
            .unwrap();

        let mut stopped = stale.clone();
        stopped.set_state(ApplianceState::Stopped);
        store.appliance_update(&opctx, &stopped).await.unwrap();

        store
            .appliance_update_redundant_state(
                &opctx,
                stale.id,
                RedundantState::Backup,
                true,
            )
            .await
            .unwrap();
        store
            .appliance_update_priority(&opctx, stale.id, 99, false)
            .await
            .unwrap();
        store
            .appliance_set_stop_pending(&opctx, stale.id, true)
            .await
            .unwrap();

        let fetched = store.appliance_fetch(&opctx, stale.id).await.unwrap();
        assert_eq!(fetched.state, ApplianceState::Stopped);
        assert_eq!(fetched.redundant_state, RedundantState::Backup);
        assert_eq!(fetched.priority, 99);
        assert!(!fetched.priority_bumped);
        assert!(fetched.stop_pending);
        logctx.cleanup_successful();
    }
}
