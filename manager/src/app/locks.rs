// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-network allocation tokens

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::OwnedMutexGuard;
use vrouter_common::api::Error;
use vrouter_common::typed_uuid::NetworkUuid;

/// Serializes deployment decisions per guest network
///
/// Waiting is bounded: a caller that cannot get the token within the
/// configured timeout gets [`Error::ConcurrentOperation`] and is expected to
/// retry later.
pub struct NetworkLocks {
    timeout: Duration,
    locks: Mutex<BTreeMap<NetworkUuid, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of a deployment decision
#[derive(Debug)]
pub struct NetworkLockGuard {
    network_id: NetworkUuid,
    _guard: OwnedMutexGuard<()>,
}

impl NetworkLockGuard {
    pub fn network_id(&self) -> NetworkUuid {
        self.network_id
    }
}

impl NetworkLocks {
    pub fn new(timeout: Duration) -> NetworkLocks {
        NetworkLocks { timeout, locks: Mutex::new(BTreeMap::new()) }
    }

    pub async fn acquire(
        &self,
        network_id: NetworkUuid,
    ) -> Result<NetworkLockGuard, Error> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            Arc::clone(locks.entry(network_id).or_default())
        };
        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(NetworkLockGuard { network_id, _guard: guard }),
            Err(_) => Err(Error::concurrent_operation(&format!(
                "unable to lock network {} within {:?}",
                network_id, self.timeout
            ))),
        }
    }
}
