// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and working with a router
//! manager configuration

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationSeconds;
use std::time::Duration;
use thiserror::Error;
use vrouter_common::api::HypervisorType;
use vrouter_common::typed_uuid::NodeUuid;
use vrouter_common::version::ApplianceVersion;

/// Configuration for a router manager
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Server-wide logging configuration.
    pub log: ConfigLogging,
    /// Identity of this management node.
    pub node: NodeConfig,
    /// Periodic redundant-state reconciliation.
    pub reconciler: ReconcilerConfig,
    /// Deployment retry limits and locking.
    pub deployment: DeploymentConfig,
    /// Redundant priority protocol constants.
    #[serde(default)]
    pub priority: PriorityConfig,
    /// Host agent command settings.
    pub agent: AgentConfig,
    /// Simulated fleet to run against, when no real backends are wired up.
    #[serde(default)]
    pub sim: Option<SimConfig>,
}

impl Config {
    /// Load a `Config` from the given TOML file
    ///
    /// The file is validated after parsing; a config that parses but makes
    /// no sense (a zero-sized worker pool, inverted priority bounds, ...) is
    /// rejected here rather than at first use.
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        config_parsed.validate().map_err(|reasons| LoadError::Invalid {
            path: path.into(),
            reasons: reasons.join("; "),
        })?;
        Ok(config_parsed)
    }

    fn validate(&self) -> Result<(), Vec<String>> {
        let mut reasons = Vec::new();
        if self.reconciler.period_secs.is_zero() {
            reasons.push(String::from("reconciler.period_secs must be > 0"));
        }
        if self.reconciler.worker_pool_size == 0 {
            reasons.push(String::from("reconciler.worker_pool_size must be > 0"));
        }
        if self.reconciler.queue_capacity_multiplier == 0 {
            reasons.push(String::from(
                "reconciler.queue_capacity_multiplier must be > 0",
            ));
        }
        if self.deployment.allocation_retries == 0
            || self.deployment.start_retries == 0
        {
            reasons.push(String::from("deployment retry counts must be > 0"));
        }
        let p = &self.priority;
        if p.delta == 0 {
            reasons.push(String::from("priority.delta must be > 0"));
        }
        if p.lower_bound >= p.upper_bound {
            reasons.push(format!(
                "priority.lower_bound ({}) must be below upper_bound ({})",
                p.lower_bound, p.upper_bound
            ));
        }
        if p.default < p.lower_bound || p.default > p.upper_bound {
            reasons.push(format!(
                "priority.default ({}) must lie within [{}, {}]",
                p.default, p.lower_bound, p.upper_bound
            ));
        }
        if p.upper_bound + p.delta > 255 {
            reasons.push(String::from(
                "priority.upper_bound + priority.delta must not exceed 255",
            ));
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(reasons)
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NodeConfig {
    /// Hosts whose agents are attached to this node are reconciled by it.
    pub id: NodeUuid,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ReconcilerConfig {
    /// period (in seconds) between scans of the redundant networks
    #[serde_as(as = "DurationSeconds<u64>")]
    pub period_secs: Duration,
    /// number of workers draining the status-update queue
    pub worker_pool_size: usize,
    /// queue capacity is `worker_pool_size * queue_capacity_multiplier`
    pub queue_capacity_multiplier: usize,
}

impl ReconcilerConfig {
    pub fn queue_capacity(&self) -> usize {
        self.worker_pool_size * self.queue_capacity_multiplier
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DeploymentConfig {
    pub allocation_retries: u32,
    pub start_retries: u32,
    /// how long (in seconds) to wait for a network's allocation token
    #[serde_as(as = "DurationSeconds<u64>")]
    pub network_lock_timeout_secs: Duration,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// priority of the first member of a pair
    pub default: u32,
    /// gap between master and backup, and the size of a bump
    pub delta: u32,
    pub lower_bound: u32,
    pub upper_bound: u32,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        PriorityConfig { default: 100, delta: 2, lower_bound: 20, upper_bound: 200 }
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AgentConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub command_timeout_secs: Duration,
    /// oldest appliance release that may receive commands
    pub minimum_version: ApplianceVersion,
    /// when false, every appliance passes the version gate
    pub version_check_enabled: bool,
}

/// Shape of the simulated fleet: one zone, one pod per cluster.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SimConfig {
    /// version string reported by every router template
    pub template_version: String,
    pub clusters: Vec<SimClusterConfig>,
    /// number of redundant guest networks to create and deploy
    pub redundant_networks: usize,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SimClusterConfig {
    pub hypervisor: HypervisorType,
    pub hosts: usize,
    /// appliances each host can run
    pub host_capacity: usize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("invalid configuration in \"{path}\": {reasons}")]
    Invalid { path: Utf8PathBuf, reasons: String },
}
