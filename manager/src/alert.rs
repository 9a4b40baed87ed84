// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator alerts

use serde::Serialize;
use slog::Logger;
use vrouter_common::typed_uuid::ApplianceUuid;
use vrouter_common::typed_uuid::NetworkUuid;
use vrouter_common::typed_uuid::ZoneUuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// An appliance became master.
    BecameMaster,
    /// Both members of a pair claim to be master.
    DuplicateMaster,
    /// A pair's priorities are inconsistent; the backup is being rebooted.
    SanityRecovery,
    /// Only one member of a pair can be reached.
    SingleSurvivor,
    /// The surviving member was already bumped and cannot take over again.
    AlreadyBumped,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub zone_id: ZoneUuid,
    pub network_id: Option<NetworkUuid>,
    pub instance_id: ApplianceUuid,
    pub subject: String,
}

/// Destination for alerts an operator has to look at
pub trait AlertSink: Send + Sync {
    fn send_alert(&self, alert: Alert);
}

/// Writes alerts to the log
pub struct LogAlertSink {
    log: Logger,
}

impl LogAlertSink {
    pub fn new(log: &Logger) -> LogAlertSink {
        LogAlertSink { log: log.new(o!("component" => "AlertSink")) }
    }
}

impl AlertSink for LogAlertSink {
    fn send_alert(&self, alert: Alert) {
        warn!(self.log, "{}", alert.subject;
            "kind" => ?alert.kind,
            "zone_id" => %alert.zone_id,
            "network_id" => ?alert.network_id,
            "instance_id" => %alert.instance_id,
        );
    }
}
