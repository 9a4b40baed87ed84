// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared state used by operations that act on behalf of an operator or a
//! background task

use chrono::DateTime;
use chrono::Utc;
use slog::Logger;
use std::collections::BTreeMap;
use std::time::Instant;

/// Who an operation is being done for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// Request made by an operator or another control plane component
    ExternalRequest,
    /// Periodic work started by the manager itself
    Background,
    /// Unit or integration test
    Test,
}

/// Context carried through every operation: a logger annotated with the
/// operation's metadata, plus when and why the operation started.
#[derive(Clone)]
pub struct OpContext {
    pub log: Logger,
    pub kind: OpKind,
    created_instant: Instant,
    created_walltime: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
}

impl OpContext {
    fn new(log: Logger, kind: OpKind) -> OpContext {
        OpContext {
            log,
            kind,
            created_instant: Instant::now(),
            created_walltime: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn for_external_request(log: Logger) -> OpContext {
        OpContext::new(log, OpKind::ExternalRequest)
    }

    pub fn for_background(log: Logger) -> OpContext {
        OpContext::new(log, OpKind::Background)
    }

    pub fn for_tests(log: Logger) -> OpContext {
        OpContext::new(log, OpKind::Test)
    }

    /// Returns a context for a sub-operation: same kind, the parent's
    /// metadata plus `new_metadata`, each of which is also attached to the
    /// child's logger.
    pub fn child(&self, new_metadata: BTreeMap<String, String>) -> OpContext {
        let mut metadata = self.metadata.clone();
        let mut log = self.log.clone();
        for (k, v) in new_metadata {
            metadata.insert(k.clone(), v.clone());
            log = log.new(o!(k => v));
        }

        OpContext {
            log,
            kind: self.kind,
            created_instant: Instant::now(),
            created_walltime: Utc::now(),
            metadata,
        }
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn created_walltime(&self) -> DateTime<Utc> {
        self.created_walltime
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.created_instant.elapsed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vrouter_test_utils::dev::test_setup_log;

    #[test]
    fn test_child_metadata() {
        let logctx = test_setup_log("test_child_metadata");
        let opctx = OpContext::for_tests(logctx.log.clone());
        let child = opctx.child(BTreeMap::from([(
            String::from("network_id"),
            String::from("n1"),
        )]));
        let grandchild = child.child(BTreeMap::from([(
            String::from("instance_id"),
            String::from("r1"),
        )]));

        assert!(opctx.metadata().is_empty());
        assert_eq!(child.metadata().len(), 1);
        assert_eq!(
            grandchild.metadata().get("network_id").map(String::as_str),
            Some("n1")
        );
        assert_eq!(grandchild.kind, OpKind::Test);
        logctx.cleanup_successful();
    }
}
