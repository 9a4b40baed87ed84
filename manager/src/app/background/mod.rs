// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic work done by the router manager
//!
//! A background task is anything that needs to happen on its own schedule
//! rather than in response to a request.  Each one implements
//! [`BackgroundTask`] and is registered with the [`Driver`], which runs it
//! in its own tokio task, activates it when its period elapses or when
//! someone asks for it explicitly, and keeps a [`TaskStatus`] describing the
//! last activation.
//!
//! Activations of one task never overlap.  Several requests to activate a
//! task that arrive while it is running collapse into one more activation.
//!
//! The redundant state reconciler is split in two: a scanner task that
//! enqueues every redundant network on a bounded queue, and a fixed pool of
//! workers (not driver tasks) that drain it.  See [`redundant_status`].

mod driver;
mod init;
pub mod redundant_status;
mod status;

pub use driver::Driver;
pub use init::BackgroundTasks;
pub use status::ActivationReason;
pub use status::CurrentStatus;
pub use status::CurrentStatusRunning;
pub use status::LastResult;
pub use status::LastResultCompleted;
pub use status::TaskStatus;

use crate::context::OpContext;
use futures::future::BoxFuture;

/// An operation activated periodically or on demand
pub trait BackgroundTask: Send + Sync {
    /// Do one pass of the task's work.  The returned value is kept as the
    /// details of the last completed activation.
    fn activate<'a>(
        &'a mut self,
        opctx: &'a OpContext,
    ) -> BoxFuture<'a, serde_json::Value>;
}

/// Name of a registered background task
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct TaskName(String);

impl TaskName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
