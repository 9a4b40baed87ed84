// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manages execution of background tasks

use super::status::ActivationReason;
use super::status::CurrentStatus;
use super::status::CurrentStatusRunning;
use super::status::LastResult;
use super::status::LastResultCompleted;
use super::status::TaskStatus;
use super::BackgroundTask;
use super::TaskName;
use crate::context::OpContext;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

/// Drives the execution of background tasks
///
/// The manager has one Driver.  Each registered task runs in a separate
/// tokio task; the Driver keeps the handles needed to wake it up and read
/// its status.
pub struct Driver {
    tasks: BTreeMap<TaskName, Task>,
}

/// Driver-side state of a background task
struct Task {
    /// what this task does (for developers)
    description: String,
    /// configured period of the task
    period: Duration,
    /// channel used to receive updates from the background task's tokio task
    /// about what the background task is doing
    status: watch::Receiver<TaskStatus>,
    /// join handle for the tokio task that's executing this background task
    tokio_task: tokio::task::JoinHandle<()>,
    /// used to wake up the tokio task when a caller explicitly wants to
    /// activate the background task
    notify: Arc<Notify>,
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl Driver {
    pub fn new() -> Driver {
        Driver { tasks: BTreeMap::new() }
    }

    /// Register a new background task
    ///
    /// The task is activated once right away and then every `period`, and
    /// may be activated at any time with [`Driver::activate()`].  `opctx` is
    /// passed to every activation, annotated with the task's name.
    ///
    /// Panics if `name` is already registered.
    pub fn register(
        &mut self,
        name: String,
        description: String,
        period: Duration,
        imp: Box<dyn BackgroundTask>,
        opctx: OpContext,
    ) -> TaskName {
        let (status_tx, status_rx) = watch::channel(TaskStatus {
            current: CurrentStatus::Idle,
            last: LastResult::NeverCompleted,
        });
        let notify = Arc::new(Notify::new());

        let opctx = opctx.child(BTreeMap::from([(
            "background_task".to_string(),
            name.clone(),
        )]));
        let task_exec =
            TaskExec::new(period, imp, Arc::clone(&notify), opctx, status_tx);
        let tokio_task = tokio::task::spawn(task_exec.run());

        let task =
            Task { description, period, status: status_rx, tokio_task, notify };
        let task_name = TaskName(name.clone());
        if self.tasks.insert(task_name.clone(), task).is_some() {
            panic!("started two background tasks called {:?}", name);
        }
        task_name
    }

    /// Enumerate all registered background tasks
    pub fn tasks(&self) -> impl Iterator<Item = &TaskName> {
        self.tasks.keys()
    }

    fn task_required(&self, task: &TaskName) -> &Task {
        self.tasks.get(task).unwrap_or_else(|| {
            panic!("attempted to get non-existent background task: {:?}", task)
        })
    }

    /// Returns a summary of what this task does (for developers)
    pub fn task_description(&self, task: &TaskName) -> &str {
        &self.task_required(task).description
    }

    /// Returns the configured period of the task
    pub fn task_period(&self, task: &TaskName) -> Duration {
        self.task_required(task).period
    }

    /// Activate the specified background task
    ///
    /// If the task is currently running, it will be activated again when it
    /// finishes.
    pub fn activate(&self, task: &TaskName) {
        self.task_required(task).notify.notify_one();
    }

    /// Returns the runtime status of the background task
    pub fn task_status(&self, task: &TaskName) -> TaskStatus {
        // Borrowing from a watch channel's receiver blocks the sender.  Clone
        // the status so that a caller can't hang on to the borrow.
        self.task_required(task).status.borrow().clone()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        for (_, t) in &self.tasks {
            t.tokio_task.abort();
        }
    }
}

/// State needed by the tokio task that activates one background task
struct TaskExec {
    period: Duration,
    imp: Box<dyn BackgroundTask>,
    notify: Arc<Notify>,
    opctx: OpContext,
    status_tx: watch::Sender<TaskStatus>,
    /// counts iterations of the task, for debuggability
    iteration: u64,
}

impl TaskExec {
    fn new(
        period: Duration,
        imp: Box<dyn BackgroundTask>,
        notify: Arc<Notify>,
        opctx: OpContext,
        status_tx: watch::Sender<TaskStatus>,
    ) -> TaskExec {
        TaskExec { period, imp, notify, opctx, status_tx, iteration: 0 }
    }

    async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.activate(ActivationReason::Timeout).await;
                },

                _ = self.notify.notified() => {
                    self.activate(ActivationReason::Signaled).await;
                }
            }
        }
    }

    async fn activate(&mut self, reason: ActivationReason) {
        self.iteration += 1;
        let iteration = self.iteration;
        let start_time = Utc::now();
        let start_instant = Instant::now();

        debug!(
            &self.opctx.log,
            "activating";
            "reason" => ?reason,
            "iteration" => iteration
        );

        self.status_tx.send_modify(|status| {
            assert!(status.current.is_idle());
            status.current = CurrentStatus::Running(CurrentStatusRunning {
                start_time,
                start_instant,
                reason,
                iteration,
            });
        });

        let details = self.imp.activate(&self.opctx).await;

        let elapsed = start_instant.elapsed();

        self.status_tx.send_modify(|status| {
            let current = status.current.unwrap_running();
            assert_eq!(current.iteration, iteration);
            *status = TaskStatus {
                current: CurrentStatus::Idle,
                last: LastResult::Completed(LastResultCompleted {
                    iteration,
                    start_time,
                    reason,
                    elapsed,
                    details,
                }),
            };
        });

        debug!(
            &self.opctx.log,
            "activation complete";
            "elapsed" => ?elapsed,
            "iteration" => iteration,
        );
    }
}
