//! Cancellable timers on top of the tokio runtime.
//!
//! Every periodic or delayed callback the panel runs is owned through a
//! [`TaskHandle`]; dropping or cancelling the handle aborts the task, so a
//! single owner decides which timers are alive.

use std::{future::Future, time::Duration};

use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::debug;

const MIN_PERIOD: Duration = Duration::from_millis(1);

pub struct TaskHandle {
    label: &'static str,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            debug!(task = self.label, "cancelling scheduled task");
        }
        self.handle.abort();
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("label", &self.label)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

#[derive(Clone)]
pub struct Scheduler {
    runtime: Handle,
}

impl Scheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Runs `future` to completion with nobody waiting on it.
    pub fn detach<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }

    /// Runs `job` once after `delay`.
    pub fn after<F>(&self, label: &'static str, delay: Duration, job: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.runtime.spawn(async move {
            time::sleep(delay).await;
            job();
        });
        TaskHandle { label, handle }
    }

    /// Runs `job` immediately and then every `period` until cancelled or
    /// until `job` returns false.
    ///
    /// Ticks that fall behind are delayed rather than bunched up.
    pub fn every<F>(&self, label: &'static str, period: Duration, mut job: F) -> TaskHandle
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let handle = self.runtime.spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !job() {
                    debug!(task = label, "periodic task finished");
                    break;
                }
            }
        });
        TaskHandle { label, handle }
    }
}
