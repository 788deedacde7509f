// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # Scheduler Interface
//!
//! The polling consumer registers its tick, stop and interrupt callbacks with
//! this trait rather than a concrete event loop. [`TokioScheduler`] is the
//! production implementation, backed by spawned tasks and `tokio::time`.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Callback registered with the scheduler.
pub type SchedulerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to a scheduled timer, used to cancel it.
#[derive(Debug)]
pub struct TimerHandle {
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    pub fn new(abort: AbortHandle) -> Self {
        TimerHandle { abort: Some(abort) }
    }

    /// A handle with no backing task; cancelling it is a no-op. Used by
    /// scheduler implementations that track timers externally.
    pub fn detached() -> Self {
        TimerHandle { abort: None }
    }

    pub fn cancel(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }
}

/// External scheduler supplying timers and interrupt registration.
pub trait Scheduler: Send + Sync {
    /// Runs `callback` once after `delay`.
    fn add_timer(&self, delay: Duration, callback: SchedulerCallback) -> TimerHandle;

    /// Runs `callback` every `interval`, first firing one interval from now.
    fn add_periodic_timer(&self, interval: Duration, callback: SchedulerCallback) -> TimerHandle;

    fn cancel_timer(&self, handle: &TimerHandle);

    /// Runs `callback` when the process receives an interrupt (ctrl-c).
    fn add_signal(&self, callback: SchedulerCallback);
}

/// Tokio-backed scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn add_timer(&self, delay: Duration, callback: SchedulerCallback) -> TimerHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback().await;
        });

        TimerHandle::new(task.abort_handle())
    }

    fn add_periodic_timer(&self, interval: Duration, callback: SchedulerCallback) -> TimerHandle {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick resolves immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                callback().await;
            }
        });

        TimerHandle::new(task.abort_handle())
    }

    fn cancel_timer(&self, handle: &TimerHandle) {
        handle.cancel();
    }

    fn add_signal(&self, callback: SchedulerCallback) {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                callback().await;
            }
        });
    }
}
