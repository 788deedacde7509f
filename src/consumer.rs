// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # Queue Consumer Shell
//!
//! A long-running, pull-based consumer: on every scheduler tick it drains a
//! queue with `basic_get`, routes each message through the
//! [`ConsumerEvents`](crate::events::ConsumerEvents) pipeline and
//! acknowledges it unless a hook vetoes or fails. Lifecycle is owned by the
//! scheduler: a periodic tick timer, an optional one-shot stop timer and an
//! interrupt signal that all converge on [`PollingConsumer::close`].

use crate::driver::Channel;
use crate::errors::AmqpError;
use crate::events::{ConsumerEvents, Dispatch};
use crate::message::Metadata;
use crate::scheduler::{Scheduler, TimerHandle};
use futures_util::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Polling cadence and stop conditions for a [`PollingConsumer`].
#[derive(Debug, Clone)]
pub struct PollingOptions {
    /// Delay between drain ticks
    pub interval: Duration,
    /// Wall-clock lifetime of the consumer; `None` runs until interrupted
    pub timeout: Option<Duration>,
    /// Upper bound on messages processed per tick; 0 is unlimited
    pub max_messages: usize,
    /// Skip the positive acknowledgement after a successful dispatch
    pub no_ack: bool,
}

impl Default for PollingOptions {
    fn default() -> Self {
        PollingOptions {
            interval: Duration::from_millis(500),
            timeout: Some(Duration::from_secs(600)),
            max_messages: 0,
            no_ack: false,
        }
    }
}

/// A scheduled pull-based queue consumer.
pub struct PollingConsumer {
    channel: Arc<dyn Channel>,
    scheduler: Arc<dyn Scheduler>,
    events: Arc<dyn ConsumerEvents>,
    queue: String,
    metadata: Metadata,
    max_messages: usize,
    no_ack: bool,
    closed: AtomicBool,
    interval_timer: Mutex<Option<TimerHandle>>,
    stop_timer: Mutex<Option<TimerHandle>>,
}

impl PollingConsumer {
    /// Wires a consumer into the scheduler: a periodic drain tick, the
    /// optional stop timer and an interrupt handler that closes the consumer.
    pub fn spawn(
        channel: Arc<dyn Channel>,
        scheduler: Arc<dyn Scheduler>,
        events: Arc<dyn ConsumerEvents>,
        queue: impl Into<String>,
        metadata: Metadata,
        options: PollingOptions,
    ) -> Arc<PollingConsumer> {
        let consumer = Arc::new(PollingConsumer {
            channel,
            scheduler: Arc::clone(&scheduler),
            events,
            queue: queue.into(),
            metadata,
            max_messages: options.max_messages,
            no_ack: options.no_ack,
            closed: AtomicBool::new(false),
            interval_timer: Mutex::new(None),
            stop_timer: Mutex::new(None),
        });

        if let Some(timeout) = options.timeout {
            let me = Arc::clone(&consumer);
            let handle = scheduler.add_timer(
                timeout,
                Arc::new(move || {
                    let me = Arc::clone(&me);
                    async move {
                        debug!(queue = %me.queue, "consumer lifetime elapsed");
                        me.close().await;
                    }
                    .boxed()
                }),
            );
            *consumer.stop_timer.lock().unwrap() = Some(handle);
        }

        {
            let me = Arc::clone(&consumer);
            scheduler.add_signal(Arc::new(move || {
                let me = Arc::clone(&me);
                async move {
                    debug!(queue = %me.queue, "interrupt received");
                    me.close().await;
                }
                .boxed()
            }));
        }

        let me = Arc::clone(&consumer);
        let handle = scheduler.add_periodic_timer(
            options.interval,
            Arc::new(move || {
                let me = Arc::clone(&me);
                async move {
                    match me.consume().await {
                        Ok(()) => {}
                        // a tick can race the close latch
                        Err(AmqpError::ConsumerClosed) => {}
                        Err(err) => {
                            warn!(queue = %me.queue, error = err.to_string(), "drain tick failed")
                        }
                    }
                }
                .boxed()
            }),
        );
        *consumer.interval_timer.lock().unwrap() = Some(handle);

        consumer
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drains the queue once: pulls messages until it is empty or the per-tick
    /// cap is reached, dispatching each through the event pipeline.
    ///
    /// A message is acknowledged when its hook returns
    /// [`Dispatch::Continue`]; [`Dispatch::Suppress`] and hook errors leave it
    /// unacknowledged for redelivery. Every pulled message counts against the
    /// per-tick cap regardless of its dispatch outcome.
    pub async fn consume(&self) -> Result<(), AmqpError> {
        if self.is_closed() {
            return Err(AmqpError::ConsumerClosed);
        }

        self.events.on_start(&self.queue, &self.metadata).await;

        let mut total = 0usize;

        loop {
            let Some(mut delivery) = self.channel.basic_get(&self.queue, self.no_ack).await? else {
                break;
            };

            delivery.queue = Some(self.queue.clone());
            for (key, value) in &self.metadata {
                delivery
                    .metadata
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }

            total += 1;

            match self.events.on_message(&delivery).await {
                Ok(Dispatch::Continue) => {
                    if !self.no_ack {
                        self.channel.basic_ack(delivery.delivery_tag, false).await?;
                    }
                }
                Ok(Dispatch::Suppress) => {
                    debug!(
                        queue = %self.queue,
                        delivery_tag = delivery.delivery_tag,
                        "acknowledgement suppressed"
                    );
                }
                Err(err) => {
                    error!(
                        queue = %self.queue,
                        delivery_tag = delivery.delivery_tag,
                        error = err.to_string(),
                        "message handler failed"
                    );
                }
            }

            if self.max_messages > 0 && total >= self.max_messages {
                break;
            }
        }

        Ok(())
    }

    /// Latches the consumer closed, cancels its timers and fires `on_stop`
    /// exactly once. Further `close` calls are no-ops; further `consume`
    /// calls fail with [`AmqpError::ConsumerClosed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.interval_timer.lock().unwrap().take() {
            self.scheduler.cancel_timer(&handle);
        }
        if let Some(handle) = self.stop_timer.lock().unwrap().take() {
            self.scheduler.cancel_timer(&handle);
        }

        self.events.on_stop(&self.queue, &self.metadata).await;
    }
}
