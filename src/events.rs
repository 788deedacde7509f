// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # Consumer Event Pipeline
//!
//! Lifecycle hooks dispatched by the polling consumer. A hook can veto the
//! acknowledgement of a message by returning [`Dispatch::Suppress`], forcing
//! redelivery; a hook error leaves the message unacknowledged and is logged
//! without aborting the tick.

use crate::errors::AmqpError;
use crate::message::{Delivery, Metadata};
use async_trait::async_trait;

/// Outcome of dispatching a delivery through the event pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Proceed with the default follow-up action (acknowledge the message)
    Continue,
    /// Veto acknowledgement; the message stays unacknowledged
    Suppress,
}

/// Lifecycle hooks for a polling consumer.
///
/// `on_start` fires at the top of every tick, `on_stop` exactly once when the
/// consumer closes. Both carry the queue name and the caller-supplied static
/// metadata.
#[async_trait]
pub trait ConsumerEvents: Send + Sync {
    async fn on_start(&self, queue: &str, metadata: &Metadata) {
        let _ = (queue, metadata);
    }

    /// Handles one pulled message. Returning `Err` marks the message as
    /// failed: the error is logged and the message is left unacknowledged.
    async fn on_message(&self, delivery: &Delivery) -> Result<Dispatch, AmqpError> {
        let _ = delivery;
        Ok(Dispatch::Continue)
    }

    async fn on_stop(&self, queue: &str, metadata: &Metadata) {
        let _ = (queue, metadata);
    }
}
