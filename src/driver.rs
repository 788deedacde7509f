// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # Driver Interface
//!
//! The connection manager and polling consumer are written against these
//! traits rather than a concrete protocol library. The production
//! implementation lives in [`crate::transport`]; tests run against mockall
//! mocks of the same traits.
//!
//! The AMQP `ticket` parameters are intentionally absent: the 0-9-1 protocol
//! reserves them and the underlying driver does not surface them.

use crate::errors::AmqpError;
use crate::message::{Delivery, OutboundMessage};
use crate::types::FieldTable;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked by the driver for every frame delivered to a consumer.
pub type DeliveryCallback = Arc<dyn Fn(Delivery) -> BoxFuture<'static, ()> + Send + Sync>;

/// Result of a queue declaration as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Options for `exchange_declare`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeDeclareOptions {
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub nowait: bool,
}

/// Options for `queue_declare`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDeclareOptions {
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub nowait: bool,
}

/// Options for `basic_consume`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicConsumeOptions {
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub nowait: bool,
}

/// An opaque AMQP connection supplied by the protocol library.
///
/// A driver hands out channels and is closed exactly once on teardown.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Driver: Send + Sync {
    /// Opens a channel. `id` is advisory: drivers that assign channel ids
    /// themselves open a fresh channel and report the actual id through
    /// [`Channel::id`].
    async fn channel(&self, id: Option<u16>) -> Result<Arc<dyn Channel>, AmqpError>;

    /// Closes the underlying connection.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// A multiplexed logical connection used to issue protocol operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> u16;

    async fn close(&self) -> Result<(), AmqpError>;

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: crate::exchange::ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        nowait: bool,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        nowait: bool,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn exchange_delete(
        &self,
        exchange: &str,
        if_unused: bool,
        nowait: bool,
    ) -> Result<(), AmqpError>;

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueInfo, AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        nowait: bool,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    /// Returns the number of messages deleted along with the queue.
    async fn queue_delete(
        &self,
        queue: &str,
        if_unused: bool,
        if_empty: bool,
        nowait: bool,
    ) -> Result<u32, AmqpError>;

    /// Returns the number of messages purged.
    async fn queue_purge(&self, queue: &str, nowait: bool) -> Result<u32, AmqpError>;

    async fn basic_publish(
        &self,
        message: OutboundMessage,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        immediate: bool,
    ) -> Result<(), AmqpError>;

    /// Starts a server-push subscription. The driver invokes `callback` for
    /// every delivered frame, stamping the consumer tag on the delivery.
    async fn basic_consume(
        &self,
        queue: &str,
        tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
        callback: DeliveryCallback,
    ) -> Result<(), AmqpError>;

    /// Pulls a single message; `None` when the queue is empty.
    async fn basic_get(&self, queue: &str, no_ack: bool) -> Result<Option<Delivery>, AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError>;

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), AmqpError>;

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn basic_recover(&self, requeue: bool) -> Result<(), AmqpError>;

    async fn basic_qos(
        &self,
        prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    ) -> Result<(), AmqpError>;

    async fn basic_cancel(&self, consumer_tag: &str, nowait: bool) -> Result<(), AmqpError>;

    /// Parks the caller until the channel leaves its connected state or the
    /// timeout elapses. Push deliveries keep flowing in the background.
    async fn wait(&self, timeout: Option<Duration>) -> Result<(), AmqpError>;
}
