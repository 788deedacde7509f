// Copyright (c) 2025, The Amqp Datasource Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Manager
//!
//! Owns the driver connection and the active channel, exposes the
//! declarative topology operations, publishes and acknowledges messages, and
//! routes inbound deliveries to registered handlers through the consumer
//! registry.
//!
//! Channel access is serialized through a single cached handle; the driver
//! connection and that handle are exclusively owned by one `Connection`, and
//! a [`ConnectionRegistry`] enforces at most one live connection per virtual
//! host.

use crate::config::ConnectionConfig;
use crate::driver::{
    BasicConsumeOptions, Channel, DeliveryCallback, Driver, ExchangeDeclareOptions,
    QueueDeclareOptions, QueueInfo,
};
use crate::errors::AmqpError;
use crate::exchange::{DeleteExchangeOptions, ExchangeBinding, ExchangeDefinition};
use crate::message::{Delivery, OutboundMessage, DELIVERY_MODE_PERSISTENT, ENVIRONMENT_HEADER};
use crate::queue::{DeleteQueueOptions, PurgeQueueOptions, QueueBinding, QueueDefinition};
use crate::registry::{ConsumerHandler, ConsumerRegistration, ConsumerRegistry, TagCollision};
use crate::transport::LapinDriver;
use crate::types::{arguments_from_json, FieldTable, FieldValue};
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Consume argument injected unless the caller overrides it, so mirrored
/// queues cancel the consumer on failover instead of silently re-subscribing.
pub const CANCEL_ON_HA_FAILOVER: &str = "x-cancel-on-ha-failover";

/// Per-vhost connection registry.
///
/// Replaces the process-wide static instance map: whatever composes
/// connections owns one of these and passes it to every
/// [`Connection`] constructor. Claiming an occupied vhost fails; the slot is
/// released when the connection disconnects or is dropped.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    vhosts: Arc<StdMutex<HashSet<String>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry::default()
    }

    fn acquire(&self, vhost: &str) -> Result<VhostSlot, AmqpError> {
        let mut vhosts = self.vhosts.lock().unwrap();

        if !vhosts.insert(vhost.to_owned()) {
            return Err(AmqpError::VhostInUse(vhost.to_owned()));
        }

        Ok(VhostSlot {
            vhost: vhost.to_owned(),
            vhosts: Arc::clone(&self.vhosts),
        })
    }

    pub fn contains(&self, vhost: &str) -> bool {
        self.vhosts.lock().unwrap().contains(vhost)
    }

    pub fn len(&self) -> usize {
        self.vhosts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vhosts.lock().unwrap().is_empty()
    }
}

/// Claim on a vhost, released on drop.
struct VhostSlot {
    vhost: String,
    vhosts: Arc<StdMutex<HashSet<String>>>,
}

impl Drop for VhostSlot {
    fn drop(&mut self) {
        self.vhosts.lock().unwrap().remove(&self.vhost);
    }
}

/// Reference to the channel an operation should run on.
#[derive(Clone)]
pub enum ChannelRef {
    /// Open (or reuse) the channel with this id on the driver
    Id(u16),
    /// Use this already-open channel as-is
    Handle(Arc<dyn Channel>),
}

impl std::fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelRef::Id(id) => f.debug_tuple("Id").field(id).finish(),
            ChannelRef::Handle(channel) => f.debug_tuple("Handle").field(&channel.id()).finish(),
        }
    }
}

/// Options for [`Connection::consume`].
#[derive(Debug, Default)]
pub struct ConsumeOptions {
    /// Consumer tag; generated when absent
    pub tag: Option<String>,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub nowait: bool,
    /// Behavior when `tag` collides with an existing registration
    pub collision: TagCollision,
    /// Consume arguments; must be a JSON object
    pub arguments: Option<Value>,
    pub channel: Option<ChannelRef>,
}

/// Options for [`Connection::publish`].
#[derive(Debug, Default)]
pub struct PublishOptions {
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub channel: Option<ChannelRef>,
}

/// Options for [`Connection::acknowledge`].
///
/// The default mode is a **negative** acknowledgement without requeue; pass
/// `nack: false` to positively acknowledge. This inverted default is a
/// deliberate, preserved policy of the datasource.
#[derive(Debug)]
pub struct AckOptions {
    pub multiple: bool,
    pub nack: bool,
    pub requeue: bool,
    pub channel: Option<ChannelRef>,
}

impl Default for AckOptions {
    fn default() -> Self {
        AckOptions {
            multiple: false,
            nack: true,
            requeue: false,
            channel: None,
        }
    }
}

/// Options for [`Connection::reject`].
#[derive(Debug, Default)]
pub struct RejectOptions {
    pub requeue: bool,
    pub channel: Option<ChannelRef>,
}

/// Options for [`Connection::recover`].
#[derive(Debug, Default)]
pub struct RecoverOptions {
    pub requeue: bool,
    pub channel: Option<ChannelRef>,
}

/// Options for [`Connection::qos`].
#[derive(Debug, Default)]
pub struct QosOptions {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
    pub channel: Option<ChannelRef>,
}

/// Options for [`Connection::get_from_queue`].
#[derive(Debug, Default)]
pub struct GetOptions {
    pub no_ack: bool,
    pub channel: Option<ChannelRef>,
}

/// Options for [`Connection::wait`].
#[derive(Debug, Default)]
pub struct WaitOptions {
    pub timeout: Option<Duration>,
    pub channel: Option<ChannelRef>,
}

/// Options for [`Connection::drop_consumer`].
#[derive(Debug, Default)]
pub struct CancelOptions {
    pub nowait: bool,
    pub channel: Option<ChannelRef>,
}

/// An AMQP connection: driver handle, cached channel and consumer registry.
pub struct Connection {
    name: String,
    vhost: String,
    environment: String,
    debug: bool,
    driver: Arc<dyn Driver>,
    channel: Mutex<Option<Arc<dyn Channel>>>,
    consumers: ConsumerRegistry,
    slot: StdMutex<Option<VhostSlot>>,
    disconnected: AtomicBool,
}

impl Connection {
    /// Resolves the transport from the config, claims the vhost slot and
    /// connects the lapin driver.
    pub async fn connect(
        config: ConnectionConfig,
        registry: &ConnectionRegistry,
    ) -> Result<Connection, AmqpError> {
        let scheme = config.resolve_scheme()?;
        let slot = registry.acquire(&config.vhost)?;

        let driver = LapinDriver::connect(&config, scheme).await?;

        if config.debug {
            debug!(
                connection = %config.name,
                scheme = scheme.as_str(),
                vhost = %config.vhost,
                "amqp driver connected"
            );
        }

        Ok(Connection::assemble(config, slot, Arc::new(driver)))
    }

    /// Builds a connection around an already-constructed driver. The vhost
    /// slot is still claimed from `registry`.
    pub fn with_driver(
        config: ConnectionConfig,
        registry: &ConnectionRegistry,
        driver: Arc<dyn Driver>,
    ) -> Result<Connection, AmqpError> {
        let slot = registry.acquire(&config.vhost)?;
        Ok(Connection::assemble(config, slot, driver))
    }

    fn assemble(config: ConnectionConfig, slot: VhostSlot, driver: Arc<dyn Driver>) -> Connection {
        Connection {
            name: config.name.clone(),
            vhost: config.vhost.clone(),
            environment: config.environment(),
            debug: config.debug,
            driver,
            channel: Mutex::new(None),
            consumers: ConsumerRegistry::new(),
            slot: StdMutex::new(Some(slot)),
            disconnected: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    /// Number of consumers registered on this connection.
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Resolves a channel: an explicit handle is returned as-is, an id is
    /// opened on the driver, and `None` returns the lazily-created cached
    /// channel.
    pub async fn get_channel(
        &self,
        which: Option<ChannelRef>,
    ) -> Result<Arc<dyn Channel>, AmqpError> {
        match which {
            Some(ChannelRef::Handle(channel)) => Ok(channel),
            Some(ChannelRef::Id(id)) => self.driver.channel(Some(id)).await,
            None => {
                let mut cached = self.channel.lock().await;

                if let Some(channel) = cached.as_ref() {
                    return Ok(Arc::clone(channel));
                }

                let channel = self.driver.channel(None).await?;
                if self.debug {
                    debug!(connection = %self.name, id = channel.id(), "opened channel");
                }
                *cached = Some(Arc::clone(&channel));

                Ok(channel)
            }
        }
    }

    /// Caches `channel` as the connection's current channel, closing any
    /// previously cached channel first so no channel is orphaned.
    pub async fn set_channel(&self, channel: Arc<dyn Channel>) -> Result<(), AmqpError> {
        let mut cached = self.channel.lock().await;

        if let Some(previous) = cached.take() {
            if self.debug {
                debug!(
                    connection = %self.name,
                    old = previous.id(),
                    new = channel.id(),
                    "replacing cached channel"
                );
            }
            previous.close().await?;
        }

        *cached = Some(channel);
        Ok(())
    }

    /// Declares an exchange from its definition.
    pub async fn declare_exchange(&self, def: &ExchangeDefinition<'_>) -> Result<(), AmqpError> {
        let arguments = resolve_arguments(def.arguments.as_ref())?;

        self.get_channel(None)
            .await?
            .exchange_declare(
                def.name,
                def.kind.clone(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.auto_delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                arguments,
            )
            .await
    }

    /// Binds one exchange to another.
    pub async fn bind_exchange(&self, binding: &ExchangeBinding<'_>) -> Result<(), AmqpError> {
        let arguments = resolve_arguments(binding.arguments.as_ref())?;

        self.get_channel(None)
            .await?
            .exchange_bind(
                binding.destination,
                binding.source,
                binding.routing_key,
                binding.no_wait,
                arguments,
            )
            .await
    }

    /// Removes an exchange-to-exchange binding.
    pub async fn unbind_exchange(&self, binding: &ExchangeBinding<'_>) -> Result<(), AmqpError> {
        let arguments = resolve_arguments(binding.arguments.as_ref())?;

        self.get_channel(None)
            .await?
            .exchange_unbind(
                binding.destination,
                binding.source,
                binding.routing_key,
                binding.no_wait,
                arguments,
            )
            .await
    }

    pub async fn delete_exchange(
        &self,
        name: &str,
        options: DeleteExchangeOptions,
    ) -> Result<(), AmqpError> {
        self.get_channel(None)
            .await?
            .exchange_delete(name, options.if_unused, options.nowait)
            .await
    }

    /// Declares a queue from its definition, returning whatever the broker
    /// reports about it.
    pub async fn declare_queue(&self, def: &QueueDefinition) -> Result<QueueInfo, AmqpError> {
        let arguments = resolve_arguments(def.arguments.as_ref())?;

        self.get_channel(None)
            .await?
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.auto_delete,
                    nowait: def.no_wait,
                },
                arguments,
            )
            .await
    }

    /// Binds a queue to an exchange.
    pub async fn bind_queue(&self, binding: &QueueBinding<'_>) -> Result<(), AmqpError> {
        let arguments = resolve_arguments(binding.arguments.as_ref())?;

        self.get_channel(None)
            .await?
            .queue_bind(
                binding.queue,
                binding.exchange,
                binding.routing_key,
                binding.no_wait,
                arguments,
            )
            .await
    }

    /// Removes a queue-to-exchange binding.
    pub async fn unbind_queue(&self, binding: &QueueBinding<'_>) -> Result<(), AmqpError> {
        let arguments = resolve_arguments(binding.arguments.as_ref())?;

        self.get_channel(None)
            .await?
            .queue_unbind(binding.queue, binding.exchange, binding.routing_key, arguments)
            .await
    }

    pub async fn delete_queue(
        &self,
        name: &str,
        options: DeleteQueueOptions,
    ) -> Result<u32, AmqpError> {
        self.get_channel(None)
            .await?
            .queue_delete(name, options.if_unused, options.if_empty, options.nowait)
            .await
    }

    pub async fn purge_queue(
        &self,
        name: &str,
        options: PurgeQueueOptions,
    ) -> Result<u32, AmqpError> {
        self.get_channel(None)
            .await?
            .queue_purge(name, options.nowait)
            .await
    }

    /// Publishes a message to `exchange`.
    ///
    /// Delivery mode defaults to persistent and an `environment` header is
    /// merged in unless the message already carries one.
    pub async fn publish(
        &self,
        message: impl Into<OutboundMessage> + Send,
        exchange: &str,
        options: PublishOptions,
    ) -> Result<(), AmqpError> {
        let mut message = message.into();

        if message.properties.delivery_mode.is_none() {
            message.properties.delivery_mode = Some(DELIVERY_MODE_PERSISTENT);
        }

        message
            .headers
            .entry(ENVIRONMENT_HEADER.to_owned())
            .or_insert_with(|| FieldValue::String(self.environment.clone()));

        self.get_channel(options.channel)
            .await?
            .basic_publish(
                message,
                exchange,
                &options.routing_key,
                options.mandatory,
                options.immediate,
            )
            .await
    }

    /// Registers `handler` for `queue` and starts a server-push subscription
    /// whose deliveries are routed through this connection's dispatcher.
    /// Returns the tag actually used.
    pub async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn ConsumerHandler>,
        options: ConsumeOptions,
    ) -> Result<String, AmqpError> {
        let mut arguments = resolve_arguments(options.arguments.as_ref())?;
        arguments
            .entry(CANCEL_ON_HA_FAILOVER.to_owned())
            .or_insert(FieldValue::Bool(true));

        let (tag, displaced) = self
            .consumers
            .set_consumer(options.tag, queue, handler, options.collision)?;

        let registry = self.consumers.clone();
        let callback: DeliveryCallback = Arc::new(move |delivery| {
            let registry = registry.clone();
            async move {
                if let Err(err) = dispatch_delivery(&registry, delivery).await {
                    warn!(error = err.to_string(), "dropping delivery");
                }
            }
            .boxed()
        });

        let result = self
            .get_channel(options.channel)
            .await?
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_local: options.no_local,
                    no_ack: options.no_ack,
                    exclusive: options.exclusive,
                    nowait: options.nowait,
                },
                arguments,
                callback,
            )
            .await;

        if let Err(err) = result {
            // roll back without orphaning a registration this call displaced
            match displaced {
                Some(previous) => {
                    let _ = self.consumers.set_consumer(
                        Some(tag),
                        &previous.queue,
                        previous.handler,
                        TagCollision::Replace,
                    );
                }
                None => self.consumers.unset_consumer(&tag),
            }
            return Err(err);
        }

        Ok(tag)
    }

    /// Dispatch entry point for every delivered frame: looks up the delivery's
    /// consumer tag, stamps the originating queue and invokes the registered
    /// handler. An unknown tag is a recoverable [`AmqpError::UnknownConsumer`].
    pub async fn process_message(&self, delivery: Delivery) -> Result<(), AmqpError> {
        dispatch_delivery(&self.consumers, delivery).await
    }

    /// Acknowledges a delivery. The default is a negative acknowledgement
    /// without requeue; see [`AckOptions`].
    pub async fn acknowledge(
        &self,
        delivery_tag: u64,
        options: AckOptions,
    ) -> Result<(), AmqpError> {
        let channel = self.get_channel(options.channel).await?;

        if options.nack {
            channel
                .basic_nack(delivery_tag, options.multiple, options.requeue)
                .await
        } else {
            channel.basic_ack(delivery_tag, options.multiple).await
        }
    }

    /// Rejects a single delivery.
    pub async fn reject(&self, delivery_tag: u64, options: RejectOptions) -> Result<(), AmqpError> {
        self.get_channel(options.channel)
            .await?
            .basic_reject(delivery_tag, options.requeue)
            .await
    }

    /// Redelivers unacknowledged messages on the channel.
    pub async fn recover(&self, options: RecoverOptions) -> Result<(), AmqpError> {
        self.get_channel(options.channel)
            .await?
            .basic_recover(options.requeue)
            .await
    }

    /// Sets the channel's prefetch window.
    pub async fn qos(&self, options: QosOptions) -> Result<(), AmqpError> {
        self.get_channel(options.channel)
            .await?
            .basic_qos(options.prefetch_size, options.prefetch_count, options.global)
            .await
    }

    /// Pulls a single message from `queue`; `None` when the queue is empty.
    pub async fn get_from_queue(
        &self,
        queue: &str,
        options: GetOptions,
    ) -> Result<Option<Delivery>, AmqpError> {
        self.get_channel(options.channel)
            .await?
            .basic_get(queue, options.no_ack)
            .await
    }

    /// Parks the caller on the channel; see [`crate::driver::Channel::wait`].
    pub async fn wait(&self, options: WaitOptions) -> Result<(), AmqpError> {
        self.get_channel(options.channel)
            .await?
            .wait(options.timeout)
            .await
    }

    /// Cancels the subscription for `tag` on the broker and removes it from
    /// the local registry.
    pub async fn drop_consumer(&self, tag: &str, options: CancelOptions) -> Result<(), AmqpError> {
        self.get_channel(options.channel)
            .await?
            .basic_cancel(tag, options.nowait)
            .await?;

        self.consumers.unset_consumer(tag);
        Ok(())
    }

    /// Registers a handler in the consumer registry without issuing a driver
    /// call; returns the effective tag.
    pub fn set_consumer(
        &self,
        tag: Option<String>,
        queue: &str,
        handler: Arc<dyn ConsumerHandler>,
        collision: TagCollision,
    ) -> Result<String, AmqpError> {
        let (tag, _) = self.consumers.set_consumer(tag, queue, handler, collision)?;
        Ok(tag)
    }

    /// Removes a registration; absent tags are a no-op.
    pub fn unset_consumer(&self, tag: &str) {
        self.consumers.unset_consumer(tag);
    }

    /// Looks up a registration by tag.
    pub fn get_consumer(&self, tag: &str) -> Option<ConsumerRegistration> {
        self.consumers.get_consumer(tag)
    }

    /// Closes the cached channel and the driver connection, releasing the
    /// vhost slot. Idempotent; transport-level close failures are logged and
    /// swallowed so teardown always completes.
    pub async fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(channel) = self.channel.lock().await.take() {
            if let Err(err) = channel.close().await {
                debug!(
                    connection = %self.name,
                    error = err.to_string(),
                    "channel close failed during disconnect"
                );
            }
        }

        if let Err(err) = self.driver.close().await {
            debug!(
                connection = %self.name,
                error = err.to_string(),
                "driver close failed during disconnect"
            );
        }

        self.slot.lock().unwrap().take();
    }
}

/// Routes a delivery to the handler registered for its consumer tag.
async fn dispatch_delivery(
    registry: &ConsumerRegistry,
    mut delivery: Delivery,
) -> Result<(), AmqpError> {
    let Some(tag) = delivery.consumer_tag.clone() else {
        return Err(AmqpError::MissingConsumerTag);
    };

    let Some(registration) = registry.get_consumer(&tag) else {
        return Err(AmqpError::UnknownConsumer(tag));
    };

    delivery.queue = Some(registration.queue.clone());
    registration.handler.handle(delivery).await
}

fn resolve_arguments(arguments: Option<&Value>) -> Result<FieldTable, AmqpError> {
    match arguments {
        Some(value) => arguments_from_json(value),
        None => Ok(FieldTable::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockChannel, MockDriver};
    use crate::message::Metadata;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            name: "test".to_owned(),
            environment: Some("test".to_owned()),
            ..ConnectionConfig::default()
        }
    }

    fn connection(driver: MockDriver) -> Connection {
        Connection::with_driver(test_config(), &ConnectionRegistry::new(), Arc::new(driver))
            .unwrap()
    }

    fn channel_driver(channel: MockChannel) -> MockDriver {
        let channel = Arc::new(channel);
        let mut driver = MockDriver::new();
        driver.expect_channel().returning(move |_| {
            let channel: Arc<dyn Channel> = channel.clone();
            Ok(channel)
        });
        driver
    }

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<Delivery>>,
    }

    #[async_trait]
    impl ConsumerHandler for RecordingHandler {
        async fn handle(&self, delivery: Delivery) -> Result<(), AmqpError> {
            self.seen.lock().unwrap().push(delivery);
            Ok(())
        }
    }

    #[test]
    fn vhost_can_only_be_claimed_once() {
        let registry = ConnectionRegistry::new();

        let first =
            Connection::with_driver(test_config(), &registry, Arc::new(MockDriver::new())).unwrap();
        assert_eq!(registry.len(), 1);

        let err = Connection::with_driver(test_config(), &registry, Arc::new(MockDriver::new()))
            .err()
            .unwrap();
        assert_eq!(err, AmqpError::VhostInUse("/".to_owned()));

        drop(first);
        assert!(registry.is_empty());
        assert!(
            Connection::with_driver(test_config(), &registry, Arc::new(MockDriver::new())).is_ok()
        );
    }

    #[tokio::test]
    async fn disconnect_releases_the_vhost_and_is_idempotent() {
        let registry = ConnectionRegistry::new();

        let mut driver = MockDriver::new();
        driver.expect_close().times(1).returning(|| Ok(()));

        let conn =
            Connection::with_driver(test_config(), &registry, Arc::new(driver)).unwrap();

        conn.disconnect().await;
        conn.disconnect().await;

        assert!(registry.is_empty());
        assert!(
            Connection::with_driver(test_config(), &registry, Arc::new(MockDriver::new())).is_ok()
        );
    }

    #[tokio::test]
    async fn disconnect_swallows_transport_close_errors() {
        let mut channel = MockChannel::new();
        channel
            .expect_close()
            .times(1)
            .returning(|| Err(AmqpError::Transport("already gone".to_owned())));

        let channel = Arc::new(channel);
        let mut driver = MockDriver::new();
        {
            let channel = channel.clone();
            driver.expect_channel().returning(move |_| {
                let channel: Arc<dyn Channel> = channel.clone();
                Ok(channel)
            });
        }
        driver
            .expect_close()
            .times(1)
            .returning(|| Err(AmqpError::Transport("broken pipe".to_owned())));

        let conn = connection(driver);
        conn.get_channel(None).await.unwrap();

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn cached_channel_is_created_lazily_and_reused() {
        let mut channel = MockChannel::new();
        channel.expect_id().return_const(1u16);

        let channel = Arc::new(channel);
        let mut driver = MockDriver::new();
        {
            let channel = channel.clone();
            driver.expect_channel().times(1).returning(move |_| {
                let channel: Arc<dyn Channel> = channel.clone();
                Ok(channel)
            });
        }

        let conn = connection(driver);

        let first = conn.get_channel(None).await.unwrap();
        let second = conn.get_channel(None).await.unwrap();

        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn get_channel_by_id_asks_the_driver() {
        let mut driver = MockDriver::new();
        driver
            .expect_channel()
            .withf(|id| *id == Some(7))
            .times(1)
            .returning(|_| {
                let mut channel = MockChannel::new();
                channel.expect_id().return_const(7u16);
                let channel: Arc<dyn Channel> = Arc::new(channel);
                Ok(channel)
            });

        let conn = connection(driver);

        let channel = conn.get_channel(Some(ChannelRef::Id(7))).await.unwrap();
        assert_eq!(channel.id(), 7);
    }

    #[tokio::test]
    async fn get_channel_returns_explicit_handles_as_is() {
        let conn = connection(MockDriver::new());

        let mut channel = MockChannel::new();
        channel.expect_id().return_const(42u16);
        let channel: Arc<dyn Channel> = Arc::new(channel);

        let resolved = conn
            .get_channel(Some(ChannelRef::Handle(Arc::clone(&channel))))
            .await
            .unwrap();

        assert_eq!(resolved.id(), 42);
    }

    #[tokio::test]
    async fn set_channel_closes_the_previous_channel_once() {
        let conn = connection(MockDriver::new());

        let mut old = MockChannel::new();
        old.expect_close().times(1).returning(|| Ok(()));
        let new = MockChannel::new();

        conn.set_channel(Arc::new(old)).await.unwrap();
        conn.set_channel(Arc::new(new)).await.unwrap();
    }

    #[tokio::test]
    async fn publish_defaults_to_persistent_with_environment_header() {
        let mut channel = MockChannel::new();
        channel
            .expect_basic_publish()
            .withf(|message, exchange, routing_key, mandatory, immediate| {
                message.payload == b"hello"
                    && message.properties.delivery_mode == Some(DELIVERY_MODE_PERSISTENT)
                    && message.headers.len() == 1
                    && message.headers.get(ENVIRONMENT_HEADER)
                        == Some(&FieldValue::String("test".to_owned()))
                    && exchange == "my-exchange"
                    && routing_key.is_empty()
                    && !mandatory
                    && !immediate
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let conn = connection(channel_driver(channel));

        conn.publish("hello", "my-exchange", PublishOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn publish_respects_explicit_properties_and_headers() {
        let mut channel = MockChannel::new();
        channel
            .expect_basic_publish()
            .withf(|message, _, routing_key, _, _| {
                message.properties.delivery_mode == Some(crate::message::DELIVERY_MODE_TRANSIENT)
                    && message.headers.get(ENVIRONMENT_HEADER)
                        == Some(&FieldValue::String("prod".to_owned()))
                    && routing_key == "audit.trail"
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let conn = connection(channel_driver(channel));

        let message = OutboundMessage::new(b"payload".to_vec())
            .properties(crate::message::MessageProperties {
                delivery_mode: Some(crate::message::DELIVERY_MODE_TRANSIENT),
                ..Default::default()
            })
            .header(ENVIRONMENT_HEADER, "prod");

        conn.publish(
            message,
            "audit",
            PublishOptions {
                routing_key: "audit.trail".to_owned(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn consume_generates_unique_tags_and_injects_failover_argument() {
        let mut channel = MockChannel::new();
        channel
            .expect_basic_consume()
            .withf(|queue, tag, _, arguments, _| {
                queue == "jobs"
                    && !tag.is_empty()
                    && arguments.get(CANCEL_ON_HA_FAILOVER) == Some(&FieldValue::Bool(true))
            })
            .times(2)
            .returning(|_, _, _, _, _| Ok(()));

        let conn = connection(channel_driver(channel));

        let first = conn
            .consume("jobs", Arc::new(RecordingHandler::default()), ConsumeOptions::default())
            .await
            .unwrap();
        let second = conn
            .consume("jobs", Arc::new(RecordingHandler::default()), ConsumeOptions::default())
            .await
            .unwrap();

        assert!(!first.is_empty());
        assert_ne!(first, second);
        assert_eq!(conn.consumer_count(), 2);
    }

    #[tokio::test]
    async fn consume_rolls_back_the_registration_when_the_driver_fails() {
        let mut channel = MockChannel::new();
        channel
            .expect_basic_consume()
            .times(1)
            .returning(|_, _, _, _, _| Err(AmqpError::Transport("channel gone".to_owned())));

        let conn = connection(channel_driver(channel));

        let err = conn
            .consume("jobs", Arc::new(RecordingHandler::default()), ConsumeOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::Transport(_)));
        assert_eq!(conn.consumer_count(), 0);
    }

    #[tokio::test]
    async fn consume_rollback_reinstates_a_replaced_registration() {
        let mut channel = MockChannel::new();
        channel
            .expect_basic_consume()
            .times(1)
            .returning(|_, _, _, _, _| Err(AmqpError::Transport("channel gone".to_owned())));

        let conn = connection(channel_driver(channel));

        conn.set_consumer(
            Some("t".to_owned()),
            "old-queue",
            Arc::new(RecordingHandler::default()),
            TagCollision::Replace,
        )
        .unwrap();

        let err = conn
            .consume(
                "new-queue",
                Arc::new(RecordingHandler::default()),
                ConsumeOptions {
                    tag: Some("t".to_owned()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::Transport(_)));
        // the subscription displaced by the failed call keeps routing
        assert_eq!(conn.get_consumer("t").unwrap().queue, "old-queue");
        assert_eq!(conn.consumer_count(), 1);
    }

    #[tokio::test]
    async fn consume_rejects_non_object_arguments_before_any_driver_call() {
        // no channel expectations: reaching the driver would panic
        let conn = connection(MockDriver::new());

        let err = conn
            .consume(
                "jobs",
                Arc::new(RecordingHandler::default()),
                ConsumeOptions {
                    arguments: Some(json!(["not", "a", "map"])),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::InvalidArgument(_)));
        assert_eq!(conn.consumer_count(), 0);
    }

    #[tokio::test]
    async fn declare_queue_rejects_non_object_arguments_before_any_driver_call() {
        let conn = connection(MockDriver::new());

        let def = QueueDefinition::new("q").arguments(json!("not-an-array"));
        let err = conn.declare_queue(&def).await.unwrap_err();

        assert!(matches!(err, AmqpError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn declare_queue_forwards_definition_defaults() {
        let mut channel = MockChannel::new();
        channel
            .expect_queue_declare()
            .withf(|queue, options, arguments| {
                queue == "jobs"
                    && !options.durable
                    && options.auto_delete
                    && !options.exclusive
                    && !options.passive
                    && !options.nowait
                    && arguments.is_empty()
            })
            .times(1)
            .returning(|queue, _, _| {
                Ok(QueueInfo {
                    name: queue.to_owned(),
                    message_count: 0,
                    consumer_count: 0,
                })
            });

        let conn = connection(channel_driver(channel));

        let info = conn.declare_queue(&QueueDefinition::new("jobs")).await.unwrap();
        assert_eq!(info.name, "jobs");
    }

    #[tokio::test]
    async fn declare_exchange_converts_json_arguments() {
        let mut channel = MockChannel::new();
        channel
            .expect_exchange_declare()
            .withf(|exchange, kind, options, arguments| {
                exchange == "events"
                    && *kind == crate::exchange::ExchangeKind::Topic
                    && options.durable
                    && !options.auto_delete
                    && arguments.get("alternate-exchange")
                        == Some(&FieldValue::String("overflow".to_owned()))
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let conn = connection(channel_driver(channel));

        let def = ExchangeDefinition::new("events")
            .topic()
            .durable()
            .keep()
            .arguments(json!({"alternate-exchange": "overflow"}));

        conn.declare_exchange(&def).await.unwrap();
    }

    #[tokio::test]
    async fn process_message_with_unknown_tag_is_recoverable() {
        let conn = connection(MockDriver::new());

        let delivery = Delivery {
            consumer_tag: Some("ghost".to_owned()),
            ..Default::default()
        };

        let err = conn.process_message(delivery).await.unwrap_err();
        assert_eq!(err, AmqpError::UnknownConsumer("ghost".to_owned()));
    }

    #[tokio::test]
    async fn process_message_without_a_tag_is_a_routing_error() {
        let conn = connection(MockDriver::new());

        let err = conn.process_message(Delivery::default()).await.unwrap_err();
        assert_eq!(err, AmqpError::MissingConsumerTag);
    }

    #[tokio::test]
    async fn process_message_stamps_the_queue_and_invokes_the_handler() {
        let conn = connection(MockDriver::new());

        let handler = Arc::new(RecordingHandler::default());
        conn.set_consumer(
            Some("tag-1".to_owned()),
            "jobs",
            handler.clone(),
            TagCollision::Replace,
        )
        .unwrap();

        let delivery = Delivery {
            consumer_tag: Some("tag-1".to_owned()),
            delivery_tag: 9,
            ..Default::default()
        };

        conn.process_message(delivery).await.unwrap();

        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].queue.as_deref(), Some("jobs"));
        assert_eq!(seen[0].delivery_tag, 9);
    }

    #[tokio::test]
    async fn acknowledge_defaults_to_negative_ack() {
        let mut channel = MockChannel::new();
        channel
            .expect_basic_nack()
            .withf(|tag, multiple, requeue| *tag == 7 && !multiple && !requeue)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let conn = connection(channel_driver(channel));

        conn.acknowledge(7, AckOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn acknowledge_can_positively_ack() {
        let mut channel = MockChannel::new();
        channel
            .expect_basic_ack()
            .withf(|tag, multiple| *tag == 7 && !multiple)
            .times(1)
            .returning(|_, _| Ok(()));

        let conn = connection(channel_driver(channel));

        conn.acknowledge(
            7,
            AckOptions {
                nack: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn drop_consumer_cancels_and_unregisters_the_tag() {
        let mut channel = MockChannel::new();
        channel
            .expect_basic_cancel()
            .withf(|tag, nowait| tag == "tag-1" && !nowait)
            .times(1)
            .returning(|_, _| Ok(()));

        let conn = connection(channel_driver(channel));

        conn.set_consumer(
            Some("tag-1".to_owned()),
            "jobs",
            Arc::new(RecordingHandler::default()),
            TagCollision::Replace,
        )
        .unwrap();

        conn.drop_consumer("tag-1", CancelOptions::default()).await.unwrap();

        assert!(conn.get_consumer("tag-1").is_none());
        assert_eq!(conn.consumer_count(), 0);
    }

    #[tokio::test]
    async fn get_from_queue_passes_through_the_driver_result() {
        let mut channel = MockChannel::new();
        channel
            .expect_basic_get()
            .withf(|queue, no_ack| queue == "jobs" && !no_ack)
            .times(1)
            .returning(|_, _| {
                Ok(Some(Delivery {
                    delivery_tag: 3,
                    payload: b"work".to_vec(),
                    metadata: Metadata::default(),
                    ..Default::default()
                }))
            });

        let conn = connection(channel_driver(channel));

        let delivery = conn
            .get_from_queue("jobs", GetOptions::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(delivery.delivery_tag, 3);
        assert_eq!(delivery.payload, b"work");
    }
}
