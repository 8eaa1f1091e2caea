//! Domain event dispatcher for routing events to registered handlers.
//!
//! `publish` only looks handlers up and schedules them; every delivery runs
//! detached on the background executor with its own timeout.

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{Arc, OnceLock},
    time::Duration,
};

use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, info_span, warn};
use uuid::Uuid;

use super::{
    BackgroundExecutor, DeliveryFailure, DeliveryFailureStore, DomainEvent, EventHandler,
    EventMetadata, HandlerContext, HandlerError, HandlerRegistry, HandlerRegistryBuilder,
    RegisteredHandler,
};
use crate::services::{config::DispatcherConfig, context::OperationContext};

static GLOBAL_DISPATCHER: OnceLock<Arc<EventDispatcher>> = OnceLock::new();

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("A process-wide dispatcher is already installed")]
    AlreadyInstalled,
}

/// Installs the process-wide dispatcher. Only the first call succeeds.
pub fn install_global(dispatcher: Arc<EventDispatcher>) -> Result<(), DispatchError> {
    GLOBAL_DISPATCHER
        .set(dispatcher)
        .map_err(|_| DispatchError::AlreadyInstalled)
}

pub fn global() -> Option<Arc<EventDispatcher>> {
    GLOBAL_DISPATCHER.get().cloned()
}

/// Dispatches domain events to the handlers subscribed to a topic.
///
/// Handler errors, panics and timeouts are logged and recorded in the
/// failure store; they never reach the publisher. Delivery is at most once.
pub struct EventDispatcher {
    registry: Arc<HandlerRegistry>,
    executor: BackgroundExecutor,
    failures: Arc<DeliveryFailureStore>,
    handler_timeout: Duration,
}

impl EventDispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Schedules one delivery per handler subscribed to `topic` and returns
    /// how many were scheduled. Does not wait for any of them.
    pub fn publish(&self, ctx: &OperationContext, topic: &str, event: DomainEvent) -> usize {
        let handlers = self.registry.lookup(topic);
        if handlers.is_empty() {
            debug!(topic, event = event.kind(), "No handlers subscribed, dropping event");
            return 0;
        }

        let event = Arc::new(event);
        let topic: Arc<str> = Arc::from(topic);
        let mut scheduled = 0;

        for registered in handlers {
            let delivery = Delivery {
                registered: registered.clone(),
                event: Arc::clone(&event),
                ctx: HandlerContext {
                    topic: Arc::clone(&topic),
                    delivery_id: Uuid::new_v4(),
                    request_id: ctx.request_id,
                    operator: ctx.operator.clone(),
                    cancel: self.executor.shutdown_token().child_token(),
                },
                failures: Arc::clone(&self.failures),
                timeout: self.handler_timeout,
            };

            let span = info_span!(
                "event_delivery",
                handler = registered.name(),
                topic = %topic,
                delivery_id = %delivery.ctx.delivery_id,
                request_id = %ctx.request_id,
            );
            debug!(
                handler = registered.name(),
                topic = %topic,
                event = event.kind(),
                "Scheduling handler"
            );

            let failure = delivery.failure_record(String::new());
            let gate = registered.serial.clone();
            match self.executor.submit_gated(span, gate, delivery.run()) {
                Ok(()) => scheduled += 1,
                Err(e) => {
                    warn!(
                        handler = registered.name(),
                        topic = %topic,
                        error = %e,
                        "Could not schedule handler"
                    );
                    self.failures.push(DeliveryFailure {
                        error: e.to_string(),
                        ..failure
                    });
                }
            }
        }

        scheduled
    }

    /// Resolves `metadata` and publishes it on its own topic.
    pub fn publish_metadata<M: EventMetadata + ?Sized>(
        &self,
        ctx: &OperationContext,
        metadata: &M,
    ) -> usize {
        self.publish(ctx, metadata.topic(), metadata.resolve())
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn failures(&self) -> Arc<DeliveryFailureStore> {
        Arc::clone(&self.failures)
    }

    pub fn in_flight(&self) -> usize {
        self.executor.in_flight()
    }

    /// Waits for every delivery scheduled so far.
    pub async fn drain(&self) {
        self.executor.drain().await;
    }

    /// Cancels running deliveries, waits for them, and refuses new ones.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }
}

struct Delivery {
    registered: RegisteredHandler,
    event: Arc<DomainEvent>,
    ctx: HandlerContext,
    failures: Arc<DeliveryFailureStore>,
    timeout: Duration,
}

impl Delivery {
    /// Runs with the handler's serial gate, if any, already held by the
    /// executor.
    async fn run(self) {
        let handler = Arc::clone(&self.registered.handler);
        let outcome = {
            let call = AssertUnwindSafe(handler.handle(self.event.as_ref(), &self.ctx)).catch_unwind();
            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => Err(HandlerError::Cancelled),
                result = tokio::time::timeout(self.timeout, call) => match result {
                    Err(_) => Err(HandlerError::TimedOut(self.timeout)),
                    Ok(Err(panic)) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
                    Ok(Ok(result)) => result,
                },
            }
        };

        match outcome {
            Ok(()) => debug!(handler = handler.name(), "Handler completed"),
            Err(e) => {
                warn!(
                    handler = handler.name(),
                    topic = %self.ctx.topic,
                    error = %e,
                    "Handler failed"
                );
                self.failures.push(self.failure_record(e.to_string()));
            }
        }
    }

    fn failure_record(&self, error: String) -> DeliveryFailure {
        DeliveryFailure {
            delivery_id: self.ctx.delivery_id,
            handler: self.registered.name().to_string(),
            topic: self.ctx.topic.to_string(),
            event_kind: self.event.kind().to_string(),
            error,
            failed_at: Utc::now(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builder for constructing an `EventDispatcher`.
pub struct DispatcherBuilder {
    registry: HandlerRegistryBuilder,
    handler_timeout: Duration,
    max_concurrency: usize,
    failure_history: usize,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }

    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            registry: HandlerRegistryBuilder::new(),
            handler_timeout: config.handler_timeout(),
            max_concurrency: config.max_concurrent_handlers,
            failure_history: config.failure_history,
        }
    }

    pub fn register<H: EventHandler + 'static>(mut self, topic: &str, handler: H) -> Self {
        self.registry = self.registry.register(topic, handler);
        self
    }

    pub fn register_shared(mut self, topic: &str, handler: Arc<dyn EventHandler>) -> Self {
        self.registry = self.registry.register_shared(topic, handler);
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_failure_history(mut self, capacity: usize) -> Self {
        self.failure_history = capacity;
        self
    }

    pub fn build(self) -> EventDispatcher {
        EventDispatcher {
            registry: Arc::new(self.registry.build()),
            executor: BackgroundExecutor::new(self.max_concurrency),
            failures: Arc::new(DeliveryFailureStore::new(self.failure_history)),
            handler_timeout: self.handler_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::services::domain_events::{RequestEvent, topics};

    fn approve_event() -> DomainEvent {
        DomainEvent::ApproveRequest(RequestEvent {
            event_type: topics::APPROVE_REQUEST.to_string(),
            request_id: 1,
            project: "alpha".to_string(),
            owner_id: 2,
            operator: "admin".to_string(),
            occur_at: Utc::now(),
        })
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
        topics: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _event: &DomainEvent, ctx: &HandlerContext) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.topics.lock().unwrap().push(ctx.topic.to_string());
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn handle(&self, _event: &DomainEvent, _ctx: &HandlerContext) -> Result<(), HandlerError> {
            panic!("handler exploded");
        }
    }

    struct Sleeping;

    #[async_trait]
    impl EventHandler for Sleeping {
        fn name(&self) -> &'static str {
            "sleeping"
        }

        async fn handle(&self, _event: &DomainEvent, _ctx: &HandlerContext) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_runs_every_subscribed_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::builder()
            .register(
                topics::APPROVE_REQUEST,
                Counting {
                    calls: Arc::clone(&calls),
                    topics: Arc::clone(&seen),
                },
            )
            .register(
                topics::APPROVE_REQUEST,
                Counting {
                    calls: Arc::clone(&calls),
                    topics: Arc::clone(&seen),
                },
            )
            .build();

        let scheduled = dispatcher.publish(
            &OperationContext::new("admin"),
            topics::APPROVE_REQUEST,
            approve_event(),
        );
        assert_eq!(scheduled, 2);

        dispatcher.drain().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["APPROVE_REQUEST", "APPROVE_REQUEST"]);
        assert!(dispatcher.failures().is_empty());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let dispatcher = EventDispatcher::builder().build();
        let scheduled = dispatcher.publish(&OperationContext::system(), "NOBODY", approve_event());
        assert_eq!(scheduled, 0);
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(dispatcher.failures().is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_contained_and_recorded() {
        let dispatcher = EventDispatcher::builder()
            .register(topics::APPROVE_REQUEST, Panicking)
            .build();

        dispatcher.publish(&OperationContext::system(), topics::APPROVE_REQUEST, approve_event());
        dispatcher.drain().await;

        let failures = dispatcher.failures().get_history();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].handler, "panicking");
        assert!(failures[0].error.contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_timeout_is_recorded() {
        let dispatcher = EventDispatcher::builder()
            .register(topics::APPROVE_REQUEST, Sleeping)
            .with_handler_timeout(Duration::from_millis(20))
            .build();

        dispatcher.publish(&OperationContext::system(), topics::APPROVE_REQUEST, approve_event());
        dispatcher.drain().await;

        let failures = dispatcher.failures().get_history();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_handlers() {
        let dispatcher = EventDispatcher::builder()
            .register(topics::APPROVE_REQUEST, Sleeping)
            .build();

        dispatcher.publish(&OperationContext::system(), topics::APPROVE_REQUEST, approve_event());
        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
            .await
            .unwrap();

        let scheduled =
            dispatcher.publish(&OperationContext::system(), topics::APPROVE_REQUEST, approve_event());
        assert_eq!(scheduled, 0);
        assert_eq!(dispatcher.failures().len(), 2);
    }
}
