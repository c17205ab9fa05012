//! Dispatcher behavior tests against the in-memory bus
//!
//! Covers the retry/dead-letter policy: transient failures are retried
//! with backoff up to the attempt cap, permanent failures are routed to
//! the DLQ immediately, and dead-lettered messages are never redelivered
//! to the handler.

use async_trait::async_trait;
use event_bus::consumer_retry::RetryConfig;
use event_bus::{BusMessage, EventBus, InMemoryBus};
use event_consumer::{
    DeadLetterStore, Dispatcher, EventHandler, HandlerOutcome, InMemoryDeadLetterStore,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::{sleep, timeout};

const SUBJECT: &str = "orders.events.order.created";

/// Handler that replays a scripted sequence of outcomes, then acks
struct ScriptedHandler {
    outcomes: Mutex<VecDeque<HandlerOutcome>>,
    calls: AtomicU32,
}

impl ScriptedHandler {
    fn new(outcomes: Vec<HandlerOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn handle(&self, _msg: &BusMessage) -> HandlerOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(HandlerOutcome::Ack)
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff: Duration::from_millis(5),
        multiplier: 2,
        max_backoff: Duration::from_millis(20),
    }
}

struct Fixture {
    bus: Arc<InMemoryBus>,
    handler: Arc<ScriptedHandler>,
    dlq: Arc<InMemoryDeadLetterStore>,
    shutdown: watch::Sender<bool>,
}

/// Start a dispatcher task and give it time to subscribe
async fn start_dispatcher(outcomes: Vec<HandlerOutcome>, retry: RetryConfig) -> Fixture {
    let bus = Arc::new(InMemoryBus::new());
    let handler = Arc::new(ScriptedHandler::new(outcomes));
    let dlq = Arc::new(InMemoryDeadLetterStore::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher::new(
        bus.clone() as Arc<dyn EventBus>,
        SUBJECT,
        retry,
        dlq.clone() as Arc<dyn DeadLetterStore>,
    );

    let task_handler = handler.clone();
    tokio::spawn(async move {
        dispatcher
            .run(task_handler, shutdown_rx)
            .await
            .expect("dispatcher failed to subscribe");
    });

    // Let the subscription register before publishing
    sleep(Duration::from_millis(50)).await;

    Fixture {
        bus,
        handler,
        dlq,
        shutdown: shutdown_tx,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 1s");
}

#[tokio::test]
async fn test_ack_on_first_attempt() {
    let fx = start_dispatcher(vec![HandlerOutcome::Ack], fast_retry(3)).await;

    fx.bus.publish(SUBJECT, b"{}".to_vec()).await.unwrap();

    wait_until(|| fx.handler.calls() == 1).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(fx.handler.calls(), 1, "acked message must not be redelivered");
    assert!(fx.dlq.is_empty());
}

#[tokio::test]
async fn test_transient_failure_retried_then_acked() {
    let fx = start_dispatcher(
        vec![HandlerOutcome::retry(), HandlerOutcome::retry(), HandlerOutcome::Ack],
        fast_retry(5),
    )
    .await;

    fx.bus.publish(SUBJECT, b"{}".to_vec()).await.unwrap();

    wait_until(|| fx.handler.calls() == 3).await;

    assert!(fx.dlq.is_empty(), "recovered message must not be dead-lettered");
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter() {
    // Every attempt fails transiently; cap is 3 attempts
    let fx = start_dispatcher(
        vec![
            HandlerOutcome::retry(),
            HandlerOutcome::retry(),
            HandlerOutcome::retry(),
            HandlerOutcome::retry(),
        ],
        fast_retry(3),
    )
    .await;

    fx.bus.publish(SUBJECT, b"{}".to_vec()).await.unwrap();

    wait_until(|| fx.dlq.len() == 1).await;

    assert_eq!(fx.handler.calls(), 3, "attempt cap bounds handler invocations");

    let entries = fx.dlq.entries();
    assert_eq!(entries[0].retry_count, 3);
    assert_eq!(entries[0].subject, SUBJECT);

    // Dead-lettered messages are terminal: no further redelivery
    sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.handler.calls(), 3);
    assert_eq!(fx.dlq.len(), 1);
}

#[tokio::test]
async fn test_permanent_failure_dead_letters_without_retry() {
    let fx = start_dispatcher(
        vec![HandlerOutcome::DeadLetter("malformed payload".to_string())],
        fast_retry(5),
    )
    .await;

    fx.bus.publish(SUBJECT, b"not json".to_vec()).await.unwrap();

    wait_until(|| fx.dlq.len() == 1).await;

    assert_eq!(fx.handler.calls(), 1, "permanent failures are never retried");

    let entries = fx.dlq.entries();
    assert_eq!(entries[0].error, "malformed payload");
    assert_eq!(entries[0].retry_count, 1);
}

#[tokio::test]
async fn test_explicit_retry_delay_is_honored() {
    let fx = start_dispatcher(
        vec![
            HandlerOutcome::retry_after(Duration::from_millis(150)),
            HandlerOutcome::Ack,
        ],
        fast_retry(5),
    )
    .await;

    let started = std::time::Instant::now();
    fx.bus.publish(SUBJECT, b"{}".to_vec()).await.unwrap();

    wait_until(|| fx.handler.calls() == 2).await;

    assert!(
        started.elapsed() >= Duration::from_millis(150),
        "redelivery must wait out the handler-requested delay"
    );
}

/// Handler that holds each delivery open until a permit is released
struct GatedHandler {
    entered: AtomicU32,
    completed: AtomicU32,
    gate: Semaphore,
}

impl GatedHandler {
    fn new() -> Self {
        Self {
            entered: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            gate: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl EventHandler for GatedHandler {
    fn name(&self) -> &str {
        "gated"
    }

    async fn handle(&self, _msg: &BusMessage) -> HandlerOutcome {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.unwrap();
        self.completed.fetch_add(1, Ordering::SeqCst);
        HandlerOutcome::Ack
    }
}

#[tokio::test]
async fn test_shutdown_stops_pulling_messages() {
    let fx = start_dispatcher(vec![], fast_retry(3)).await;

    fx.shutdown.send(true).unwrap();
    sleep(Duration::from_millis(50)).await;

    // Published after shutdown: must not reach the handler
    fx.bus.publish(SUBJECT, b"{}".to_vec()).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(fx.handler.calls(), 0);
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_message_finish() {
    let bus = Arc::new(InMemoryBus::new());
    let handler = Arc::new(GatedHandler::new());
    let dlq = Arc::new(InMemoryDeadLetterStore::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher::new(
        bus.clone() as Arc<dyn EventBus>,
        SUBJECT,
        fast_retry(3),
        dlq.clone() as Arc<dyn DeadLetterStore>,
    );

    let task_handler = handler.clone();
    let task = tokio::spawn(async move {
        dispatcher
            .run(task_handler, shutdown_rx)
            .await
            .expect("dispatcher failed to subscribe");
    });
    sleep(Duration::from_millis(50)).await;

    bus.publish(SUBJECT, b"{}".to_vec()).await.unwrap();
    wait_until(|| handler.entered.load(Ordering::SeqCst) == 1).await;

    // Signal shutdown while the handler is mid-delivery
    shutdown_tx.send(true).unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished(), "dispatcher must wait for the delivery");
    assert_eq!(handler.completed.load(Ordering::SeqCst), 0);

    // Release the delivery: the outcome is reached, then the loop exits
    handler.gate.add_permits(1);
    timeout(Duration::from_secs(1), task)
        .await
        .expect("dispatcher did not stop after the in-flight delivery")
        .unwrap();

    assert_eq!(handler.completed.load(Ordering::SeqCst), 1);
    assert!(dlq.is_empty());
}

#[tokio::test]
async fn test_dropped_shutdown_sender_stops_dispatcher() {
    let bus = Arc::new(InMemoryBus::new());
    let handler = Arc::new(ScriptedHandler::new(vec![]));
    let dlq = Arc::new(InMemoryDeadLetterStore::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher::new(
        bus.clone() as Arc<dyn EventBus>,
        SUBJECT,
        fast_retry(3),
        dlq.clone() as Arc<dyn DeadLetterStore>,
    );

    let task_handler = handler.clone();
    let task = tokio::spawn(async move {
        dispatcher
            .run(task_handler, shutdown_rx)
            .await
            .expect("dispatcher failed to subscribe");
    });
    sleep(Duration::from_millis(50)).await;

    // Sender dropped without ever flipping to true: the closed channel
    // must end the loop rather than leave it spinning
    drop(shutdown_tx);

    timeout(Duration::from_secs(1), task)
        .await
        .expect("dispatcher did not stop after the shutdown channel closed")
        .unwrap();

    assert_eq!(handler.calls(), 0);
}
