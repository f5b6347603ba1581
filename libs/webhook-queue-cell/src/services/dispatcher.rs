use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex, Notify, RwLock, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::services::retry::{run_with_retry, RetryOutcome};
use crate::{DispatcherConfig, EnqueueReceipt, ErrorClass, HandlerError, QueueError, QueueStats, WebhookEvent};

/// Processes one event. Called at most once at a time per entity key.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &WebhookEvent) -> Result<(), HandlerError>;
}

/// Receives events whose attempt chain ended without success.
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn record_failure(&self, event: &WebhookEvent, error: &HandlerError, attempts: u32);
}

// ==============================================================================
// ENTITY QUEUE DISPATCHER
// ==============================================================================

type Reply = oneshot::Sender<Result<(), HandlerError>>;

struct Queued {
    event: WebhookEvent,
    // Set for submitted events: the outcome goes back to the submitter
    // instead of the failure sink.
    reply: Option<Reply>,
}

#[derive(Default)]
struct EntityQueue {
    pending: VecDeque<Queued>,
}

struct DispatcherInner {
    config: DispatcherConfig,
    handler: Arc<dyn EventHandler>,
    failure_sink: Option<Arc<dyn FailureSink>>,
    // An entry exists exactly while a drain task owns that entity key.
    queues: Mutex<HashMap<String, EntityQueue>>,
    // None when cross-entity parallelism is unbounded.
    permits: Option<Arc<Semaphore>>,
    stats: RwLock<QueueStats>,
    shutting_down: AtomicBool,
    idle: Notify,
}

/// Serializes events per entity key while different keys run in parallel.
#[derive(Clone)]
pub struct EntityQueueDispatcher {
    inner: Arc<DispatcherInner>,
}

impl EntityQueueDispatcher {
    pub fn new(config: DispatcherConfig, handler: Arc<dyn EventHandler>) -> Self {
        Self::build(config, handler, None)
    }

    pub fn with_failure_sink(config: DispatcherConfig, handler: Arc<dyn EventHandler>, sink: Arc<dyn FailureSink>) -> Self {
        Self::build(config, handler, Some(sink))
    }

    fn build(config: DispatcherConfig, handler: Arc<dyn EventHandler>, failure_sink: Option<Arc<dyn FailureSink>>) -> Self {
        let permits = match config.max_concurrent_entities {
            0 => None,
            limit => Some(Arc::new(Semaphore::new(limit))),
        };
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                handler,
                failure_sink,
                queues: Mutex::new(HashMap::new()),
                permits,
                stats: RwLock::new(QueueStats::default()),
                shutting_down: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        }
    }

    /// Append an event to its entity queue and make sure a drain task runs.
    #[instrument(skip(self, event), fields(entity = %event.entity_key, event_id = %event.event_id))]
    pub async fn enqueue(&self, event: WebhookEvent) -> Result<EnqueueReceipt, QueueError> {
        self.push(event, None).await
    }

    /// Queue an event behind everything already pending for its entity and
    /// wait for its outcome. Failures are returned to the caller and never
    /// reach the failure sink.
    #[instrument(skip(self, event), fields(entity = %event.entity_key, event_id = %event.event_id))]
    pub async fn submit(&self, event: WebhookEvent) -> Result<(), HandlerError> {
        let (reply, outcome) = oneshot::channel();
        self.push(event, Some(reply))
            .await
            .map_err(|e| HandlerError::transient(e.to_string()))?;

        outcome
            .await
            .unwrap_or_else(|_| Err(HandlerError::transient("event was dropped before it was processed")))
    }

    async fn push(&self, event: WebhookEvent, reply: Option<Reply>) -> Result<EnqueueReceipt, QueueError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }

        let event_id = event.event_id;
        let entity_key = event.entity_key.clone();
        let max_pending = self.inner.config.max_pending_per_entity.max(1);

        let (position, dropped_event, spawn_drain) = {
            let mut queues = self.inner.queues.lock().await;
            let spawn_drain = !queues.contains_key(&entity_key);
            let queue = queues.entry(entity_key.clone()).or_default();

            queue.pending.push_back(Queued { event, reply });
            let dropped = if queue.pending.len() > max_pending {
                queue.pending.pop_front().map(|old| old.event.event_id)
            } else {
                None
            };

            (queue.pending.len(), dropped, spawn_drain)
        };

        {
            let mut stats = self.inner.stats.write().await;
            stats.enqueued += 1;
            if dropped_event.is_some() {
                stats.dropped += 1;
            }
        }

        if let Some(dropped) = dropped_event {
            warn!(
                "Entity queue {} overflowed its limit of {}; dropped oldest event {}",
                entity_key, max_pending, dropped
            );
        }

        if spawn_drain {
            let inner = self.inner.clone();
            let key = entity_key.clone();
            tokio::spawn(async move { drain(inner, key).await });
        }

        debug!("Enqueued event {} for {} at position {}", event_id, entity_key, position);

        Ok(EnqueueReceipt {
            event_id,
            entity_key,
            position,
            dropped_event,
        })
    }

    pub async fn stats(&self) -> QueueStats {
        let mut stats = self.inner.stats.read().await.clone();
        let queues = self.inner.queues.lock().await;
        stats.active_entities = queues.len();
        stats.pending_events = queues.values().map(|q| q.pending.len()).sum();
        stats
    }

    /// Wait until every entity queue has drained. Returns false on timeout.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.inner.queues.lock().await.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        timeout(limit, wait).await.is_ok()
    }

    /// Stop accepting events and let queued ones finish.
    pub async fn shutdown(&self) -> bool {
        info!("Initiating graceful shutdown for webhook dispatcher");
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let drained = self.wait_idle(self.inner.config.shutdown_timeout).await;
        if drained {
            info!("Webhook dispatcher drained all entity queues");
        } else {
            let stats = self.stats().await;
            warn!(
                "Webhook dispatcher shutdown timed out with {} events pending across {} entities",
                stats.pending_events, stats.active_entities
            );
        }
        drained
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }
}

async fn drain(inner: Arc<DispatcherInner>, entity_key: String) {
    let _permit = match &inner.permits {
        Some(permits) => match permits.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                error!("Dispatcher semaphore closed; abandoning queue {}", entity_key);
                inner.queues.lock().await.remove(&entity_key);
                inner.idle.notify_waiters();
                return;
            }
        },
        None => None,
    };

    loop {
        let Queued { event, reply } = {
            let mut queues = inner.queues.lock().await;
            match queues.get_mut(&entity_key).and_then(|q| q.pending.pop_front()) {
                Some(queued) => queued,
                None => {
                    queues.remove(&entity_key);
                    if queues.is_empty() {
                        inner.idle.notify_waiters();
                    }
                    debug!("Entity queue {} drained", entity_key);
                    return;
                }
            }
        };

        // A panicking handler must not leave the entity key owned by a dead task.
        let (result, attempts) = match tokio::spawn(process_event(inner.clone(), event.clone())).await {
            Ok(finished) => finished,
            Err(join_error) => {
                error!(
                    "Handler panicked on event {} for {}: {}",
                    event.event_id, entity_key, join_error
                );
                inner.stats.write().await.failed += 1;
                (Err(HandlerError::permanent(format!("handler panicked: {}", join_error))), 1)
            }
        };

        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let (Err(error), Some(sink)) = (&result, &inner.failure_sink) {
                    if error.class != ErrorClass::Validation {
                        sink.record_failure(&event, error, attempts).await;
                    }
                }
            }
        }
    }
}

async fn process_event(inner: Arc<DispatcherInner>, event: WebhookEvent) -> (Result<(), HandlerError>, u32) {
    let handler = inner.handler.as_ref();
    let event_ref = &event;

    let outcome = run_with_retry(&inner.config.retry, inner.config.event_timeout, move |attempt| {
        if attempt > 1 {
            debug!("Retrying event {} (attempt {})", event_ref.event_id, attempt);
        }
        handler.handle(event_ref)
    })
    .await;

    {
        let mut stats = inner.stats.write().await;
        stats.retried += u64::from(outcome.attempts().saturating_sub(1));
        match outcome {
            RetryOutcome::Succeeded { .. } => stats.processed += 1,
            _ => stats.failed += 1,
        }
    }

    match outcome {
        RetryOutcome::Succeeded { attempts } => {
            debug!("Processed {} event {} in {} attempt(s)", event.event_type.as_str(), event.event_id, attempts);
            (Ok(()), attempts)
        }
        RetryOutcome::Rejected { attempts, error } if error.class == ErrorClass::Validation => {
            warn!("Event {} for {} failed validation: {}", event.event_id, event.entity_key, error.message);
            (Err(error), attempts)
        }
        RetryOutcome::Rejected { attempts, error } | RetryOutcome::Exhausted { attempts, error } => {
            error!(
                "Event {} for {} failed after {} attempt(s): {}",
                event.event_id, event.entity_key, attempts, error
            );
            (Err(error), attempts)
        }
    }
}
