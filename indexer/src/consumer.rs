use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tokio_retry::strategy::ExponentialBackoff;

use crate::errors::Error;
use crate::publisher::MessageHandler;
use crate::shutdown::Shutdown;

/// A message handed out by a broker, with the coordinates needed to ack it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Bytes,
}

/// A subscription to one (topic, channel) pair.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Waits for the next message. Must be safe to drop mid-wait.
    async fn recv(&self) -> Result<Delivery, Error>;

    /// Marks the delivery as processed so it isn't handed out again.
    fn ack(&self, delivery: &Delivery) -> Result<(), Error>;

    /// Leaves the subscription.
    fn close(&self);
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Upper bound of unacknowledged messages held by the consumer.
    pub max_in_flight: usize,
    /// Attempts per message before giving up, 0 retries forever.
    pub max_attempts: u32,
    /// First retry delay, doubled on every further attempt.
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 200,
            max_attempts: 5,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(120),
        }
    }
}

impl ConsumerConfig {
    /// Delays between the attempts at one message, `backoff` doubling up to
    /// `max_backoff`. Finite when `max_attempts` is set.
    fn retry_delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let half = (self.backoff.as_millis() / 2).max(1) as u64;
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(half)
            .max_delay(self.max_backoff);

        match self.max_attempts {
            0 => Box::new(strategy),
            n => Box::new(strategy.take(n as usize - 1)),
        }
    }
}

/// Consumer for a single topic, not yet running.
pub struct Consumer {
    topic: String,
    channel: String,
    config: ConsumerConfig,
    source: Arc<dyn MessageSource>,
    handler: Option<Arc<dyn MessageHandler>>,
    concurrency: usize,
}

impl Consumer {
    pub fn new(
        topic: impl Into<String>,
        channel: impl Into<String>,
        config: ConsumerConfig,
        source: Arc<dyn MessageSource>,
    ) -> Result<Self, Error> {
        if config.max_in_flight == 0 {
            return Err(Error::Config("max-in-flight must be greater than 0".into()));
        }

        Ok(Self {
            topic: topic.into(),
            channel: channel.into(),
            config,
            source,
            handler: None,
            concurrency: 0,
        })
    }

    /// Runs `handler` on `concurrency` worker slots. All slots share the
    /// same handler instance.
    pub fn add_concurrent_handlers(&mut self, handler: Arc<dyn MessageHandler>, concurrency: usize) {
        self.handler = Some(handler);
        self.concurrency = concurrency;
    }

    /// Leaves the subscription without ever starting.
    pub fn discard(self) {
        self.source.close();
    }

    /// Spawns the puller and worker slots.
    pub fn start(self) -> Result<ConsumerHandle, Error> {
        let handler = match self.handler {
            Some(h) if self.concurrency > 0 => h,
            _ => {
                self.source.close();
                return Err(Error::Config(format!(
                    "consumer for topic '{}' has no handlers",
                    self.topic
                )));
            }
        };

        info!(
            "Starting consumer for {}/{} with {} handlers, max-in-flight {}",
            self.topic, self.channel, self.concurrency, self.config.max_in_flight
        );

        let sd = Arc::new(Shutdown::new());
        let context = Arc::new(Context {
            topic: self.topic.clone(),
            source: self.source,
            handler,
            config: self.config,
            sd: sd.clone(),
        });
        let task = tokio::spawn(run(context, self.concurrency));

        Ok(ConsumerHandle {
            topic: self.topic,
            channel: self.channel,
            sd,
            task,
        })
    }
}

/// A running consumer.
pub struct ConsumerHandle {
    topic: String,
    channel: String,
    sd: Arc<Shutdown>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Asks the consumer to stop pulling and drain. Returns immediately.
    pub fn stop(&self) {
        if self.sd.begin() {
            info!("Stopping consumer for {}/{}", self.topic, self.channel);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits until in-flight messages are done and the source is closed.
    pub async fn stopped(self) {
        if let Err(e) = self.task.await {
            error!("Consumer for topic '{}' ended abnormally: {}", self.topic, e);
        }
    }
}

struct Context {
    topic: String,
    source: Arc<dyn MessageSource>,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
    sd: Arc<Shutdown>,
}

/// A delivery together with the credit it occupies.
struct InFlight {
    delivery: Delivery,
    _credit: OwnedSemaphorePermit,
}

type Queue = Arc<Mutex<mpsc::Receiver<InFlight>>>;

async fn run(context: Arc<Context>, concurrency: usize) {
    let credits = Arc::new(Semaphore::new(context.config.max_in_flight));
    let (tx, rx) = mpsc::channel(context.config.max_in_flight);
    let queue: Queue = Arc::new(Mutex::new(rx));

    let mut workers = JoinSet::new();
    for slot in 0..concurrency {
        workers.spawn(work(context.clone(), slot, queue.clone()));
    }
    drop(queue);

    pull(&context, credits, tx).await;

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!("Worker for topic '{}' failed: {}", context.topic, e);
        }
    }

    context.source.close();
    context.sd.complete();
    info!("Consumer for topic '{}' stopped", context.topic);
}

async fn pull(context: &Context, credits: Arc<Semaphore>, tx: mpsc::Sender<InFlight>) {
    loop {
        let credit = tokio::select! {
            biased;
            _ = context.sd.wait_begin() => break,
            credit = credits.clone().acquire_owned() => match credit {
                Ok(c) => c,
                Err(_) => break,
            },
        };

        let received = tokio::select! {
            biased;
            _ = context.sd.wait_begin() => break,
            received = context.source.recv() => received,
        };

        match received {
            Ok(delivery) => {
                trace!(
                    "Received {}:{}:{}",
                    delivery.topic,
                    delivery.partition,
                    delivery.offset
                );
                let in_flight = InFlight {
                    delivery,
                    _credit: credit,
                };
                if tx.send(in_flight).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                drop(credit);
                warn!("Error receiving from topic '{}': {}", context.topic, e);
                tokio::select! {
                    biased;
                    _ = context.sd.wait_begin() => break,
                    _ = sleep(context.config.backoff) => {}
                }
            }
        }
    }

    debug!("Stopped pulling from topic '{}'", context.topic);
}

async fn work(context: Arc<Context>, slot: usize, queue: Queue) {
    // The queue closes once the puller is gone, so everything it already
    // handed over is processed before the slot exits.
    loop {
        let next = queue.lock().await.recv().await;
        let Some(in_flight) = next else {
            break;
        };
        context.process(slot, &in_flight.delivery).await;
    }

    trace!("Handler {} for topic '{}' exited", slot, context.topic);
}

impl Context {
    async fn process(&self, slot: usize, delivery: &Delivery) {
        let mut delays = self.config.retry_delays();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let err = match self.handler.handle_message(&delivery.payload).await {
                Ok(()) => {
                    self.ack(delivery);
                    return;
                }
                Err(e) => e,
            };

            let Some(delay) = delays.next() else {
                error!(
                    "[{}] Giving up on {}:{}:{} after {} attempts: {}",
                    slot, delivery.topic, delivery.partition, delivery.offset, attempts, err
                );
                self.ack(delivery);
                return;
            };

            warn!(
                "[{}] Failed to handle {}:{}:{} (attempt {}), retrying in {:?}: {}",
                slot, delivery.topic, delivery.partition, delivery.offset, attempts, delay, err
            );

            tokio::select! {
                biased;
                _ = self.sd.wait_begin() => {
                    debug!(
                        "[{}] Leaving {}:{}:{} unacknowledged for redelivery",
                        slot, delivery.topic, delivery.partition, delivery.offset
                    );
                    return;
                }
                _ = sleep(delay) => {}
            }
        }
    }

    fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.source.ack(delivery) {
            warn!(
                "Failed to acknowledge {}:{}:{}: {}",
                delivery.topic, delivery.partition, delivery.offset, e
            );
        }
    }
}
