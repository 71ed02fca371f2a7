//! Notification dispatcher.
//!
//! Consumes notification jobs with at-least-once semantics: exponential
//! backoff on transient failures, a failed-jobs log for permanent ones,
//! and a sweeper that re-enqueues matching (event, subscription) pairs
//! that never completed, recovering post-commit emit losses.

pub mod delivery;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::domain::{DeliveryMethod, Subscription, TrackingEvent};
use crate::storage::TrackingStore;

pub use delivery::{
    render, Deliverer, DeliveryStatus, LogDeliverer, RenderedNotification, WebhookDeliverer,
};

/// One pending notification: the triggering event, the matching
/// subscription, and how many attempts already happened.
#[derive(Debug, Clone)]
pub struct NotificationJob {
    pub event: TrackingEvent,
    pub subscription: Subscription,
    pub attempt: u32,
}

impl NotificationJob {
    pub fn new(event: TrackingEvent, subscription: Subscription) -> Self {
        Self {
            event,
            subscription,
            attempt: 0,
        }
    }
}

/// The notification dispatcher.
pub struct NotificationDispatcher {
    store: Arc<dyn TrackingStore>,
    deliverers: HashMap<DeliveryMethod, Arc<dyn Deliverer>>,
    semaphores: HashMap<DeliveryMethod, Arc<Semaphore>>,
    config: NotificationConfig,
    jobs_tx: mpsc::Sender<NotificationJob>,
}

impl NotificationDispatcher {
    /// Build the dispatcher with the default delivery set: a real
    /// webhook sink and log sinks for the gateway-backed methods.
    /// Returns the job receiver to hand to `run`.
    pub fn new(
        store: Arc<dyn TrackingStore>,
        config: NotificationConfig,
    ) -> Result<(Self, mpsc::Receiver<NotificationJob>), Box<dyn std::error::Error + Send + Sync>>
    {
        let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity);

        let deadline = Duration::from_secs(config.deliver_deadline_secs);
        let mut deliverers: HashMap<DeliveryMethod, Arc<dyn Deliverer>> = HashMap::new();
        deliverers.insert(
            DeliveryMethod::Webhook,
            Arc::new(WebhookDeliverer::new(deadline)?),
        );
        for method in [
            DeliveryMethod::Email,
            DeliveryMethod::Sms,
            DeliveryMethod::Push,
        ] {
            deliverers.insert(method, Arc::new(LogDeliverer::new(method)));
        }

        let semaphores = DeliveryMethod::ALL
            .into_iter()
            .map(|method| {
                (
                    method,
                    Arc::new(Semaphore::new(config.per_method_concurrency.max(1))),
                )
            })
            .collect();

        Ok((
            Self {
                store,
                deliverers,
                semaphores,
                config,
                jobs_tx,
            },
            jobs_rx,
        ))
    }

    /// Replace a delivery seam (tests, real gateway wiring).
    pub fn set_deliverer(&mut self, method: DeliveryMethod, deliverer: Arc<dyn Deliverer>) {
        self.deliverers.insert(method, deliverer);
    }

    /// Sender for enqueueing jobs (the pipeline holds a clone).
    pub fn sender(&self) -> mpsc::Sender<NotificationJob> {
        self.jobs_tx.clone()
    }

    /// Run the dispatch loop until shutdown. Sweeps on start and on the
    /// configured cadence; drains in-flight deliveries before returning.
    pub async fn run(
        self: Arc<Self>,
        mut jobs_rx: mpsc::Receiver<NotificationJob>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut sweep_timer =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        let mut in_flight = JoinSet::new();

        info!("notification dispatcher started");

        loop {
            tokio::select! {
                _ = sweep_timer.tick() => {
                    let recovered = self.sweep().await;
                    if recovered > 0 {
                        info!(recovered, "sweeper re-enqueued undelivered notifications");
                    }
                }
                job = jobs_rx.recv() => match job {
                    Some(job) => {
                        let this = self.clone();
                        in_flight.spawn(async move { this.dispatch(job).await });
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        // Flush: queued jobs first, then wait out the in-flight set. The
        // caller bounds this with the shutdown deadline.
        while let Ok(job) = jobs_rx.try_recv() {
            let this = self.clone();
            in_flight.spawn(async move { this.dispatch(job).await });
        }
        while in_flight.join_next().await.is_some() {}

        info!("notification dispatcher stopped");
    }

    /// Re-enqueue matching pairs that have no completed delivery record.
    pub async fn sweep(&self) -> usize {
        let pairs = match self
            .store
            .missing_deliveries(self.config.queue_capacity as u32)
            .await
        {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(error = %e, "sweep query failed");
                return 0;
            }
        };

        let mut enqueued = 0;
        for (event, subscription) in pairs {
            match self
                .jobs_tx
                .try_send(NotificationJob::new(event, subscription))
            {
                Ok(()) => enqueued += 1,
                Err(e) => {
                    warn!(error = %e, "sweeper stopped early, queue full");
                    break;
                }
            }
        }
        enqueued
    }

    /// Deliver one job: attempt, back off on transient failures, record
    /// the completion either way.
    async fn dispatch(&self, job: NotificationJob) {
        let method = job.subscription.method;
        let Some(deliverer) = self.deliverers.get(&method) else {
            warn!(method = %method, "no deliverer registered");
            return;
        };
        let Some(semaphore) = self.semaphores.get(&method) else {
            return;
        };

        let rendered = render(&job.event, &job.subscription);
        let deadline = Duration::from_secs(self.config.deliver_deadline_secs);

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs(self.config.retry_initial_secs))
            .with_max_delay(Duration::from_secs(self.config.retry_max_secs))
            .with_jitter()
            .with_max_times(self.config.retry_max_attempts.saturating_sub(1))
            .build();

        let mut attempts = job.attempt;
        let mut last_error = String::new();

        for delay in std::iter::once(Duration::ZERO).chain(backoff) {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempts += 1;

            let permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let result = tokio::time::timeout(
                deadline,
                deliverer.deliver(&job.subscription.endpoint, &rendered),
            )
            .await;
            drop(permit);

            let status = match result {
                Ok(status) => status,
                Err(_) => DeliveryStatus::Transient("delivery deadline exceeded".to_string()),
            };

            match status {
                DeliveryStatus::Ok => {
                    self.finish_delivered(&job, attempts).await;
                    return;
                }
                DeliveryStatus::Transient(error) => {
                    debug!(
                        event_id = %job.event.event_id,
                        subscription_id = %job.subscription.subscription_id,
                        attempts,
                        error = %error,
                        "delivery attempt failed, backing off"
                    );
                    last_error = error;
                }
                DeliveryStatus::Permanent(error) => {
                    self.finish_failed(&job, attempts, &error).await;
                    return;
                }
            }
        }

        self.finish_failed(&job, attempts, &last_error).await;
    }

    async fn finish_delivered(&self, job: &NotificationJob, attempts: u32) {
        if let Err(e) = self
            .store
            .record_delivered(
                job.event.event_id,
                job.subscription.subscription_id,
                attempts,
            )
            .await
        {
            warn!(error = %e, "failed to record delivery");
            return;
        }

        debug!(
            event_id = %job.event.event_id,
            subscription_id = %job.subscription.subscription_id,
            attempts,
            "notification delivered"
        );

        // The event flips to notification_sent once every matching
        // subscription has a completed delivery.
        match self.store.active_for_shipment(job.event.shipment_id).await {
            Ok(subscriptions) => {
                for subscription in subscriptions
                    .iter()
                    .filter(|s| s.matches(&job.event))
                {
                    match self
                        .store
                        .is_delivered(job.event.event_id, subscription.subscription_id)
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => return,
                        Err(e) => {
                            warn!(error = %e, "delivery check failed");
                            return;
                        }
                    }
                }
                if let Err(e) = self.store.mark_notification_sent(job.event.event_id).await {
                    warn!(error = %e, "failed to flag event as notified");
                }
            }
            Err(e) => warn!(error = %e, "subscription lookup failed"),
        }
    }

    async fn finish_failed(&self, job: &NotificationJob, attempts: u32, error: &str) {
        warn!(
            event_id = %job.event.event_id,
            subscription_id = %job.subscription.subscription_id,
            attempts,
            error = %error,
            "notification delivery failed"
        );
        if let Err(e) = self
            .store
            .record_failed(
                job.event.event_id,
                job.subscription.subscription_id,
                attempts,
                error,
            )
            .await
        {
            warn!(error = %e, "failed to record delivery failure");
        }
    }
}
