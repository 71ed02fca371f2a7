//! Poll scheduler.
//!
//! Sweeps on a global tick rather than per-shipment timers: each tick
//! selects a bounded batch of due shipments and drives the source
//! adapters in parallel under per-source concurrency caps. Quiescent
//! shipments (delivered, cancelled, tracking off) are filtered out by
//! the store query and never touched again.


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapters::{AdapterError, SourceAdapter};
use crate::config::SchedulerConfig;
use crate::domain::{Shipment, SourceType};
use crate::pipeline::{ApplyOutcome, TrackingPipeline};
use crate::storage::TrackingStore;

/// Accounting for one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Shipments selected as due.
    pub selected: usize,
    /// Events created across all applies.
    pub events_created: usize,
    /// Events dropped as duplicates.
    pub duplicates: usize,
    /// Fetches that failed transiently (timeouts included).
    pub transient_failures: usize,
    /// Fetches that failed permanently.
    pub permanent_failures: usize,
}

/// Accounting for one shipment refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub events_created: usize,
    pub duplicates: usize,
    pub transient_failures: usize,
    pub permanent_failures: usize,
}

/// The poll scheduler.
pub struct PollScheduler {
    store: Arc<dyn TrackingStore>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    pipeline: Arc<TrackingPipeline>,
    config: SchedulerConfig,
    semaphores: HashMap<SourceType, Arc<Semaphore>>,
}

impl PollScheduler {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        pipeline: Arc<TrackingPipeline>,
        config: SchedulerConfig,
    ) -> Self {
        let semaphores = adapters
            .iter()
            .map(|adapter| {
                (
                    adapter.source_type(),
                    Arc::new(Semaphore::new(config.per_source_concurrency.max(1))),
                )
            })
            .collect();

        Self {
            store,
            adapters,
            pipeline,
            config,
            semaphores,
        }
    }

    /// Run the sweep loop until shutdown. The tick in progress drains
    /// before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.interval_minutes.max(1) * 60);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_minutes = self.config.interval_minutes,
            batch_size = self.config.batch_size,
            "poll scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.run_tick().await;
                    if summary.selected > 0 {
                        info!(
                            selected = summary.selected,
                            created = summary.events_created,
                            duplicates = summary.duplicates,
                            transient = summary.transient_failures,
                            permanent = summary.permanent_failures,
                            "tick complete"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!("poll scheduler stopped");
                    return;
                }
            }
        }
    }

    /// One sweep: select due shipments, refresh each, stamp
    /// `last_tracked_at` exactly once per selected shipment.
    pub async fn run_tick(&self) -> TickSummary {
        let tick_time = Utc::now();

        let due = match self
            .store
            .due_for_poll(tick_time, self.config.batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "due-shipment query failed");
                return TickSummary::default();
            }
        };

        let mut summary = TickSummary {
            selected: due.len(),
            ..TickSummary::default()
        };
        if due.is_empty() {
            return summary;
        }

        debug!(selected = due.len(), "refreshing due shipments");

        let refreshes = join_all(due.iter().map(|shipment| self.refresh_shipment(shipment))).await;
        for refresh in refreshes {
            summary.events_created += refresh.events_created;
            summary.duplicates += refresh.duplicates;
            summary.transient_failures += refresh.transient_failures;
            summary.permanent_failures += refresh.permanent_failures;
        }

        // Success or failure, the whole batch moves out of the due set
        // until its next interval. Transient failures do not accelerate
        // retries.
        let ids: Vec<_> = due.iter().map(|s| s.shipment_id).collect();
        if let Err(e) = self.store.touch_last_tracked(&ids, tick_time).await {
            warn!(error = %e, "failed to stamp last_tracked_at");
        }

        summary
    }

    /// Drive every adapter for one shipment, in parallel, each under its
    /// source's concurrency cap and the fetch deadline.
    pub async fn refresh_shipment(&self, shipment: &Shipment) -> RefreshSummary {
        let fetches = join_all(
            self.adapters
                .iter()
                .map(|adapter| self.fetch_one(adapter.clone(), shipment)),
        )
        .await;

        let mut summary = RefreshSummary::default();
        for (source_type, result) in fetches {
            match result {
                Ok(events) => {
                    for event in events {
                        match self
                            .pipeline
                            .apply(shipment.shipment_id, event, source_type)
                            .await
                        {
                            Ok(ApplyOutcome::Created { .. }) => summary.events_created += 1,
                            Ok(ApplyOutcome::Duplicate) => summary.duplicates += 1,
                            Ok(ApplyOutcome::Rejected(reason)) => {
                                debug!(
                                    shipment_id = %shipment.shipment_id,
                                    reason = reason.as_str(),
                                    "apply rejected during refresh"
                                );
                            }
                            Err(e) => {
                                warn!(
                                    shipment_id = %shipment.shipment_id,
                                    error = %e,
                                    "apply failed during refresh"
                                );
                            }
                        }
                    }
                }
                Err(AdapterError::Transient(error)) => {
                    summary.transient_failures += 1;
                    debug!(
                        shipment_id = %shipment.shipment_id,
                        source = %source_type,
                        error = %error,
                        "transient fetch failure, back on the next interval"
                    );
                }
                Err(AdapterError::Permanent(error)) => {
                    summary.permanent_failures += 1;
                    warn!(
                        shipment_id = %shipment.shipment_id,
                        source = %source_type,
                        error = %error,
                        "permanent fetch failure, operator attention needed"
                    );
                }
            }
        }
        summary
    }

    async fn fetch_one(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        shipment: &Shipment,
    ) -> (SourceType, crate::adapters::Result<Vec<crate::domain::CanonicalEvent>>) {
        let source_type = adapter.source_type();

        let permit = match self.semaphores.get(&source_type) {
            Some(semaphore) => semaphore.acquire().await,
            None => {
                return (
                    source_type,
                    Err(AdapterError::Permanent("unknown source".to_string())),
                )
            }
        };
        let _permit = match permit {
            Ok(permit) => permit,
            Err(_) => {
                return (
                    source_type,
                    Err(AdapterError::Transient("semaphore closed".to_string())),
                )
            }
        };

        let deadline = Duration::from_secs(self.config.fetch_deadline_secs);
        let result = match timeout(deadline, adapter.fetch(shipment)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Transient(format!(
                "fetch deadline of {}s exceeded",
                self.config.fetch_deadline_secs
            ))),
        };

        (source_type, result)
    }
}
