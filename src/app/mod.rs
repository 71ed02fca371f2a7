//! Application assembly and lifecycle.
//!
//! Components are constructed once at process start and injected
//! explicitly; there are no globals. Lifecycle: construct -> start ->
//! serve -> graceful shutdown (stop intake, drain the tick in progress,
//! flush in-flight notifications up to the deadline, close the store).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::init_adapters;
use crate::api::TrackingApi;
use crate::config::Config;
use crate::hub::{SharedSecretAuthenticator, TrackingHub};
use crate::notify::{NotificationDispatcher, NotificationJob};
use crate::pipeline::TrackingPipeline;
use crate::scheduler::PollScheduler;
use crate::storage::TrackingStore;

type BuildError = Box<dyn std::error::Error + Send + Sync>;

/// The assembled tracking service.
pub struct App {
    config: Config,
    store: Arc<dyn TrackingStore>,
    hub: Arc<TrackingHub>,
    api: Arc<TrackingApi>,
    dispatcher: Arc<NotificationDispatcher>,
    scheduler: Arc<PollScheduler>,
    shutdown_tx: watch::Sender<bool>,
    jobs_rx: Option<mpsc::Receiver<NotificationJob>>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Build against the configured storage backend.
    #[cfg(feature = "sqlite")]
    pub async fn build(config: Config) -> Result<Self, BuildError> {
        let store = crate::storage::init_storage(&config.database).await?;
        Self::with_store(store, config)
    }

    /// Wire the component graph over an existing store (tests use the
    /// in-memory mock here).
    pub fn with_store(store: Arc<dyn TrackingStore>, config: Config) -> Result<Self, BuildError> {
        let auth = Arc::new(SharedSecretAuthenticator::new(
            config.auth.token_secret.clone(),
        ));
        let hub = Arc::new(TrackingHub::new(
            store.clone(),
            auth,
            config.hub.clone(),
        ));

        let (dispatcher, jobs_rx) =
            NotificationDispatcher::new(store.clone(), config.notifications.clone())?;
        let dispatcher = Arc::new(dispatcher);

        let pipeline = Arc::new(TrackingPipeline::new(
            store.clone(),
            hub.clone(),
            dispatcher.sender(),
        ));

        let adapters = init_adapters(&config.feed)?;
        let scheduler = Arc::new(PollScheduler::new(
            store.clone(),
            adapters,
            pipeline.clone(),
            config.scheduler.clone(),
        ));

        let api = Arc::new(TrackingApi::new(
            store.clone(),
            pipeline,
            scheduler.clone(),
        ));

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            hub,
            api,
            dispatcher,
            scheduler,
            shutdown_tx,
            jobs_rx: Some(jobs_rx),
            tasks: Vec::new(),
        })
    }

    /// Spawn the scheduler and dispatcher loops. Idempotent.
    pub fn start(&mut self) {
        let Some(jobs_rx) = self.jobs_rx.take() else {
            return;
        };

        let dispatcher = self.dispatcher.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.tasks
            .push(tokio::spawn(dispatcher.run(jobs_rx, shutdown)));

        let scheduler = self.scheduler.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(async move {
            scheduler.run(shutdown).await;
        }));

        info!("tracking service started");
    }

    /// Handler surface for the front-end.
    pub fn api(&self) -> Arc<TrackingApi> {
        self.api.clone()
    }

    /// Push hub for the front-end's session handling.
    pub fn hub(&self) -> Arc<TrackingHub> {
        self.hub.clone()
    }

    pub fn store(&self) -> Arc<dyn TrackingStore> {
        self.store.clone()
    }

    /// Graceful shutdown: notify clients, stop the loops, drain within
    /// the deadline, then close the store pool.
    pub async fn shutdown(self) {
        info!("shutting down");

        self.hub.shutdown("service shutting down").await;
        let _ = self.shutdown_tx.send(true);

        let deadline = Duration::from_secs(self.config.shutdown.deadline_secs.max(1));
        let drain = futures::future::join_all(self.tasks);
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!(
                deadline_secs = self.config.shutdown.deadline_secs,
                "shutdown deadline hit before all tasks drained"
            );
        }

        self.store.close().await;
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::api::Caller;
    use crate::storage::MockTrackingStore;

    fn quick_config() -> Config {
        let mut config = Config::for_test();
        config.shutdown.deadline_secs = 1;
        config
    }

    #[tokio::test]
    async fn test_lifecycle_start_and_shutdown() {
        let store = Arc::new(MockTrackingStore::new());
        let mut app = App::with_store(store, quick_config()).unwrap();
        app.start();
        // Second start is a no-op, not a double spawn.
        app.start();
        assert_eq!(app.tasks.len(), 2);

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_api_works_against_wired_graph() {
        let store = Arc::new(MockTrackingStore::new());
        let mut app = App::with_store(store, quick_config()).unwrap();
        app.start();

        let api = app.api();
        let operator = Caller::operator(Uuid::new_v4());
        let shipment = api
            .create_shipment(
                &operator,
                crate::domain::NewShipment {
                    awb: "125-12345678".parse().unwrap(),
                    customer_id: Uuid::new_v4(),
                    origin: "SIN".to_string(),
                    destination: "HKG".to_string(),
                    route: vec![],
                    flight_number: None,
                    flight_date: None,
                    pieces: 1,
                    weight_kg: 3.0,
                    volume_m3: None,
                    commodity: "parts".to_string(),
                    declared_value: None,
                    currency: None,
                    pickup_date: None,
                    estimated_delivery_date: None,
                    tracking_frequency_minutes: None,
                },
            )
            .await
            .unwrap();

        let snapshot = api.track_by_awb(&shipment.awb).await.unwrap();
        assert_eq!(snapshot.snapshot.shipment_id, shipment.shipment_id);

        let health = api.health().await;
        assert!(health.healthy);

        app.shutdown().await;
    }
}
