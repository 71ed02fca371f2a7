//! Subscription & fan-out hub.
//!
//! In-process broker with two logical topics per interest:
//! `shipment:{id}` and `customer:{id}`. Clients are long-lived sessions
//! with bounded outbound queues; publishers never block (drop-oldest
//! back-pressure), and a client that keeps overflowing is disconnected.

mod client;
mod messages;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::domain::{Awb, ShipmentSnapshot, TrackingEvent};
use crate::storage::TrackingStore;

pub use client::{ClientHandle, OutboundQueue, PushOutcome};
pub use messages::{ClientMessage, CriticalNotice, ServerMessage};

/// Capability flags advertised in the welcome message.
const CAPABILITIES: &[&str] = &[
    "tracking_events",
    "critical_updates",
    "customer_topics",
    "ping",
];

/// Event published by the pipeline after a commit.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub shipment_id: Uuid,
    pub awb: Awb,
    pub customer_id: Uuid,
    pub event: TrackingEvent,
    pub snapshot: ShipmentSnapshot,
}

/// Fan-out accounting for one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Messages enqueued across all subscribed clients.
    pub delivered: usize,
    /// Messages that displaced an older one (overflow drops).
    pub dropped: usize,
    /// Clients force-disconnected for repeated overflow.
    pub disconnected: usize,
}

/// Authenticated identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub subscriber_id: Uuid,
    /// Present for customer-scoped sessions; such sessions may only
    /// subscribe to shipments they own.
    pub customer_id: Option<Uuid>,
}

/// Token validation seam. Real token minting lives in the front-end's
/// auth layer; the hub only needs a yes/no with an identity.
pub trait Authenticator: Send + Sync {
    fn authenticate(
        &self,
        token: &str,
        subscriber_id: Uuid,
        customer_id: Option<Uuid>,
    ) -> Result<ClientIdentity, String>;
}

/// Shared-secret authenticator for standalone deployments.
pub struct SharedSecretAuthenticator {
    secret: String,
}

impl SharedSecretAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl Authenticator for SharedSecretAuthenticator {
    fn authenticate(
        &self,
        token: &str,
        subscriber_id: Uuid,
        customer_id: Option<Uuid>,
    ) -> Result<ClientIdentity, String> {
        if self.secret.is_empty() {
            return Err("authentication is not configured".to_string());
        }
        if token != self.secret {
            return Err("invalid token".to_string());
        }
        Ok(ClientIdentity {
            subscriber_id,
            customer_id,
        })
    }
}

/// How a subscriber names the shipment.
#[derive(Debug, Clone)]
pub enum ShipmentRef {
    Id(Uuid),
    Awb(Awb),
}

struct ClientEntry {
    queue: Arc<OutboundQueue>,
    identity: Option<ClientIdentity>,
    shipment_topics: HashSet<Uuid>,
    customer_topics: HashSet<Uuid>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<Uuid, ClientEntry>,
    shipment_topics: HashMap<Uuid, HashSet<Uuid>>,
    customer_topics: HashMap<Uuid, HashSet<Uuid>>,
}

/// The in-process subscription hub.
pub struct TrackingHub {
    store: Arc<dyn TrackingStore>,
    auth: Arc<dyn Authenticator>,
    config: HubConfig,
    state: RwLock<HubState>,
}

impl TrackingHub {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        auth: Arc<dyn Authenticator>,
        config: HubConfig,
    ) -> Self {
        Self {
            store,
            auth,
            config,
            state: RwLock::new(HubState::default()),
        }
    }

    /// Allocate a session and emit the welcome message.
    pub async fn connect(&self) -> ClientHandle {
        let session_id = Uuid::new_v4();
        let queue = Arc::new(OutboundQueue::new(self.config.queue_capacity));

        queue
            .push(ServerMessage::Connected {
                session_id,
                capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
                server_time: Utc::now(),
            })
            .await;

        let mut state = self.state.write().await;
        state.clients.insert(
            session_id,
            ClientEntry {
                queue: queue.clone(),
                identity: None,
                shipment_topics: HashSet::new(),
                customer_topics: HashSet::new(),
            },
        );

        debug!(session_id = %session_id, "client connected");
        ClientHandle::new(session_id, queue)
    }

    /// Route one inbound message. Replies land on the client's queue.
    pub async fn handle_message(&self, session_id: Uuid, message: ClientMessage) {
        match message {
            ClientMessage::Authenticate {
                token,
                subscriber_id,
                customer_id,
            } => {
                self.authenticate(session_id, &token, subscriber_id, customer_id)
                    .await
            }
            ClientMessage::SubscribeShipment { shipment_id, awb } => {
                let reference = match (shipment_id, awb) {
                    (Some(id), _) => Some(ShipmentRef::Id(id)),
                    (None, Some(raw)) => match raw.parse::<Awb>() {
                        Ok(awb) => Some(ShipmentRef::Awb(awb)),
                        Err(e) => {
                            self.send_to(session_id, ServerMessage::SubscriptionError {
                                reason: e.to_string(),
                            })
                            .await;
                            None
                        }
                    },
                    (None, None) => {
                        self.send_to(session_id, ServerMessage::SubscriptionError {
                            reason: "shipment_id or awb is required".to_string(),
                        })
                        .await;
                        None
                    }
                };
                if let Some(reference) = reference {
                    self.subscribe_shipment(session_id, reference).await;
                }
            }
            ClientMessage::UnsubscribeShipment { shipment_id } => {
                self.unsubscribe_shipment(session_id, shipment_id).await
            }
            ClientMessage::SubscribeCustomer { customer_id } => {
                self.subscribe_customer(session_id, customer_id).await
            }
            ClientMessage::Ping => {
                self.send_to(session_id, ServerMessage::Pong {
                    server_time: Utc::now(),
                })
                .await
            }
        }
    }

    /// Associate the session with a subscriber identity.
    pub async fn authenticate(
        &self,
        session_id: Uuid,
        token: &str,
        subscriber_id: Uuid,
        customer_id: Option<Uuid>,
    ) {
        match self.auth.authenticate(token, subscriber_id, customer_id) {
            Ok(identity) => {
                let subscriber_id = identity.subscriber_id;
                let mut state = self.state.write().await;
                if let Some(entry) = state.clients.get_mut(&session_id) {
                    entry.identity = Some(identity);
                }
                drop(state);
                self.send_to(session_id, ServerMessage::Authenticated { subscriber_id })
                    .await;
            }
            Err(reason) => {
                warn!(session_id = %session_id, reason = %reason, "authentication refused");
                self.send_to(session_id, ServerMessage::AuthError { reason })
                    .await;
            }
        }
    }

    /// Join `shipment:{id}` after access validation, then emit the
    /// subscribed ack with a snapshot and the recent history.
    pub async fn subscribe_shipment(&self, session_id: Uuid, reference: ShipmentRef) {
        let Some(identity) = self.identity_of(session_id).await else {
            self.send_to(session_id, ServerMessage::SubscriptionError {
                reason: "authentication required".to_string(),
            })
            .await;
            return;
        };

        let shipment = match &reference {
            ShipmentRef::Id(id) => self.store.shipment(*id).await,
            ShipmentRef::Awb(awb) => self.store.shipment_by_awb(awb).await,
        };

        let shipment = match shipment {
            Ok(Some(shipment)) => shipment,
            Ok(None) => {
                self.send_to(session_id, ServerMessage::SubscriptionError {
                    reason: "shipment not found".to_string(),
                })
                .await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "subscribe lookup failed");
                self.send_to(session_id, ServerMessage::SubscriptionError {
                    reason: "shipment lookup failed".to_string(),
                })
                .await;
                return;
            }
        };

        if let Some(customer_id) = identity.customer_id {
            if customer_id != shipment.customer_id {
                self.send_to(session_id, ServerMessage::SubscriptionError {
                    reason: "access denied".to_string(),
                })
                .await;
                return;
            }
        }

        let recent = self
            .store
            .recent_events(shipment.shipment_id, self.config.snapshot_events)
            .await
            .unwrap_or_default();

        {
            let mut state = self.state.write().await;
            let Some(entry) = state.clients.get_mut(&session_id) else {
                return;
            };
            entry.shipment_topics.insert(shipment.shipment_id);
            state
                .shipment_topics
                .entry(shipment.shipment_id)
                .or_default()
                .insert(session_id);
        }

        let snapshot = ShipmentSnapshot::from(&shipment);
        self.send_to(session_id, ServerMessage::Subscribed {
            shipment_id: shipment.shipment_id,
            topic: format!("shipment:{}", shipment.shipment_id),
            snapshot,
        })
        .await;
        self.send_to(session_id, ServerMessage::BulkTrackingUpdate {
            shipment_id: shipment.shipment_id,
            events: recent,
        })
        .await;

        debug!(session_id = %session_id, shipment_id = %shipment.shipment_id,
            "joined shipment topic");
    }

    /// Join `customer:{id}`; sessions may only watch their own customer.
    pub async fn subscribe_customer(&self, session_id: Uuid, customer_id: Uuid) {
        let Some(identity) = self.identity_of(session_id).await else {
            self.send_to(session_id, ServerMessage::SubscriptionError {
                reason: "authentication required".to_string(),
            })
            .await;
            return;
        };

        if let Some(own) = identity.customer_id {
            if own != customer_id {
                self.send_to(session_id, ServerMessage::SubscriptionError {
                    reason: "access denied".to_string(),
                })
                .await;
                return;
            }
        }

        {
            let mut state = self.state.write().await;
            let Some(entry) = state.clients.get_mut(&session_id) else {
                return;
            };
            entry.customer_topics.insert(customer_id);
            state
                .customer_topics
                .entry(customer_id)
                .or_default()
                .insert(session_id);
        }

        debug!(session_id = %session_id, customer_id = %customer_id,
            "joined customer topic");
    }

    /// Leave one shipment topic.
    pub async fn unsubscribe_shipment(&self, session_id: Uuid, shipment_id: Uuid) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.clients.get_mut(&session_id) {
            entry.shipment_topics.remove(&shipment_id);
        }
        if let Some(members) = state.shipment_topics.get_mut(&shipment_id) {
            members.remove(&session_id);
            if members.is_empty() {
                state.shipment_topics.remove(&shipment_id);
            }
        }
    }

    /// Drop the session: leave every topic and close the queue.
    pub async fn disconnect(&self, session_id: Uuid) {
        let mut state = self.state.write().await;
        Self::remove_session(&mut state, session_id);
    }

    fn remove_session(state: &mut HubState, session_id: Uuid) {
        if let Some(entry) = state.clients.remove(&session_id) {
            for shipment_id in &entry.shipment_topics {
                if let Some(members) = state.shipment_topics.get_mut(shipment_id) {
                    members.remove(&session_id);
                    if members.is_empty() {
                        state.shipment_topics.remove(shipment_id);
                    }
                }
            }
            for customer_id in &entry.customer_topics {
                if let Some(members) = state.customer_topics.get_mut(customer_id) {
                    members.remove(&session_id);
                    if members.is_empty() {
                        state.customer_topics.remove(customer_id);
                    }
                }
            }
            entry.queue.close();
            debug!(session_id = %session_id, "client disconnected");
        }
    }

    /// Fan a bus event out to the shipment and customer topics.
    ///
    /// Every client on either topic gets a `tracking_event`; flagged
    /// events additionally get a `critical_update` on the same queue.
    /// Customer-topic members also get a `customer_tracking_update`.
    /// A client on both topics receives the event messages once.
    pub async fn publish(&self, bus_event: &BusEvent) -> PublishOutcome {
        let (event_members, customer_members) = {
            let state = self.state.read().await;
            let collect = |members: Option<&HashSet<Uuid>>| -> Vec<(Uuid, Arc<OutboundQueue>)> {
                members
                    .into_iter()
                    .flatten()
                    .filter_map(|session_id| {
                        state
                            .clients
                            .get(session_id)
                            .map(|entry| (*session_id, entry.queue.clone()))
                    })
                    .collect()
            };
            let customer_members = collect(state.customer_topics.get(&bus_event.customer_id));
            let mut event_members = collect(state.shipment_topics.get(&bus_event.shipment_id));
            for (session_id, queue) in &customer_members {
                if !event_members.iter().any(|(existing, _)| existing == session_id) {
                    event_members.push((*session_id, queue.clone()));
                }
            }
            (event_members, customer_members)
        };

        let mut outcome = PublishOutcome::default();
        let mut overflowed: Vec<Uuid> = Vec::new();

        let event_message = ServerMessage::TrackingEvent {
            shipment_id: bus_event.shipment_id,
            awb: bus_event.awb.clone(),
            event: bus_event.event.clone(),
            shipment_snapshot: bus_event.snapshot.clone(),
        };
        let critical_message = bus_event.event.is_noteworthy().then(|| {
            ServerMessage::CriticalUpdate {
                shipment_id: bus_event.shipment_id,
                awb: bus_event.awb.clone(),
                event: bus_event.event.clone(),
                shipment_snapshot: bus_event.snapshot.clone(),
                notification: CriticalNotice::for_event(&bus_event.event),
            }
        });

        for (session_id, queue) in &event_members {
            self.account(
                queue.push(event_message.clone()).await,
                queue,
                *session_id,
                &mut outcome,
                &mut overflowed,
            );
            if let Some(critical) = &critical_message {
                self.account(
                    queue.push(critical.clone()).await,
                    queue,
                    *session_id,
                    &mut outcome,
                    &mut overflowed,
                );
            }
        }

        let customer_message = ServerMessage::CustomerTrackingUpdate {
            customer_id: bus_event.customer_id,
            shipment_update: bus_event.snapshot.clone(),
        };
        for (session_id, queue) in &customer_members {
            self.account(
                queue.push(customer_message.clone()).await,
                queue,
                *session_id,
                &mut outcome,
                &mut overflowed,
            );
        }

        if !overflowed.is_empty() {
            let mut state = self.state.write().await;
            for session_id in overflowed {
                if state.clients.contains_key(&session_id) {
                    warn!(session_id = %session_id, "disconnecting client after repeated overflow");
                    Self::remove_session(&mut state, session_id);
                    outcome.disconnected += 1;
                }
            }
        }

        debug!(
            shipment_id = %bus_event.shipment_id,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "published bus event"
        );
        outcome
    }

    fn account(
        &self,
        push: PushOutcome,
        queue: &Arc<OutboundQueue>,
        session_id: Uuid,
        outcome: &mut PublishOutcome,
        overflowed: &mut Vec<Uuid>,
    ) {
        match push {
            PushOutcome::Queued => outcome.delivered += 1,
            PushOutcome::DroppedOldest => {
                outcome.delivered += 1;
                outcome.dropped += 1;
                if queue.dropped() > self.config.max_drops && !overflowed.contains(&session_id) {
                    overflowed.push(session_id);
                }
            }
            PushOutcome::Closed => {}
        }
    }

    /// Broadcast an operational notice to every connected client.
    pub async fn broadcast_system(&self, message: &str, severity: crate::domain::EventSeverity) {
        let state = self.state.read().await;
        for entry in state.clients.values() {
            entry
                .queue
                .push(ServerMessage::SystemNotification {
                    message: message.to_string(),
                    severity,
                })
                .await;
        }
    }

    /// Broadcast shutdown and drop every client.
    pub async fn shutdown(&self, reason: &str) {
        let mut state = self.state.write().await;
        let sessions: Vec<Uuid> = state.clients.keys().copied().collect();
        info!(clients = sessions.len(), "hub shutting down");

        for session_id in sessions {
            if let Some(entry) = state.clients.get(&session_id) {
                entry
                    .queue
                    .push(ServerMessage::ServiceShutdown {
                        reason: reason.to_string(),
                        server_time: Utc::now(),
                    })
                    .await;
            }
            Self::remove_session(&mut state, session_id);
        }
    }

    pub async fn client_count(&self) -> usize {
        self.state.read().await.clients.len()
    }

    async fn identity_of(&self, session_id: Uuid) -> Option<ClientIdentity> {
        self.state
            .read()
            .await
            .clients
            .get(&session_id)
            .and_then(|entry| entry.identity.clone())
    }

    async fn send_to(&self, session_id: Uuid, message: ServerMessage) {
        let queue = {
            let state = self.state.read().await;
            state.clients.get(&session_id).map(|e| e.queue.clone())
        };
        if let Some(queue) = queue {
            queue.push(message).await;
        }
    }
}
