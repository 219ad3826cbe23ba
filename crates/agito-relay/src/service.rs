//! Aggregator task with tokio mpsc command pattern.
//!
//! The [`Aggregator`] lives in one dedicated task and is only ever touched
//! from there. Relay connection tasks and application code talk to it
//! through [`AggregatorCommand`]s, so ingest, reconciliation and subscriber
//! notification never run in parallel.

use std::sync::Arc;

use agito_shared::{Identity, IdentityKey, ProfileContent, ProfileRecord};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, Published};
use crate::backoff::ReconnectPolicy;
use crate::config::AggregatorConfig;
use crate::connection::spawn_relay_connection;
use crate::endpoints::{EndpointStatus, OutboundSender};
use crate::error::RelayError;
use crate::subscribers::{ProfileSubscriber, SubscriberId};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands sent *into* the aggregator task.
pub enum AggregatorCommand {
    /// A raw text frame received from a relay.
    Inbound { relay: String, text: String },
    /// A relay connection attempt started.
    RelayConnecting { relay: String },
    /// A relay connection opened; frames for it go to `outbound`.
    RelayOpened {
        relay: String,
        outbound: OutboundSender,
    },
    /// A relay connection closed or could not be established.
    RelayClosed { relay: String },
    /// Replay a cached profile and query open relays for it.
    FetchProfile(IdentityKey),
    /// Register a subscriber; `global` replays the whole cache to it first.
    Subscribe {
        subscriber: Box<dyn ProfileSubscriber>,
        global: bool,
        reply: oneshot::Sender<SubscriberId>,
    },
    Unsubscribe(SubscriberId),
    /// Snapshot of every cached profile.
    Snapshot(oneshot::Sender<Vec<ProfileRecord>>),
    GetProfile {
        key: IdentityKey,
        reply: oneshot::Sender<Option<ProfileRecord>>,
    },
    /// Sign and broadcast new metadata for `identity`.
    Publish {
        identity: Identity,
        content: ProfileContent,
        now: u64,
        reply: oneshot::Sender<Result<Published, RelayError>>,
    },
    Endpoints(oneshot::Sender<Vec<EndpointStatus>>),
    /// Stop the aggregator task; acknowledged once processed.
    Shutdown(oneshot::Sender<()>),
}

impl std::fmt::Debug for AggregatorCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregatorCommand::Inbound { relay, text } => f
                .debug_struct("Inbound")
                .field("relay", relay)
                .field("len", &text.len())
                .finish(),
            AggregatorCommand::RelayConnecting { relay } => {
                f.debug_struct("RelayConnecting").field("relay", relay).finish()
            }
            AggregatorCommand::RelayOpened { relay, .. } => {
                f.debug_struct("RelayOpened").field("relay", relay).finish()
            }
            AggregatorCommand::RelayClosed { relay } => {
                f.debug_struct("RelayClosed").field("relay", relay).finish()
            }
            AggregatorCommand::FetchProfile(key) => {
                f.debug_tuple("FetchProfile").field(&key.short()).finish()
            }
            AggregatorCommand::Subscribe { global, .. } => {
                f.debug_struct("Subscribe").field("global", global).finish()
            }
            AggregatorCommand::Unsubscribe(id) => f.debug_tuple("Unsubscribe").field(id).finish(),
            AggregatorCommand::Snapshot(_) => f.write_str("Snapshot"),
            AggregatorCommand::GetProfile { key, .. } => {
                f.debug_struct("GetProfile").field("key", &key.short()).finish()
            }
            AggregatorCommand::Publish { now, .. } => {
                f.debug_struct("Publish").field("now", now).finish()
            }
            AggregatorCommand::Endpoints(_) => f.write_str("Endpoints"),
            AggregatorCommand::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Start an aggregator and connect it to every relay in `config`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_aggregator(config: AggregatorConfig) -> AggregatorHandle {
    let aggregator = Aggregator::new(&config);
    let (cmd_tx, cmd_rx) = mpsc::channel::<AggregatorCommand>(config.command_capacity.max(1));
    let (shutdown_tx, _) = watch::channel(false);

    tokio::spawn(run(aggregator, cmd_rx));

    let handle = AggregatorHandle {
        cmd_tx,
        shutdown_tx: Arc::new(shutdown_tx),
        reconnect: config.reconnect,
    };
    handle.connect_all(&config.relays);

    info!(
        relays = config.relays.len(),
        reconnect = ?config.reconnect,
        verify_signatures = config.verify_signatures,
        "Aggregator started"
    );
    handle
}

async fn run(mut aggregator: Aggregator, mut cmd_rx: mpsc::Receiver<AggregatorCommand>) {
    let mut stop_ack = None;

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            AggregatorCommand::Inbound { relay, text } => {
                aggregator.ingest(&text, &relay);
            }
            AggregatorCommand::RelayConnecting { relay } => {
                aggregator.on_endpoint_connecting(&relay);
            }
            AggregatorCommand::RelayOpened { relay, outbound } => {
                aggregator.on_endpoint_open(&relay, outbound);
            }
            AggregatorCommand::RelayClosed { relay } => {
                aggregator.on_endpoint_closed(&relay);
            }
            AggregatorCommand::FetchProfile(key) => {
                aggregator.fetch_profile(key);
            }
            AggregatorCommand::Subscribe {
                subscriber,
                global,
                reply,
            } => {
                let id = if global {
                    aggregator.subscribe_global(subscriber)
                } else {
                    aggregator.subscribe(subscriber)
                };
                let _ = reply.send(id);
            }
            AggregatorCommand::Unsubscribe(id) => {
                aggregator.unsubscribe(id);
            }
            AggregatorCommand::Snapshot(reply) => {
                let _ = reply.send(aggregator.snapshot());
            }
            AggregatorCommand::GetProfile { key, reply } => {
                let _ = reply.send(aggregator.profile(&key).cloned());
            }
            AggregatorCommand::Publish {
                identity,
                content,
                now,
                reply,
            } => {
                let _ = reply.send(aggregator.publish_metadata(&identity, content, now));
            }
            AggregatorCommand::Endpoints(reply) => {
                let _ = reply.send(aggregator.endpoint_status());
            }
            AggregatorCommand::Shutdown(ack) => {
                info!(cached = aggregator.cached_count(), "Aggregator shutdown requested");
                stop_ack = Some(ack);
                break;
            }
        }
    }

    // Close the command channel and release every relay before acknowledging,
    // so requests made after `stop` returns fail with `Stopped`.
    drop(cmd_rx);
    drop(aggregator);
    info!("Aggregator task terminated");

    if let Some(ack) = stop_ack {
        let _ = ack.send(());
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable handle to a running aggregator.
#[derive(Clone)]
pub struct AggregatorHandle {
    cmd_tx: mpsc::Sender<AggregatorCommand>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    reconnect: ReconnectPolicy,
}

impl AggregatorHandle {
    /// Start a connection task for every endpoint. Failures are not reported
    /// here; they show up in [`AggregatorHandle::endpoints`].
    pub fn connect_all(&self, endpoints: &[String]) {
        for url in endpoints {
            debug!(relay = %url, "Spawning relay connection");
            spawn_relay_connection(
                url.clone(),
                self.reconnect,
                self.cmd_tx.clone(),
                self.shutdown_tx.subscribe(),
            );
        }
    }

    pub async fn fetch_profile(&self, key: IdentityKey) -> Result<(), RelayError> {
        self.send(AggregatorCommand::FetchProfile(key)).await
    }

    /// Register a subscriber for every accepted profile update.
    pub async fn subscribe<S>(&self, subscriber: S) -> Result<Subscription, RelayError>
    where
        S: ProfileSubscriber + 'static,
    {
        self.register(Box::new(subscriber), false).await
    }

    /// Register a feed-wide subscriber; it first receives every cached profile.
    pub async fn subscribe_global<S>(&self, subscriber: S) -> Result<Subscription, RelayError>
    where
        S: ProfileSubscriber + 'static,
    {
        self.register(Box::new(subscriber), true).await
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<(), RelayError> {
        self.send(AggregatorCommand::Unsubscribe(id)).await
    }

    pub async fn snapshot(&self) -> Result<Vec<ProfileRecord>, RelayError> {
        self.request(AggregatorCommand::Snapshot).await
    }

    pub async fn profile(&self, key: IdentityKey) -> Result<Option<ProfileRecord>, RelayError> {
        self.request(|reply| AggregatorCommand::GetProfile { key, reply })
            .await
    }

    /// Publish new profile metadata for `identity`, stamped with the current time.
    pub async fn publish_metadata(
        &self,
        identity: Identity,
        content: ProfileContent,
    ) -> Result<Published, RelayError> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.request(|reply| AggregatorCommand::Publish {
            identity,
            content,
            now,
            reply,
        })
        .await?
    }

    pub async fn endpoints(&self) -> Result<Vec<EndpointStatus>, RelayError> {
        self.request(AggregatorCommand::Endpoints).await
    }

    /// Stop every relay connection and the aggregator task.
    pub async fn stop(&self) -> Result<(), RelayError> {
        let _ = self.shutdown_tx.send(true);
        self.request(AggregatorCommand::Shutdown).await
    }

    async fn register(
        &self,
        subscriber: Box<dyn ProfileSubscriber>,
        global: bool,
    ) -> Result<Subscription, RelayError> {
        let id = self
            .request(|reply| AggregatorCommand::Subscribe {
                subscriber,
                global,
                reply,
            })
            .await?;
        Ok(Subscription {
            id,
            cmd_tx: Some(self.cmd_tx.clone()),
        })
    }

    async fn send(&self, cmd: AggregatorCommand) -> Result<(), RelayError> {
        self.cmd_tx.send(cmd).await.map_err(|_| RelayError::Stopped)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> AggregatorCommand,
    ) -> Result<T, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| RelayError::NoReply)
    }
}

/// Disposer for a registered subscriber.
///
/// Dropping it deregisters the subscriber too; `dispose` does the same but
/// waits for room in the command channel instead of giving up when it is full.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: SubscriberId,
    cmd_tx: Option<mpsc::Sender<AggregatorCommand>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Deregister the subscriber.
    pub async fn dispose(mut self) -> Result<(), RelayError> {
        let Some(cmd_tx) = self.cmd_tx.take() else {
            return Ok(());
        };
        cmd_tx
            .send(AggregatorCommand::Unsubscribe(self.id))
            .await
            .map_err(|_| RelayError::Stopped)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            if let Err(e) = cmd_tx.try_send(AggregatorCommand::Unsubscribe(self.id)) {
                if matches!(e, mpsc::error::TrySendError::Full(_)) {
                    warn!(subscriber = %self.id, "Command channel full, subscriber left registered");
                }
            }
        }
    }
}
