//! Relay aggregator core.
//!
//! Owns the profile cache, the subscriber registry and the endpoint table.
//! Every method runs to completion without suspending, so subscribers always
//! observe a cache holding a single record per identity key. The async
//! plumbing in [`crate::service`] feeds this type from one task.

use agito_shared::constants::{INIT_SUBSCRIPTION_PREFIX, PROFILE_SUBSCRIPTION_PREFIX};
use agito_shared::{
    Envelope, EventError, Filter, Identity, IdentityKey, ProfileContent, ProfileRecord,
    ProtocolError, UnsignedEvent,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::cache::{ProfileCache, Reconciled};
use crate::config::AggregatorConfig;
use crate::endpoints::{EndpointStatus, EndpointTable, OutboundSender};
use crate::error::RelayError;
use crate::subscribers::{ProfileSubscriber, SubscriberId, SubscriberRegistry};

/// Why an inbound message did not reach the cache.
#[derive(Debug)]
pub enum DiscardReason {
    /// Unparsable or non-conforming envelope.
    Envelope(ProtocolError),
    /// Well-formed envelope that carries no event (`EOSE`, `NOTICE`, ...).
    NotAnEvent,
    /// Event of a kind other than metadata.
    NotMetadata(u32),
    /// Content block failed to decode.
    Content(EventError),
    /// Signature verification is enabled and the event failed it.
    Unverified(EventError),
}

#[derive(Debug)]
pub enum IngestOutcome {
    Accepted,
    Stale,
    Discarded(DiscardReason),
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    /// A cached record was replayed to subscribers.
    pub replayed: bool,
    /// Number of open endpoints the targeted query was sent to.
    pub queried: usize,
}

#[derive(Debug, Clone)]
pub struct Published {
    pub record: ProfileRecord,
    pub event_id: String,
    /// Number of open endpoints the event was sent to.
    pub reached: usize,
}

#[derive(Debug)]
pub struct Aggregator {
    cache: ProfileCache,
    subscribers: SubscriberRegistry,
    endpoints: EndpointTable,
    init_limit: usize,
    verify_signatures: bool,
}

impl Aggregator {
    pub fn new(config: &AggregatorConfig) -> Self {
        Self {
            cache: ProfileCache::new(),
            subscribers: SubscriberRegistry::new(),
            endpoints: EndpointTable::new(),
            init_limit: config.init_limit,
            verify_signatures: config.verify_signatures,
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Parse one raw relay message and reconcile the profile it carries.
    /// Anything malformed or irrelevant is discarded, never raised.
    pub fn ingest(&mut self, raw: &str, source: &str) -> IngestOutcome {
        let event = match Envelope::from_json(raw) {
            Ok(Envelope::Event { event, .. }) => event,
            Ok(other) => {
                trace!(relay = %source, tag = other.tag(), "Ignoring non-event envelope");
                return IngestOutcome::Discarded(DiscardReason::NotAnEvent);
            }
            Err(e) => {
                debug!(relay = %source, error = %e, "Discarding malformed envelope");
                return IngestOutcome::Discarded(DiscardReason::Envelope(e));
            }
        };

        if !event.is_metadata() {
            trace!(relay = %source, kind = event.kind, "Ignoring non-metadata event");
            return IngestOutcome::Discarded(DiscardReason::NotMetadata(event.kind));
        }

        if self.verify_signatures {
            if let Err(e) = event.verify() {
                debug!(
                    relay = %source,
                    key = %event.pubkey.short(),
                    error = %e,
                    "Discarding unverified metadata event"
                );
                return IngestOutcome::Discarded(DiscardReason::Unverified(e));
            }
        }

        let candidate = match ProfileRecord::from_event(&event) {
            Ok(candidate) => candidate,
            Err(e) => {
                debug!(
                    relay = %source,
                    key = %event.pubkey.short(),
                    error = %e,
                    "Discarding metadata event with bad content"
                );
                return IngestOutcome::Discarded(DiscardReason::Content(e));
            }
        };

        if self.reconcile(candidate) {
            IngestOutcome::Accepted
        } else {
            IngestOutcome::Stale
        }
    }

    /// Store `candidate` if it is the newest record for its key and notify
    /// every subscriber. Returns whether it was accepted.
    pub fn reconcile(&mut self, candidate: ProfileRecord) -> bool {
        let key = candidate.identity_key;
        let last_updated = candidate.last_updated;

        match self.cache.reconcile(candidate) {
            Reconciled::Stale { current } => {
                trace!(key = %key.short(), last_updated, current, "Dropping stale profile");
                false
            }
            outcome => {
                if let Some(record) = self.cache.get(&key) {
                    let delivered = self.subscribers.notify_all(record);
                    debug!(
                        key = %key.short(),
                        last_updated,
                        outcome = ?outcome,
                        delivered,
                        "Profile accepted"
                    );
                }
                true
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Replay the cached record for `key` (if any) to every subscriber, then
    /// ask every open endpoint for that key's latest metadata.
    ///
    /// Subscribers may see the same key twice: once from the cache now and
    /// once later if a relay answers with something newer.
    pub fn fetch_profile(&mut self, key: IdentityKey) -> FetchOutcome {
        let replayed = match self.cache.get(&key) {
            Some(record) => {
                self.subscribers.notify_all(record);
                true
            }
            None => false,
        };

        let subscription_id = format!("{PROFILE_SUBSCRIPTION_PREFIX}{}", key.short());
        let envelope = Envelope::subscribe(subscription_id, Filter::metadata_for(key));
        let queried = self.endpoints.broadcast(&envelope.to_json());

        debug!(key = %key.short(), replayed, queried, "Profile fetch");
        FetchOutcome { replayed, queried }
    }

    pub fn profile(&self, key: &IdentityKey) -> Option<&ProfileRecord> {
        self.cache.get(key)
    }

    pub fn snapshot(&self) -> Vec<ProfileRecord> {
        self.cache.snapshot()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    // -----------------------------------------------------------------------
    // Subscribers
    // -----------------------------------------------------------------------

    pub fn subscribe(&mut self, subscriber: Box<dyn ProfileSubscriber>) -> SubscriberId {
        let id = self.subscribers.register(subscriber);
        debug!(subscriber = %id, "Subscriber registered");
        id
    }

    /// Register a feed-wide listener and immediately replay the whole cache to it.
    pub fn subscribe_global(&mut self, subscriber: Box<dyn ProfileSubscriber>) -> SubscriberId {
        let id = self.subscribers.register(subscriber);
        let mut replayed = 0;
        for record in self.cache.iter() {
            self.subscribers.notify_one(id, record);
            replayed += 1;
        }
        debug!(subscriber = %id, replayed, "Global subscriber registered");
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let removed = self.subscribers.unregister(id);
        if removed {
            debug!(subscriber = %id, "Subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // -----------------------------------------------------------------------
    // Endpoints
    // -----------------------------------------------------------------------

    pub fn on_endpoint_connecting(&mut self, url: &str) {
        self.endpoints.on_connecting(url);
    }

    /// Register an open endpoint and issue the standing metadata query.
    pub fn on_endpoint_open(&mut self, url: &str, outbound: OutboundSender) {
        self.endpoints.on_open(url, outbound);

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(7)
            .map(char::from)
            .collect();
        let subscription_id = format!("{INIT_SUBSCRIPTION_PREFIX}{}", suffix.to_lowercase());
        let envelope = Envelope::subscribe(subscription_id, Filter::metadata(self.init_limit));

        if self.endpoints.send_to(url, &envelope.to_json()) {
            info!(relay = %url, open = self.endpoints.open_count(), "Relay connected");
        } else {
            warn!(relay = %url, "Relay closed before the metadata query was sent");
        }
    }

    pub fn on_endpoint_closed(&mut self, url: &str) {
        let was_open = self.endpoints.is_open(url);
        if !self.endpoints.on_closed(url) {
            trace!(relay = %url, "Endpoint already closed");
            return;
        }

        let open = self.endpoints.open_count();
        if was_open {
            info!(relay = %url, open, "Relay disconnected");
        }
        if open == 0 {
            warn!("No relays reachable");
        }
    }

    pub fn endpoint_status(&self) -> Vec<EndpointStatus> {
        self.endpoints.status()
    }

    pub fn open_endpoint_count(&self) -> usize {
        self.endpoints.open_count()
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Sign a metadata event for `identity`, send it to every open endpoint
    /// and reconcile it locally.
    ///
    /// `created_at` is `now`, bumped past the cached record when the clock
    /// has not moved, so the local update is always accepted. A cached
    /// record at `u64::MAX` cannot be superseded and the publish is refused
    /// before anything is sent.
    pub fn publish_metadata(
        &mut self,
        identity: &Identity,
        content: ProfileContent,
        now: u64,
    ) -> Result<Published, RelayError> {
        let key = identity.identity_key();
        let created_at = match self.cache.get(&key) {
            Some(existing) if existing.last_updated >= now => existing
                .last_updated
                .checked_add(1)
                .ok_or(RelayError::TimestampExhausted)?,
            _ => now,
        };

        let event = UnsignedEvent::metadata(key, created_at, content.to_json()).sign(identity);
        let event_id = event.id.clone();
        let reached = self.endpoints.broadcast(&Envelope::publish(event).to_json());

        let record = ProfileRecord::from_content(key, created_at, content);
        self.reconcile(record.clone());

        info!(key = %key.short(), created_at, reached, "Published profile metadata");
        Ok(Published {
            record,
            event_id,
            reached,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use agito_shared::{Event, ProtocolError};
    use tokio::sync::mpsc;

    const R1: &str = "wss://one.example";
    const R2: &str = "wss://two.example";

    fn key(n: u8) -> IdentityKey {
        IdentityKey([n; 32])
    }

    fn metadata_frame(k: IdentityKey, ts: u64, name: &str) -> String {
        let event = Event {
            id: format!("id-{ts}"),
            pubkey: k,
            created_at: ts,
            kind: 0,
            tags: Vec::new(),
            content: serde_json::json!({ "name": name }).to_string(),
            sig: String::new(),
        };
        serde_json::json!(["EVENT", "init-test", event]).to_string()
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(&AggregatorConfig::default())
    }

    type Log = Arc<Mutex<Vec<ProfileRecord>>>;

    fn recorder(log: &Log) -> Box<dyn ProfileSubscriber> {
        let log = log.clone();
        Box::new(move |p: &ProfileRecord| -> anyhow::Result<()> {
            log.lock().unwrap().push(p.clone());
            Ok(())
        })
    }

    fn names(log: &Log) -> Vec<String> {
        log.lock().unwrap().iter().map(|p| p.display_name.clone()).collect()
    }

    #[test]
    fn test_older_event_discarded() {
        let mut agg = aggregator();
        let log = Log::default();
        agg.subscribe(recorder(&log));

        assert!(agg.ingest(&metadata_frame(key(1), 100, "Ana"), R1).is_accepted());
        assert!(matches!(
            agg.ingest(&metadata_frame(key(1), 95, "Old"), R1),
            IngestOutcome::Stale
        ));

        let cached = agg.profile(&key(1)).unwrap();
        assert_eq!(cached.display_name, "Ana");
        assert_eq!(cached.last_updated, 100);
        assert_eq!(names(&log), vec!["Ana"]);
    }

    #[test]
    fn test_newer_event_replaces() {
        let mut agg = aggregator();
        agg.ingest(&metadata_frame(key(1), 100, "Ana"), R1);
        agg.ingest(&metadata_frame(key(1), 150, "AnaV2"), R2);

        let cached = agg.profile(&key(1)).unwrap();
        assert_eq!(cached.display_name, "AnaV2");
        assert_eq!(cached.last_updated, 150);
        assert_eq!(agg.cached_count(), 1);
    }

    #[test]
    fn test_same_event_from_two_relays_notifies_once() {
        let mut agg = aggregator();
        let log = Log::default();
        agg.subscribe(recorder(&log));

        let frame = metadata_frame(key(1), 100, "Ana");
        assert!(agg.ingest(&frame, R1).is_accepted());
        assert!(matches!(agg.ingest(&frame, R2), IngestOutcome::Stale));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_input_never_reaches_cache() {
        let mut agg = aggregator();
        let log = Log::default();
        agg.subscribe(recorder(&log));

        let bad_content = serde_json::json!([
            "EVENT",
            "s",
            {
                "id": "x",
                "pubkey": key(1).to_hex(),
                "created_at": 10,
                "kind": 0,
                "tags": [],
                "content": "{not json",
                "sig": ""
            }
        ])
        .to_string();
        let text_note = serde_json::json!([
            "EVENT",
            "s",
            {
                "id": "y",
                "pubkey": key(1).to_hex(),
                "created_at": 10,
                "kind": 1,
                "tags": [],
                "content": "hello",
                "sig": ""
            }
        ])
        .to_string();

        assert!(matches!(
            agg.ingest("garbage", R1),
            IngestOutcome::Discarded(DiscardReason::Envelope(ProtocolError::InvalidJson(_)))
        ));
        assert!(matches!(
            agg.ingest(r#"["EOSE","s"]"#, R1),
            IngestOutcome::Discarded(DiscardReason::NotAnEvent)
        ));
        assert!(matches!(
            agg.ingest(&bad_content, R1),
            IngestOutcome::Discarded(DiscardReason::Content(_))
        ));
        assert!(matches!(
            agg.ingest(&text_note, R1),
            IngestOutcome::Discarded(DiscardReason::NotMetadata(1))
        ));
        assert!(matches!(
            agg.ingest(r#"["EVENT","s",{"kind":0}]"#, R1),
            IngestOutcome::Discarded(DiscardReason::Envelope(_))
        ));

        assert_eq!(agg.cached_count(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_verification_rejects_unsigned_when_enabled() {
        let config = AggregatorConfig {
            verify_signatures: true,
            ..Default::default()
        };
        let mut agg = Aggregator::new(&config);

        assert!(matches!(
            agg.ingest(&metadata_frame(key(1), 100, "Ana"), R1),
            IngestOutcome::Discarded(DiscardReason::Unverified(_))
        ));

        let identity = Identity::generate();
        let signed = UnsignedEvent::metadata(
            identity.identity_key(),
            100,
            r#"{"name":"Real"}"#.to_string(),
        )
        .sign(&identity);
        let frame = serde_json::json!(["EVENT", "s", signed]).to_string();
        assert!(agg.ingest(&frame, R1).is_accepted());
    }

    #[test]
    fn test_fetch_profile_replays_once_then_queries() {
        let mut agg = aggregator();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        agg.on_endpoint_open(R1, tx1);
        agg.on_endpoint_open(R2, tx2);
        agg.on_endpoint_connecting(R2);
        // Drain the standing queries.
        rx1.try_recv().unwrap();
        rx2.try_recv().unwrap();

        agg.ingest(&metadata_frame(key(1), 100, "Ana"), R1);

        let log = Log::default();
        agg.subscribe(recorder(&log));

        let outcome = agg.fetch_profile(key(1));
        assert_eq!(
            outcome,
            FetchOutcome {
                replayed: true,
                queried: 1
            }
        );
        assert_eq!(names(&log), vec!["Ana"]);

        let query = rx1.try_recv().unwrap();
        let expected = format!(
            r#"["REQ","p-{}",{{"authors":["{}"],"kinds":[0],"limit":1}}]"#,
            key(1).short(),
            key(1).to_hex()
        );
        assert_eq!(query, expected);
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_fetch_unknown_profile_only_queries() {
        let mut agg = aggregator();
        let log = Log::default();
        agg.subscribe(recorder(&log));

        let outcome = agg.fetch_profile(key(9));
        assert!(!outcome.replayed);
        assert_eq!(outcome.queried, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_global_subscription_replays_cache_once() {
        let mut agg = aggregator();
        agg.ingest(&metadata_frame(key(1), 10, "a"), R1);
        agg.ingest(&metadata_frame(key(2), 10, "b"), R1);
        agg.ingest(&metadata_frame(key(2), 20, "b2"), R1);

        let existing = Log::default();
        agg.subscribe(recorder(&existing));

        let global = Log::default();
        agg.subscribe_global(recorder(&global));

        let mut replayed = names(&global);
        replayed.sort();
        assert_eq!(replayed, vec!["a", "b2"]);
        // Replay goes to the new listener only.
        assert!(existing.lock().unwrap().is_empty());

        agg.ingest(&metadata_frame(key(3), 5, "c"), R1);
        assert_eq!(global.lock().unwrap().len(), 3);
        assert_eq!(existing.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let mut agg = aggregator();
        let log = Log::default();
        let id = agg.subscribe(recorder(&log));
        assert!(agg.unsubscribe(id));
        assert_eq!(agg.subscriber_count(), 0);

        agg.ingest(&metadata_frame(key(1), 10, "a"), R1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failing_subscriber_does_not_block_acceptance() {
        let mut agg = aggregator();
        agg.subscribe(Box::new(|_: &ProfileRecord| -> anyhow::Result<()> {
            anyhow::bail!("ui gone")
        }));
        let log = Log::default();
        agg.subscribe(recorder(&log));

        assert!(agg.ingest(&metadata_frame(key(1), 10, "a"), R1).is_accepted());
        assert_eq!(names(&log), vec!["a"]);
    }

    #[test]
    fn test_open_sends_standing_query() {
        let mut agg = aggregator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        agg.on_endpoint_open(R1, tx);

        let query = rx.try_recv().unwrap();
        match Envelope::from_json(&query).unwrap() {
            Envelope::Subscribe {
                subscription_id,
                filter,
            } => {
                assert!(subscription_id.starts_with(INIT_SUBSCRIPTION_PREFIX));
                assert_eq!(filter, Filter::metadata(50));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert_eq!(agg.open_endpoint_count(), 1);

        agg.on_endpoint_closed(R1);
        assert_eq!(agg.open_endpoint_count(), 0);
    }

    #[test]
    fn test_lost_connection_counted_once() {
        let mut agg = aggregator();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        // The standing query finds the channel dead and closes the endpoint.
        agg.on_endpoint_connecting(R1);
        agg.on_endpoint_open(R1, tx);
        assert_eq!(agg.open_endpoint_count(), 0);

        // The connection task reports the same loss afterwards.
        agg.on_endpoint_closed(R1);
        let status = agg.endpoint_status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].failures, 1);
    }

    #[test]
    fn test_publish_broadcasts_and_updates_cache() {
        let mut agg = aggregator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        agg.on_endpoint_open(R1, tx);
        rx.try_recv().unwrap();

        let log = Log::default();
        agg.subscribe(recorder(&log));

        let identity = Identity::generate();
        let content = ProfileContent {
            name: Some("me".into()),
            about: Some("bio".into()),
            ..Default::default()
        };
        let published = agg.publish_metadata(&identity, content.clone(), 1_000).unwrap();
        assert_eq!(published.reached, 1);
        assert_eq!(published.record.last_updated, 1_000);

        let sent = rx.try_recv().unwrap();
        match Envelope::from_json(&sent).unwrap() {
            Envelope::Event {
                subscription_id: None,
                event,
            } => {
                assert!(event.verify().is_ok());
                assert_eq!(event.id, published.event_id);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }

        // Same clock reading: the second publish still wins locally.
        let again = agg.publish_metadata(&identity, content, 1_000).unwrap();
        assert_eq!(again.record.last_updated, 1_001);
        assert_eq!(agg.profile(&identity.identity_key()).unwrap().last_updated, 1_001);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_publish_when_cache_is_ahead_of_clock() {
        let mut agg = aggregator();
        let identity = Identity::generate();
        let own = identity.identity_key();
        let content = ProfileContent {
            name: Some("me".into()),
            ..Default::default()
        };

        // A relay reported a record for our key far in the future.
        assert!(agg.ingest(&metadata_frame(own, 5_000, "forged"), R1).is_accepted());
        let published = agg.publish_metadata(&identity, content.clone(), 1_000).unwrap();
        assert_eq!(published.record.last_updated, 5_001);
        assert_eq!(agg.profile(&own).unwrap().display_name, "me");

        // Nothing can be newer than u64::MAX: refuse instead of overflowing.
        assert!(agg.ingest(&metadata_frame(own, u64::MAX, "forged"), R1).is_accepted());
        assert_eq!(
            agg.publish_metadata(&identity, content.clone(), 1_000).unwrap_err(),
            RelayError::TimestampExhausted
        );
        let cached = agg.profile(&own).unwrap();
        assert_eq!(cached.display_name, "forged");
        assert_eq!(cached.last_updated, u64::MAX);

        // The aggregator keeps working afterwards.
        assert!(agg.ingest(&metadata_frame(key(2), 10, "other"), R1).is_accepted());
        assert_eq!(agg.cached_count(), 2);
    }
}
