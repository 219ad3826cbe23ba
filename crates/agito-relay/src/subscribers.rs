//! Profile update observers.
//!
//! Subscribers are notified in registration order. Each dispatch is
//! isolated: an error or a panic in one subscriber is logged and the
//! broadcast carries on with the next.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use agito_shared::ProfileRecord;
use tracing::warn;

/// Receives every accepted profile update.
pub trait ProfileSubscriber: Send {
    fn on_profile(&mut self, profile: &ProfileRecord) -> anyhow::Result<()>;
}

impl<F> ProfileSubscriber for F
where
    F: FnMut(&ProfileRecord) -> anyhow::Result<()> + Send,
{
    fn on_profile(&mut self, profile: &ProfileRecord) -> anyhow::Result<()> {
        self(profile)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: u64,
    // Ids grow monotonically, so key order is registration order.
    subscribers: BTreeMap<SubscriberId, Box<dyn ProfileSubscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, subscriber: Box<dyn ProfileSubscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.insert(id, subscriber);
        id
    }

    pub fn unregister(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Notify every subscriber; returns how many handled the update cleanly.
    pub fn notify_all(&mut self, profile: &ProfileRecord) -> usize {
        let mut delivered = 0;
        for (id, subscriber) in self.subscribers.iter_mut() {
            if dispatch(*id, subscriber.as_mut(), profile) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Notify a single subscriber.
    pub fn notify_one(&mut self, id: SubscriberId, profile: &ProfileRecord) -> bool {
        match self.subscribers.get_mut(&id) {
            Some(subscriber) => dispatch(id, subscriber.as_mut(), profile),
            None => false,
        }
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

fn dispatch(id: SubscriberId, subscriber: &mut dyn ProfileSubscriber, profile: &ProfileRecord) -> bool {
    match catch_unwind(AssertUnwindSafe(|| subscriber.on_profile(profile))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(subscriber = %id, key = %profile.identity_key.short(), error = %e, "Subscriber failed");
            false
        }
        Err(_) => {
            warn!(subscriber = %id, key = %profile.identity_key.short(), "Subscriber panicked");
            false
        }
    }
}
