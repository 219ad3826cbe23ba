//! Relay endpoint tracking.
//!
//! Every configured endpoint moves through
//! `Disconnected -> Connecting -> Open -> Disconnected`. Only `Open`
//! endpoints hold an outbound sender and count as active.

use std::collections::BTreeMap;

use tokio::sync::mpsc;
use tracing::debug;

/// Outbound half of an open relay connection (text frames).
pub type OutboundSender = mpsc::UnboundedSender<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

/// Point-in-time view of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    pub url: String,
    pub state: ConnectionState,
    /// Unix epoch millis of the current connection, when open.
    pub connected_at: Option<u64>,
    /// Connections lost or refused so far.
    pub failures: u32,
}

#[derive(Debug)]
struct Endpoint {
    state: ConnectionState,
    outbound: Option<OutboundSender>,
    connected_at: Option<u64>,
    failures: u32,
}

impl Endpoint {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            outbound: None,
            connected_at: None,
            failures: 0,
        }
    }
}

/// Tracks every known relay endpoint and the senders of the open ones.
#[derive(Debug, Default)]
pub struct EndpointTable {
    endpoints: BTreeMap<String, Endpoint>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connecting(&mut self, url: &str) {
        let endpoint = self
            .endpoints
            .entry(url.to_string())
            .or_insert_with(Endpoint::new);
        endpoint.state = ConnectionState::Connecting;
        endpoint.outbound = None;
        endpoint.connected_at = None;
    }

    pub fn on_open(&mut self, url: &str, outbound: OutboundSender) {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;

        let endpoint = self
            .endpoints
            .entry(url.to_string())
            .or_insert_with(Endpoint::new);
        endpoint.state = ConnectionState::Open;
        endpoint.outbound = Some(outbound);
        endpoint.connected_at = Some(now);

        debug!(relay = %url, "Endpoint open");
    }

    /// Remove an endpoint from the active set after a close or a refused connection.
    ///
    /// Returns `false` when the endpoint was already disconnected, so a lost
    /// connection noticed both here and by its task is only counted once.
    pub fn on_closed(&mut self, url: &str) -> bool {
        let Some(endpoint) = self.endpoints.get_mut(url) else {
            return false;
        };
        if endpoint.state == ConnectionState::Disconnected {
            return false;
        }
        endpoint.state = ConnectionState::Disconnected;
        endpoint.outbound = None;
        endpoint.connected_at = None;
        endpoint.failures = endpoint.failures.saturating_add(1);
        debug!(relay = %url, failures = endpoint.failures, "Endpoint closed");
        true
    }

    pub fn state(&self, url: &str) -> ConnectionState {
        self.endpoints
            .get(url)
            .map(|e| e.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_open(&self, url: &str) -> bool {
        self.state(url) == ConnectionState::Open
    }

    pub fn open_endpoints(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .filter(|(_, e)| e.state == ConnectionState::Open)
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.endpoints
            .values()
            .filter(|e| e.state == ConnectionState::Open)
            .count()
    }

    /// Send a text frame to one open endpoint.
    ///
    /// An endpoint whose connection task has already gone is closed on the spot.
    pub fn send_to(&mut self, url: &str, text: &str) -> bool {
        let sent = match self.endpoints.get(url).and_then(|e| e.outbound.as_ref()) {
            Some(outbound) => outbound.send(text.to_string()).is_ok(),
            None => return false,
        };
        if !sent {
            let _ = self.on_closed(url);
        }
        sent
    }

    /// Send a text frame to every open endpoint; returns how many were reached.
    pub fn broadcast(&mut self, text: &str) -> usize {
        self.open_endpoints()
            .iter()
            .filter(|url| self.send_to(url, text))
            .count()
    }

    pub fn status(&self) -> Vec<EndpointStatus> {
        self.endpoints
            .iter()
            .map(|(url, e)| EndpointStatus {
                url: url.clone(),
                state: e.state,
                connected_at: e.connected_at,
                failures: e.failures,
            })
            .collect()
    }
}
