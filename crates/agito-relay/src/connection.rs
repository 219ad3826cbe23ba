//! One WebSocket connection task per relay endpoint.
//!
//! The task reports every state change to the aggregator as a command,
//! forwards inbound text frames unparsed, and writes whatever the aggregator
//! queues on the outbound channel. After a close the [`ReconnectPolicy`]
//! decides whether the endpoint is retried or dropped for good.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::service::AggregatorCommand;

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a live connection ended.
enum Ended {
    /// Closed by the relay, the network, or the aggregator.
    Closed,
    /// Shutdown requested or the aggregator is gone.
    Stop,
}

/// Spawn the connection loop for `url`.
pub fn spawn_relay_connection(
    url: String,
    policy: ReconnectPolicy,
    cmd_tx: mpsc::Sender<AggregatorCommand>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_connection(url, policy, cmd_tx, shutdown))
}

async fn run_connection(
    url: String,
    policy: ReconnectPolicy,
    cmd_tx: mpsc::Sender<AggregatorCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let connecting = AggregatorCommand::RelayConnecting { relay: url.clone() };
        if cmd_tx.send(connecting).await.is_err() {
            break;
        }

        debug!(relay = %url, attempt, "Connecting to relay");
        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        let ended = match connected {
            Ok((stream, _response)) => {
                attempt = 0;
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let opened = AggregatorCommand::RelayOpened {
                    relay: url.clone(),
                    outbound: outbound_tx,
                };
                if cmd_tx.send(opened).await.is_err() {
                    break;
                }
                pump(&url, stream, outbound_rx, &cmd_tx, &mut shutdown).await
            }
            Err(e) => {
                warn!(relay = %url, error = %e, "Relay connection failed");
                Ended::Closed
            }
        };

        let _ = cmd_tx
            .send(AggregatorCommand::RelayClosed { relay: url.clone() })
            .await;

        if matches!(ended, Ended::Stop) || *shutdown.borrow() {
            break;
        }

        attempt = attempt.saturating_add(1);
        let Some(delay) = policy.delay(attempt) else {
            info!(relay = %url, "Relay dropped, not reconnecting");
            break;
        };

        debug!(relay = %url, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!(relay = %url, "Relay connection task finished");
}

/// Shuttle frames between the socket and the aggregator until either side closes.
async fn pump(
    url: &str,
    stream: RelayStream,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cmd_tx: &mpsc::Sender<AggregatorCommand>,
    shutdown: &mut watch::Receiver<bool>,
) -> Ended {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let inbound = AggregatorCommand::Inbound {
                        relay: url.to_string(),
                        text,
                    };
                    if cmd_tx.send(inbound).await.is_err() {
                        return Ended::Stop;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(relay = %url, frame = ?frame, "Relay sent close");
                    return Ended::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(relay = %url, error = %e, "Relay socket error");
                    return Ended::Closed;
                }
                None => return Ended::Closed,
            },

            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!(relay = %url, error = %e, "Relay write failed");
                        return Ended::Closed;
                    }
                }
                // The aggregator released this connection.
                None => return Ended::Closed,
            },

            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return Ended::Stop;
            }
        }
    }
}
