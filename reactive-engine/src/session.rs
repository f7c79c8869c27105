use std::fmt::Display;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::hub::Hub;
use crate::types::{EngineError, Result};

/// What happened during one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub id: Uuid,
    pub received: usize,
    pub sent: usize,
}

/// Bridges one duplex text connection to a chat hub.
///
/// Everything the client sends is published to the hub; everything on the
/// hub, starting with its replay, is written back to the client. Returns
/// the stats once the client stops sending, or
/// `EngineError::SubscriberUnreachable` once it can no longer be written to.
/// Either way only this connection's subscription is released.
pub async fn serve<I, O>(hub: Hub<String>, incoming: I, outgoing: O) -> Result<SessionStats>
where
    I: Stream<Item = String> + Send,
    O: Sink<String> + Send,
    O::Error: Display,
{
    let id = Uuid::new_v4();
    let mut stats = SessionStats {
        id,
        received: 0,
        sent: 0,
    };

    futures::pin_mut!(incoming);
    futures::pin_mut!(outgoing);
    let mut subscription = hub.subscribe();
    info!("[{}] Got new connection (subscriber {})", id, subscription.id());

    let mut unreachable = None;
    loop {
        tokio::select! {
            message = incoming.next() => match message {
                Some(text) => {
                    info!("[{}] Received: '{}'", id, text);
                    stats.received += 1;
                    hub.publish(text);
                }
                None => break,
            },
            event = subscription.recv() => match event {
                Some(text) => {
                    if let Err(e) = outgoing.send(text).await {
                        warn!("[{}] Client unreachable: {}", id, e);
                        unreachable = Some(EngineError::SubscriberUnreachable(format!("{id}: {e}")));
                        break;
                    }
                    stats.sent += 1;
                }
                None => break,
            },
        }
    }

    drop(subscription);
    info!(
        "[{}] Connection completed ({} received, {} sent)",
        id, stats.received, stats.sent
    );
    match unreachable {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}
