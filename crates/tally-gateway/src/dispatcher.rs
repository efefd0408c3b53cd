use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{trace, warn};
use uuid::Uuid;

use tally_engine::{PollVotedEvent, VoteBroadcaster};
use tally_types::events::GatewayEvent;

/// Capacity of the broadcast ring. Slow receivers past this many queued
/// messages see `Lagged` and skip ahead.
const BROADCAST_CAPACITY: usize = 1024;

/// An event serialized once, shared by every connection that forwards it.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    /// Poll the event belongs to; `None` goes to every connection.
    pub poll_id: Option<i64>,
    pub json: Arc<str>,
}

/// Tracks connected members and fans events out to their connections.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<BroadcastMessage>,

    /// Live connections: conn_id -> member_id
    connections: RwLock<HashMap<Uuid, i64>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Serialize and broadcast an event. Returns how many receivers got it;
    /// zero is normal when nobody is connected.
    pub fn broadcast(&self, event: &GatewayEvent) -> anyhow::Result<usize> {
        let json: Arc<str> = serde_json::to_string(event)?.into();
        let message = BroadcastMessage {
            poll_id: event.poll_id(),
            json,
        };
        Ok(self.inner.broadcast_tx.send(message).unwrap_or(0))
    }

    pub async fn register_connection(&self, member_id: i64) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner.connections.write().await.insert(conn_id, member_id);
        conn_id
    }

    pub async fn unregister_connection(&self, conn_id: Uuid) {
        if self.inner.connections.write().await.remove(&conn_id).is_none() {
            warn!("Connection {} was not registered", conn_id);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// Open sockets identified as `member_id`; one member may hold several.
    pub async fn member_connection_count(&self, member_id: i64) -> usize {
        self.inner
            .connections
            .read()
            .await
            .values()
            .filter(|id| **id == member_id)
            .count()
    }
}

impl VoteBroadcaster for Dispatcher {
    fn publish(&self, event: PollVotedEvent) -> anyhow::Result<()> {
        let poll_id = event.poll_id;
        let delivered = self.broadcast(&GatewayEvent::PollVoted {
            poll_id: event.poll_id,
            option_id: event.option_id,
            member_id: event.member_id,
            vote_count: event.vote_count,
            message: event.message,
        })?;
        trace!("Vote event for poll {} handed to {} receivers", poll_id, delivered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(poll_id: i64) -> PollVotedEvent {
        PollVotedEvent {
            poll_id,
            option_id: 11,
            member_id: 42,
            vote_count: 3,
            message: "vote recorded".into(),
        }
    }

    #[tokio::test]
    async fn published_votes_reach_subscribers_tagged_with_poll() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        dispatcher.publish(vote(5)).unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.poll_id, Some(5));
        let json: serde_json::Value = serde_json::from_str(&msg.json).unwrap();
        assert_eq!(json["type"], "PollVoted");
        assert_eq!(json["data"]["option_id"], 11);
        assert_eq!(json["data"]["vote_count"], 3);
    }

    #[tokio::test]
    async fn publishing_without_listeners_is_not_an_error() {
        let dispatcher = Dispatcher::new();
        dispatcher.publish(vote(1)).unwrap();
        assert_eq!(dispatcher.broadcast(&GatewayEvent::Ready { member_id: 1 }).unwrap(), 0);
    }

    #[tokio::test]
    async fn connections_register_and_unregister() {
        let dispatcher = Dispatcher::new();
        let a = dispatcher.register_connection(1).await;
        let b = dispatcher.register_connection(1).await;
        dispatcher.register_connection(2).await;
        assert_ne!(a, b);
        assert_eq!(dispatcher.connection_count().await, 3);
        assert_eq!(dispatcher.member_connection_count(1).await, 2);

        dispatcher.unregister_connection(a).await;
        dispatcher.unregister_connection(a).await;
        assert_eq!(dispatcher.connection_count().await, 2);
        assert_eq!(dispatcher.member_connection_count(1).await, 1);
        assert_eq!(dispatcher.member_connection_count(3).await, 0);
    }
}
