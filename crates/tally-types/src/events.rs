use serde::{Deserialize, Serialize};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { member_id: i64 },

    /// A vote was recorded or changed
    PollVoted {
        poll_id: i64,
        option_id: i64,
        member_id: i64,
        vote_count: u64,
        message: String,
    },
}

impl GatewayEvent {
    /// Returns the poll_id if this event is scoped to a specific poll.
    /// Events that return `None` are delivered to every connection.
    pub fn poll_id(&self) -> Option<i64> {
        match self {
            Self::PollVoted { poll_id, .. } => Some(*poll_id),
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving vote events for these polls.
    Subscribe { poll_ids: Vec<i64> },

    /// Stop receiving vote events for these polls.
    Unsubscribe { poll_ids: Vec<i64> },
}
