use std::sync::Arc;

use tracing::{trace, warn};

use tally_types::api::VoteResult;

/// Payload handed to the broadcast channel after a vote commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollVotedEvent {
    pub poll_id: i64,
    pub option_id: i64,
    pub member_id: i64,
    pub vote_count: u64,
    pub message: String,
}

impl From<&VoteResult> for PollVotedEvent {
    fn from(result: &VoteResult) -> Self {
        Self {
            poll_id: result.poll_id,
            option_id: result.option_id,
            member_id: result.member_id,
            vote_count: result.vote_count,
            message: result.message.clone(),
        }
    }
}

/// Publish-only sink keyed by poll id. Implementations must not block: the
/// call happens on the voting request's thread.
pub trait VoteBroadcaster: Send + Sync {
    fn publish(&self, event: PollVotedEvent) -> anyhow::Result<()>;
}

/// Broadcaster that drops every event.
pub struct NullBroadcaster;

impl VoteBroadcaster for NullBroadcaster {
    fn publish(&self, _event: PollVotedEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Turns committed vote results into broadcast events.
#[derive(Clone)]
pub struct VoteEmitter {
    sink: Arc<dyn VoteBroadcaster>,
}

impl VoteEmitter {
    pub fn new(sink: Arc<dyn VoteBroadcaster>) -> Self {
        Self { sink }
    }

    /// Fire-and-forget. Unchanged votes are skipped; delivery failures are
    /// logged and never reach the voter.
    pub fn emit(&self, result: &VoteResult) {
        if !result.outcome.is_mutation() {
            return;
        }

        let event = PollVotedEvent::from(result);
        trace!("Publishing vote event: {:?}", event);
        if let Err(e) = self.sink.publish(event) {
            warn!(
                "Vote event for poll {} (member {}) not delivered: {}",
                result.poll_id, result.member_id, e
            );
        }
    }
}
