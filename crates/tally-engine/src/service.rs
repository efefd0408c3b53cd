use std::sync::Arc;

use tally_db::Database;

use crate::clock::{Clock, SystemClock};
use crate::emitter::{VoteBroadcaster, VoteEmitter};
use crate::identity::IdentityResolver;

/// Entry point for every poll operation.
///
/// Holds no mutable state of its own: all coordination between concurrent
/// requests happens in the store, so one instance is shared by every worker.
pub struct PollService {
    pub(crate) db: Arc<Database>,
    pub(crate) identity: Arc<dyn IdentityResolver>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) emitter: VoteEmitter,
}

impl PollService {
    /// Service reading members from the store's own member table, on wall-clock time.
    pub fn new(db: Arc<Database>, broadcaster: Arc<dyn VoteBroadcaster>) -> Self {
        Self {
            identity: db.clone(),
            db,
            clock: Arc::new(SystemClock),
            emitter: VoteEmitter::new(broadcaster),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}
