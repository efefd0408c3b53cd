//! Tally engine: poll lifecycle, vote coordination and post-close statistics.
//!
//! - Lifecycle is evaluated lazily on every read; there is no scheduler
//! - One vote per member per poll, guarded by the store's unique constraint
//! - Concurrent first votes are reconciled by a single re-read, never a loop
//! - Vote events are handed to a broadcaster only after the write committed

pub mod clock;
pub mod emitter;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod polls;
pub mod service;
pub mod statistics;
pub mod votes;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use emitter::{NullBroadcaster, PollVotedEvent, VoteBroadcaster, VoteEmitter};
pub use error::{PollError, Result};
pub use identity::IdentityResolver;
pub use service::PollService;
