//! Database row types. These map directly to SQLite rows and are kept apart
//! from the tally-types API models so the storage layer stays independent.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use tally_types::models::PollStatus;

#[derive(Debug, Clone)]
pub struct PollRow {
    pub id: i64,
    pub post_id: i64,
    pub owner_id: i64,
    pub title: String,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub reserved_close_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionRow {
    pub id: i64,
    pub poll_id: i64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRow {
    pub id: i64,
    pub poll_id: i64,
    pub option_id: i64,
    pub member_id: i64,
}

/// One group of the demographic group-by: votes for `option_id` cast by
/// members sharing the same raw gender and age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemographicRow {
    pub option_id: i64,
    pub gender: Option<String>,
    pub age: Option<i64>,
    pub count: u64,
}

/// Insert payload for a poll and its options.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub post_id: i64,
    pub owner_id: i64,
    pub title: String,
    pub options: Vec<String>,
    pub reserved_close_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Changes applied by an owner edit. `None` leaves the column as is.
#[derive(Debug, Clone)]
pub struct PollEdit {
    pub title: Option<String>,
    pub options: Option<Vec<(Option<i64>, String)>>,
    pub reserved_close_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInsert {
    Created(i64),
    /// The post already carries a poll.
    PostTaken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteInsert {
    Created(VoteRow),
    /// Another row for the same (poll, member) already exists.
    Duplicate,
    /// The poll was closed (or deleted) before the write reached it.
    Closed,
}

/// Result of pointing an existing vote at another option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    Applied,
    /// The vote row is gone.
    Missing,
    Closed,
}

/// Result of withdrawing a member's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteRemoval {
    Removed,
    /// The member had no vote on the poll.
    NoVote,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    NotFound,
    HasVotes,
    Closed,
    /// An option id in the edit does not belong to the poll.
    ForeignOption(i64),
}

/// Timestamps are stored as RFC 3339 UTC text with millisecond precision, which
/// keeps them sortable as plain strings.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drop everything below the millisecond, so an instant returned to a caller
/// equals the one read back from the store later.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_optional_timestamp(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_timestamp(idx, &s)).transpose()
}

pub(crate) fn parse_status(idx: usize, raw: &str) -> rusqlite::Result<PollStatus> {
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
