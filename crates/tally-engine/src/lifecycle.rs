use chrono::{DateTime, Duration, Utc};
use tracing::info;

use tally_db::models::{PollRow, truncate_to_millis};
use tally_types::models::PollStatus;

use crate::error::{PollError, Result};
use crate::service::PollService;

/// Polls without a reserved close time run for this many days.
pub const DEFAULT_POLL_DAYS: i64 = 7;

/// What a read must do with a poll it just loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Still accepting votes.
    Ongoing,
    /// Stored as closed; nothing to write.
    Closed,
    /// Past its deadline but stored as ongoing. The caller persists the
    /// transition with `closed_at` before answering.
    Expired { closed_at: DateTime<Utc> },
}

/// The instant a poll stops accepting votes.
pub fn deadline(created_at: DateTime<Utc>, reserved_close_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    reserved_close_at.unwrap_or_else(|| created_at + Duration::days(DEFAULT_POLL_DAYS))
}

pub fn evaluate(
    status: PollStatus,
    created_at: DateTime<Utc>,
    reserved_close_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Lifecycle {
    match status {
        PollStatus::Closed => Lifecycle::Closed,
        PollStatus::Ongoing if now >= deadline(created_at, reserved_close_at) => {
            Lifecycle::Expired { closed_at: now }
        }
        PollStatus::Ongoing => Lifecycle::Ongoing,
    }
}

impl PollService {
    /// Load a poll and bring its stored status up to date.
    pub(crate) fn load_poll(&self, poll_id: i64) -> Result<PollRow> {
        let poll = self
            .db
            .get_poll(poll_id)?
            .ok_or_else(|| PollError::poll_not_found(poll_id))?;
        self.observe(poll)
    }

    /// Apply the lifecycle to a loaded row. An expired poll is closed with a
    /// conditional update; if another request closed it first, the row is
    /// re-read so every reader reports the same `closed_at`.
    pub(crate) fn observe(&self, mut poll: PollRow) -> Result<PollRow> {
        let now = self.clock.now();
        match evaluate(poll.status, poll.created_at, poll.reserved_close_at, now) {
            Lifecycle::Ongoing | Lifecycle::Closed => Ok(poll),
            Lifecycle::Expired { closed_at } => {
                // Stored at millisecond precision; answer with what later reads will see.
                let closed_at = truncate_to_millis(closed_at);
                if self.db.close_poll_if_ongoing(poll.id, closed_at)? {
                    info!("Poll {} reached its deadline and is now closed", poll.id);
                    poll.status = PollStatus::Closed;
                    poll.closed_at = Some(closed_at);
                    Ok(poll)
                } else {
                    self.db
                        .get_poll(poll.id)?
                        .ok_or_else(|| PollError::poll_not_found(poll.id))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::clock::Clock;
    use crate::testing::Fixture;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn default_deadline_is_seven_days() {
        let created = t0();
        assert_eq!(deadline(created, None), created + Duration::days(7));

        let reserved = created + Duration::hours(2);
        assert_eq!(deadline(created, Some(reserved)), reserved);
    }

    #[test]
    fn evaluate_transitions_at_deadline() {
        let created = t0();
        let reserved = Some(created + Duration::hours(2));

        assert_eq!(
            evaluate(PollStatus::Ongoing, created, reserved, created + Duration::minutes(119)),
            Lifecycle::Ongoing
        );

        let at_deadline = created + Duration::hours(2);
        assert_eq!(
            evaluate(PollStatus::Ongoing, created, reserved, at_deadline),
            Lifecycle::Expired { closed_at: at_deadline }
        );
    }

    #[test]
    fn closed_stays_closed() {
        let created = t0();
        // Even a deadline far in the future cannot reopen a closed poll.
        let reserved = Some(created + Duration::days(3));
        assert_eq!(evaluate(PollStatus::Closed, created, reserved, created), Lifecycle::Closed);
    }

    #[test]
    fn stale_poll_is_closed_on_read() {
        let fx = Fixture::new();
        let (poll_id, _) = fx.create_poll(1, None);
        let created_at = fx.clock.now();

        fx.clock.advance(Duration::days(7) + Duration::seconds(1));
        let view = fx.service.get_poll(poll_id, None).unwrap();
        assert_eq!(view.status, PollStatus::Closed);
        assert_eq!(view.closed_at, Some(created_at + Duration::days(7) + Duration::seconds(1)));

        let stored = fx.db.get_poll(poll_id).unwrap().unwrap();
        assert_eq!(stored.status, PollStatus::Closed);
        assert_eq!(stored.closed_at, view.closed_at);
    }

    #[test]
    fn later_readers_keep_first_closed_at() {
        let fx = Fixture::new();
        let (poll_id, _) = fx.create_poll(1, None);

        fx.clock.advance(Duration::days(8));
        let first = fx.service.get_poll(poll_id, None).unwrap().closed_at;

        fx.clock.advance(Duration::hours(5));
        let second = fx.service.get_poll(poll_id, None).unwrap().closed_at;
        assert_eq!(first, second);
    }

    #[test]
    fn closed_at_matches_stored_value() {
        let fx = Fixture::new();
        let (poll_id, _) = fx.create_poll(1, None);

        fx.clock.advance(Duration::days(7) + Duration::nanoseconds(2_345_678));
        let first = fx.service.get_poll(poll_id, None).unwrap().closed_at;
        assert_eq!(first, Some(t0() + Duration::days(7) + Duration::milliseconds(2)));

        let stored = fx.db.get_poll(poll_id).unwrap().unwrap();
        assert_eq!(stored.closed_at, first);
        assert_eq!(fx.service.get_poll(poll_id, None).unwrap().closed_at, first);
    }

    #[test]
    fn losing_close_race_reports_winner_timestamp() {
        let fx = Fixture::new();
        let (poll_id, _) = fx.create_poll(1, None);
        let stale = fx.db.get_poll(poll_id).unwrap().unwrap();

        let winner = t0() + Duration::days(7);
        assert!(fx.db.close_poll_if_ongoing(poll_id, winner).unwrap());

        fx.clock.advance(Duration::days(9));
        let observed = fx.service.observe(stale).unwrap();
        assert_eq!(observed.status, PollStatus::Closed);
        assert_eq!(observed.closed_at, Some(winner));
    }
}
