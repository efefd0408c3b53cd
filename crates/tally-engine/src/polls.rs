use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use tally_db::models::{EditOutcome, NewPoll, PollEdit, PollInsert, PollRow};
use tally_types::api::{
    CreatePollRequest, DemographicCount, OptionView, PollView, UpdatePollRequest,
};
use tally_types::models::{Member, MemberRole, PollStatus};

use crate::error::{PollError, Result};
use crate::lifecycle::{self, DEFAULT_POLL_DAYS};
use crate::service::PollService;
use crate::statistics;

/// Every poll has exactly this many options.
pub const OPTION_COUNT: usize = 2;

/// A reserved close time must leave at least this much voting time.
pub const MIN_POLL_DURATION_HOURS: i64 = 1;

fn require_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PollError::InvalidInput("poll title must not be blank".into()));
    }
    Ok(title.to_string())
}

fn require_options<'a>(contents: impl ExactSizeIterator<Item = &'a str>) -> Result<Vec<String>> {
    if contents.len() != OPTION_COUNT {
        return Err(PollError::InvalidInput(format!(
            "a poll needs exactly {} options, got {}",
            OPTION_COUNT,
            contents.len()
        )));
    }

    contents
        .map(|c| {
            let c = c.trim();
            if c.is_empty() {
                Err(PollError::InvalidInput("poll option must not be blank".into()))
            } else {
                Ok(c.to_string())
            }
        })
        .collect()
}

fn require_close_window(
    reserved: DateTime<Utc>,
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    if reserved < earliest || reserved > latest {
        return Err(PollError::InvalidInput(format!(
            "reserved close time {} must fall between {} and {}",
            reserved, earliest, latest
        )));
    }
    Ok(reserved)
}

impl PollService {
    fn require_member(&self, member_id: i64) -> Result<Member> {
        self.identity
            .resolve(member_id)?
            .ok_or_else(|| PollError::NotFound(format!("member {} not found", member_id)))
    }

    fn require_owner(&self, poll: &PollRow, member_id: i64) -> Result<()> {
        if poll.owner_id != member_id {
            return Err(PollError::Forbidden(format!(
                "member {} does not own poll {}",
                member_id, poll.id
            )));
        }
        Ok(())
    }

    /// Poll detail as seen by `member_id`. Expired polls are closed first;
    /// closed polls carry their demographic breakdown.
    pub fn get_poll(&self, poll_id: i64, member_id: Option<i64>) -> Result<PollView> {
        let poll = self.load_poll(poll_id)?;
        self.build_view(&poll, member_id)
    }

    pub fn create_poll(&self, request: CreatePollRequest, member_id: i64) -> Result<PollView> {
        let member = self.require_member(member_id)?;
        if member.role == MemberRole::Guest {
            return Err(PollError::Forbidden("guests cannot create polls".into()));
        }

        let title = require_title(&request.title)?;
        let options = require_options(request.options.iter().map(|o| o.content.as_str()))?;

        let now = self.clock.now();
        let reserved_close_at = request
            .reserved_close_at
            .map(|reserved| {
                require_close_window(
                    reserved,
                    now + Duration::hours(MIN_POLL_DURATION_HOURS),
                    now + Duration::days(DEFAULT_POLL_DAYS),
                )
            })
            .transpose()?;

        let new_poll = NewPoll {
            post_id: request.post_id,
            owner_id: member_id,
            title,
            options,
            reserved_close_at,
            created_at: now,
        };

        let poll_id = match self.db.create_poll(&new_poll)? {
            PollInsert::Created(id) => id,
            PollInsert::PostTaken => {
                return Err(PollError::InvalidState(format!(
                    "post {} already has a poll",
                    request.post_id
                )));
            }
        };

        info!("Member {} created poll {} on post {}", member_id, poll_id, request.post_id);
        self.get_poll(poll_id, Some(member_id))
    }

    /// Owner edit. Refused once the poll is closed or holds any vote.
    pub fn update_poll(
        &self,
        poll_id: i64,
        request: UpdatePollRequest,
        member_id: i64,
    ) -> Result<PollView> {
        let poll = self.load_poll(poll_id)?;
        self.require_owner(&poll, member_id)?;
        if poll.status == PollStatus::Closed {
            return Err(PollError::InvalidState(format!(
                "poll {} is closed and cannot be edited",
                poll_id
            )));
        }

        let title = request.title.as_deref().map(require_title).transpose()?;

        let options: Option<Vec<(Option<i64>, String)>> = match &request.options {
            Some(options) => {
                let contents = require_options(options.iter().map(|o| o.content.as_str()))?;
                let ids: Vec<Option<i64>> = options.iter().map(|o| o.option_id).collect();
                if let (Some(a), Some(b)) = (ids[0], ids[1]) {
                    if a == b {
                        return Err(PollError::InvalidInput(format!(
                            "option {} listed twice",
                            a
                        )));
                    }
                }
                Some(ids.into_iter().zip(contents).collect())
            }
            None => None,
        };

        let now = self.clock.now();
        let reserved_close_at = request
            .reserved_close_at
            .map(|reserved| {
                require_close_window(
                    reserved,
                    now + Duration::hours(MIN_POLL_DURATION_HOURS),
                    poll.created_at + Duration::days(DEFAULT_POLL_DAYS),
                )
            })
            .transpose()?;

        let edit = PollEdit {
            title,
            options,
            reserved_close_at,
            updated_at: now,
        };

        match self.db.edit_poll(poll_id, &edit)? {
            EditOutcome::Applied => {}
            EditOutcome::NotFound => return Err(PollError::poll_not_found(poll_id)),
            EditOutcome::Closed => {
                return Err(PollError::InvalidState(format!(
                    "poll {} is closed and cannot be edited",
                    poll_id
                )));
            }
            EditOutcome::HasVotes => {
                return Err(PollError::InvalidState(format!(
                    "poll {} already has votes and cannot be edited",
                    poll_id
                )));
            }
            EditOutcome::ForeignOption(option_id) => {
                return Err(PollError::InvalidInput(format!(
                    "option {} does not belong to poll {}",
                    option_id, poll_id
                )));
            }
        }

        info!("Member {} edited poll {}", member_id, poll_id);
        self.get_poll(poll_id, Some(member_id))
    }

    /// Owner delete. Options and votes go with the poll.
    pub fn delete_poll(&self, poll_id: i64, member_id: i64) -> Result<()> {
        let poll = self
            .db
            .get_poll(poll_id)?
            .ok_or_else(|| PollError::poll_not_found(poll_id))?;
        self.require_owner(&poll, member_id)?;

        if !self.db.delete_poll(poll_id)? {
            return Err(PollError::poll_not_found(poll_id));
        }
        info!("Member {} deleted poll {}", member_id, poll_id);
        Ok(())
    }

    /// Close a poll now. Closing an already closed poll changes nothing.
    pub fn close_poll(&self, poll_id: i64) -> Result<PollView> {
        let poll = self.load_poll(poll_id)?;
        if poll.status == PollStatus::Closed {
            debug!("Poll {} already closed at {:?}", poll_id, poll.closed_at);
            return self.build_view(&poll, None);
        }

        if self.db.close_poll_now(poll_id, self.clock.now())? {
            info!("Poll {} closed manually", poll_id);
        }
        // Either our close or a concurrent one; the stored row is authoritative.
        let poll = self
            .db
            .get_poll(poll_id)?
            .ok_or_else(|| PollError::poll_not_found(poll_id))?;
        self.build_view(&poll, None)
    }

    /// `close_poll` on behalf of a member: the owner or an admin.
    pub fn close_poll_as(&self, poll_id: i64, member_id: i64) -> Result<PollView> {
        let poll = self
            .db
            .get_poll(poll_id)?
            .ok_or_else(|| PollError::poll_not_found(poll_id))?;
        if poll.owner_id != member_id {
            let member = self.require_member(member_id)?;
            if member.role != MemberRole::Admin {
                return Err(PollError::Forbidden(format!(
                    "only the owner or an admin may close poll {}",
                    poll_id
                )));
            }
        }
        self.close_poll(poll_id)
    }

    /// Close every ongoing poll whose deadline has passed.
    fn sweep_expired(&self) -> Result<()> {
        for poll in self.db.list_polls(Some(PollStatus::Ongoing))? {
            self.observe(poll)?;
        }
        Ok(())
    }

    /// All polls with the given status (or all of them), oldest first.
    pub fn list_polls(&self, status: Option<PollStatus>, member_id: Option<i64>) -> Result<Vec<PollView>> {
        self.sweep_expired()?;
        self.db
            .list_polls(status)?
            .iter()
            .map(|poll| self.build_view(poll, member_id))
            .collect()
    }

    /// Polls with the most votes, highest first; ties go to the older poll.
    pub fn top_polls(&self, status: PollStatus, limit: u32, member_id: Option<i64>) -> Result<Vec<PollView>> {
        self.sweep_expired()?;

        let mut views = Vec::new();
        for (poll_id, _) in self.db.top_polls(status, limit)? {
            // Deleted since the ranking query ran.
            let Some(poll) = self.db.get_poll(poll_id)? else {
                continue;
            };
            views.push(self.build_view(&poll, member_id)?);
        }
        Ok(views)
    }

    fn build_view(&self, poll: &PollRow, member_id: Option<i64>) -> Result<PollView> {
        let options = self.db.get_options(poll.id)?;
        let counts: HashMap<i64, u64> = self.db.option_vote_counts(poll.id)?.into_iter().collect();
        let held = match member_id {
            Some(member_id) => self.db.find_vote(poll.id, member_id)?.map(|v| v.option_id),
            None => None,
        };

        let mut breakdown: HashMap<i64, Vec<DemographicCount>> = if poll.status == PollStatus::Closed {
            let rows = self.db.demographic_rows(poll.id)?;
            statistics::aggregate(&options, &rows)
                .into_iter()
                .map(|s| (s.option_id, s.demographics))
                .collect()
        } else {
            HashMap::new()
        };

        let options: Vec<OptionView> = options
            .into_iter()
            .enumerate()
            .map(|(i, option)| OptionView {
                option_id: option.id,
                index: i + 1,
                vote_count: counts.get(&option.id).copied().unwrap_or(0),
                voted: held == Some(option.id),
                statistics: breakdown.remove(&option.id),
                content: option.content,
            })
            .collect();

        Ok(PollView {
            poll_id: poll.id,
            post_id: poll.post_id,
            title: poll.title.clone(),
            status: poll.status,
            created_at: poll.created_at,
            closed_at: poll.closed_at,
            expected_close_at: lifecycle::deadline(poll.created_at, poll.reserved_close_at),
            total_vote_count: counts.values().sum(),
            options,
        })
    }
}

#[cfg(test)]
mod tests {
    use tally_types::api::{OptionInput, UpdateOptionInput};
    use tally_types::models::Gender;

    use super::*;
    use crate::testing::{Fixture, POLL_OWNER};

    fn request(post_id: i64, options: &[&str]) -> CreatePollRequest {
        CreatePollRequest {
            post_id,
            title: "점심 메뉴".into(),
            options: options
                .iter()
                .map(|c| OptionInput { content: c.to_string() })
                .collect(),
            reserved_close_at: None,
        }
    }

    #[test]
    fn created_poll_view() {
        let fx = Fixture::new();
        let view = fx.service.create_poll(request(7, &["  짜장  ", "짬뽕"]), POLL_OWNER).unwrap();

        assert_eq!(view.post_id, 7);
        assert_eq!(view.status, PollStatus::Ongoing);
        assert_eq!(view.created_at, fx.now());
        assert_eq!(view.expected_close_at, fx.now() + Duration::days(7));
        assert_eq!(view.closed_at, None);
        assert_eq!(view.total_vote_count, 0);
        let contents: Vec<_> = view.options.iter().map(|o| (o.index, o.content.as_str())).collect();
        assert_eq!(contents, vec![(1, "짜장"), (2, "짬뽕")]);
        assert!(view.options.iter().all(|o| o.statistics.is_none() && !o.voted));
    }

    #[test]
    fn create_rejects_bad_input() {
        let fx = Fixture::new();
        for options in [&["하나"][..], &["a", "b", "c"][..], &["a", "  "][..]] {
            assert!(matches!(
                fx.service.create_poll(request(1, options), POLL_OWNER),
                Err(PollError::InvalidInput(_))
            ));
        }

        let mut blank_title = request(1, &["a", "b"]);
        blank_title.title = "   ".into();
        assert!(matches!(
            fx.service.create_poll(blank_title, POLL_OWNER),
            Err(PollError::InvalidInput(_))
        ));

        for reserved in [fx.now() + Duration::minutes(59), fx.now() + Duration::days(7) + Duration::seconds(1)] {
            let mut req = request(1, &["a", "b"]);
            req.reserved_close_at = Some(reserved);
            assert!(matches!(
                fx.service.create_poll(req, POLL_OWNER),
                Err(PollError::InvalidInput(_))
            ));
        }

        assert!(matches!(
            fx.service.create_poll(request(1, &["a", "b"]), 404),
            Err(PollError::NotFound(_))
        ));
        fx.member(5, MemberRole::Guest, None, None);
        assert!(matches!(
            fx.service.create_poll(request(1, &["a", "b"]), 5),
            Err(PollError::Forbidden(_))
        ));
        assert!(fx.db.list_polls(None).unwrap().is_empty());
    }

    #[test]
    fn one_poll_per_post() {
        let fx = Fixture::new();
        fx.create_poll(3, None);
        assert!(matches!(
            fx.service.create_poll(request(3, &["a", "b"]), POLL_OWNER),
            Err(PollError::InvalidState(_))
        ));
    }

    #[test]
    fn view_marks_callers_option() {
        let fx = Fixture::new();
        let (poll_id, [first, second]) = fx.create_poll(1, None);
        fx.voter(1);
        fx.voter(2);
        fx.service.cast_vote(poll_id, second, 1).unwrap();
        fx.service.cast_vote(poll_id, second, 2).unwrap();

        let view = fx.service.get_poll(poll_id, Some(1)).unwrap();
        assert_eq!(view.total_vote_count, 2);
        assert_eq!(view.options[0].option_id, first);
        assert_eq!(view.options[0].vote_count, 0);
        assert!(!view.options[0].voted);
        assert_eq!(view.options[1].vote_count, 2);
        assert!(view.options[1].voted);

        let anonymous = fx.service.get_poll(poll_id, None).unwrap();
        assert!(anonymous.options.iter().all(|o| !o.voted));
    }

    #[test]
    fn reserved_close_scenario() {
        let fx = Fixture::new();
        let reserved = fx.now() + Duration::hours(2);
        let (poll_id, [first, _]) = fx.create_poll(1, Some(reserved));
        fx.voter(1);
        fx.service.cast_vote(poll_id, first, 1).unwrap();

        fx.clock.advance(Duration::hours(1) + Duration::minutes(59));
        assert_eq!(fx.service.get_poll(poll_id, None).unwrap().status, PollStatus::Ongoing);

        fx.clock.advance(Duration::minutes(1));
        let view = fx.service.get_poll(poll_id, Some(1)).unwrap();
        assert_eq!(view.status, PollStatus::Closed);
        assert_eq!(view.closed_at, Some(reserved));
        assert_eq!(view.expected_close_at, reserved);

        let stats = view.options[0].statistics.as_ref().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].gender, Gender::Female.as_str());
        assert_eq!(stats[0].age_group, "20대");
        assert!(view.options[1].statistics.as_ref().unwrap().is_empty());
    }

    #[test]
    fn manual_close_is_idempotent() {
        let fx = Fixture::new();
        let (poll_id, _) = fx.create_poll(1, None);

        let closed = fx.service.close_poll(poll_id).unwrap();
        assert_eq!(closed.status, PollStatus::Closed);
        assert_eq!(closed.closed_at, Some(fx.now()));
        assert_eq!(closed.expected_close_at, fx.now());

        fx.clock.advance(Duration::minutes(10));
        let again = fx.service.close_poll(poll_id).unwrap();
        assert_eq!(again.closed_at, closed.closed_at);
    }

    #[test]
    fn close_requires_owner_or_admin() {
        let fx = Fixture::new();
        let (poll_id, _) = fx.create_poll(1, None);
        fx.voter(1);
        fx.member(2, MemberRole::Admin, None, None);

        assert!(matches!(fx.service.close_poll_as(poll_id, 1), Err(PollError::Forbidden(_))));
        assert_eq!(fx.service.close_poll_as(poll_id, 2).unwrap().status, PollStatus::Closed);

        let (other, _) = fx.create_poll(2, None);
        assert_eq!(
            fx.service.close_poll_as(other, POLL_OWNER).unwrap().status,
            PollStatus::Closed
        );
        assert!(matches!(fx.service.close_poll_as(999, 2), Err(PollError::NotFound(_))));
    }

    #[test]
    fn owner_edits_before_first_vote() {
        let fx = Fixture::new();
        let (poll_id, [first, second]) = fx.create_poll(1, None);

        let edit = UpdatePollRequest {
            title: Some("수정된 제목".into()),
            options: Some(vec![
                UpdateOptionInput { option_id: Some(first), content: "예".into() },
                UpdateOptionInput { option_id: None, content: "아니오".into() },
            ]),
            reserved_close_at: Some(fx.now() + Duration::days(2)),
        };
        let view = fx.service.update_poll(poll_id, edit, POLL_OWNER).unwrap();
        assert_eq!(view.title, "수정된 제목");
        assert_eq!(view.expected_close_at, fx.now() + Duration::days(2));
        assert_eq!(view.options[0].option_id, first);
        assert_eq!(view.options[0].content, "예");
        assert_ne!(view.options[1].option_id, second);
        assert_eq!(view.options[1].content, "아니오");
        assert_eq!(view.options.len(), 2);
    }

    #[test]
    fn edit_guards() {
        let fx = Fixture::new();
        let (poll_id, [first, _]) = fx.create_poll(1, None);
        let (_, [foreign, _]) = fx.create_poll(2, None);
        fx.voter(1);

        assert!(matches!(
            fx.service.update_poll(poll_id, UpdatePollRequest::default(), 1),
            Err(PollError::Forbidden(_))
        ));

        let three = UpdatePollRequest {
            options: Some(vec![
                UpdateOptionInput { option_id: None, content: "a".into() },
                UpdateOptionInput { option_id: None, content: "b".into() },
                UpdateOptionInput { option_id: None, content: "c".into() },
            ]),
            ..Default::default()
        };
        assert!(matches!(
            fx.service.update_poll(poll_id, three, POLL_OWNER),
            Err(PollError::InvalidInput(_))
        ));

        let stolen = UpdatePollRequest {
            options: Some(vec![
                UpdateOptionInput { option_id: Some(foreign), content: "a".into() },
                UpdateOptionInput { option_id: None, content: "b".into() },
            ]),
            ..Default::default()
        };
        assert!(matches!(
            fx.service.update_poll(poll_id, stolen, POLL_OWNER),
            Err(PollError::InvalidInput(_))
        ));

        let too_late = UpdatePollRequest {
            reserved_close_at: Some(fx.now() + Duration::days(8)),
            ..Default::default()
        };
        assert!(matches!(
            fx.service.update_poll(poll_id, too_late, POLL_OWNER),
            Err(PollError::InvalidInput(_))
        ));

        fx.service.cast_vote(poll_id, first, 1).unwrap();
        let retitle = UpdatePollRequest {
            title: Some("새 제목".into()),
            ..Default::default()
        };
        assert!(matches!(
            fx.service.update_poll(poll_id, retitle.clone(), POLL_OWNER),
            Err(PollError::InvalidState(_))
        ));

        fx.service.cancel_vote(poll_id, 1).unwrap();
        fx.service.close_poll(poll_id).unwrap();
        assert!(matches!(
            fx.service.update_poll(poll_id, retitle, POLL_OWNER),
            Err(PollError::InvalidState(_))
        ));
    }

    #[test]
    fn delete_cascades_and_checks_owner() {
        let fx = Fixture::new();
        let (poll_id, [first, _]) = fx.create_poll(1, None);
        fx.voter(1);
        fx.service.cast_vote(poll_id, first, 1).unwrap();

        assert!(matches!(fx.service.delete_poll(poll_id, 1), Err(PollError::Forbidden(_))));
        fx.service.delete_poll(poll_id, POLL_OWNER).unwrap();

        assert!(matches!(fx.service.get_poll(poll_id, None), Err(PollError::NotFound(_))));
        assert!(fx.db.find_vote(poll_id, 1).unwrap().is_none());
        assert!(matches!(fx.service.delete_poll(poll_id, POLL_OWNER), Err(PollError::NotFound(_))));
    }

    #[test]
    fn listing_closes_expired_polls_first() {
        let fx = Fixture::new();
        let (short, _) = fx.create_poll(1, Some(fx.now() + Duration::hours(1)));
        let (long, _) = fx.create_poll(2, None);

        fx.clock.advance(Duration::hours(2));
        let closed = fx.service.list_polls(Some(PollStatus::Closed), None).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].poll_id, short);
        assert!(closed[0].options.iter().all(|o| o.statistics.is_some()));

        let ongoing = fx.service.list_polls(Some(PollStatus::Ongoing), None).unwrap();
        assert_eq!(ongoing.len(), 1);
        assert_eq!(ongoing[0].poll_id, long);

        assert_eq!(fx.service.list_polls(None, None).unwrap().len(), 2);
    }

    #[test]
    fn top_polls_rank_by_votes() {
        let fx = Fixture::new();
        let (quiet, _) = fx.create_poll(1, None);
        let (busy, [b1, b2]) = fx.create_poll(2, None);
        let (tied, [t1, _]) = fx.create_poll(3, None);
        let (fourth, [_, f2]) = fx.create_poll(4, None);
        for member in 1..=4 {
            fx.voter(member);
        }
        fx.service.cast_vote(busy, b1, 1).unwrap();
        fx.service.cast_vote(busy, b2, 2).unwrap();
        fx.service.cast_vote(tied, t1, 1).unwrap();
        fx.service.cast_vote(tied, t1, 3).unwrap();
        fx.service.cast_vote(fourth, f2, 4).unwrap();

        let top = fx.service.top_polls(PollStatus::Ongoing, 3, Some(1)).unwrap();
        let ranked: Vec<_> = top.iter().map(|v| (v.poll_id, v.total_vote_count)).collect();
        assert_eq!(ranked, vec![(busy, 2), (tied, 2), (fourth, 1)]);
        assert!(top[0].options[0].voted);
        assert!(!ranked.iter().any(|(id, _)| *id == quiet));

        assert_eq!(fx.service.top_polls(PollStatus::Ongoing, 1, None).unwrap().len(), 1);
        assert!(fx.service.top_polls(PollStatus::Closed, 5, None).unwrap().is_empty());
    }
}
