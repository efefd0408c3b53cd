use tracing::{debug, warn};

use tally_db::models::{VoteChange, VoteInsert, VoteRemoval, VoteRow};
use tally_types::api::{VoteOutcome, VoteResult};
use tally_types::models::PollStatus;

use crate::error::{PollError, Result};
use crate::service::PollService;

impl PollService {
    /// Cast, change or confirm a member's vote.
    ///
    /// Checks run in order: poll exists, poll still open, option belongs to
    /// the poll, member may vote. The vote itself is a lookup followed by an
    /// update or an insert; an insert that loses a race against a concurrent
    /// first vote is resolved against the row that won.
    pub fn cast_vote(&self, poll_id: i64, option_id: i64, member_id: i64) -> Result<VoteResult> {
        let poll = self.load_poll(poll_id)?;
        if poll.status == PollStatus::Closed {
            return Err(closed_to_votes(poll_id));
        }

        let option = self
            .db
            .get_option(option_id)?
            .ok_or_else(|| PollError::NotFound(format!("poll option {} not found", option_id)))?;
        if option.poll_id != poll_id {
            return Err(PollError::InvalidInput(format!(
                "option {} does not belong to poll {}",
                option_id, poll_id
            )));
        }

        let member = self
            .identity
            .resolve(member_id)?
            .ok_or_else(|| PollError::NotFound(format!("member {} not found", member_id)))?;
        if !member.role.can_vote() {
            return Err(PollError::Forbidden(format!(
                "member {} is not allowed to vote",
                member_id
            )));
        }

        let (vote, outcome) = match self.db.find_vote(poll_id, member_id)? {
            Some(existing) => self.apply_to_existing(existing, option_id)?,
            None => self.record_first_vote(poll_id, option_id, member_id)?,
        };

        let result = self.vote_result(vote, outcome)?;
        debug!(
            "Member {} on poll {}: {:?} (option {} now has {} votes)",
            member_id, poll_id, outcome, option_id, result.vote_count
        );

        self.emitter.emit(&result);
        Ok(result)
    }

    /// Vote for the option at a 1-based position among the poll's options.
    pub fn cast_vote_by_index(&self, poll_id: i64, index: usize, member_id: i64) -> Result<VoteResult> {
        // Lifecycle before the index, so a closed poll reports its state first.
        let poll = self.load_poll(poll_id)?;
        if poll.status == PollStatus::Closed {
            return Err(closed_to_votes(poll_id));
        }

        let options = self.db.get_options(poll_id)?;
        if options.is_empty() {
            return Err(PollError::InvalidInput(format!("poll {} has no options", poll_id)));
        }
        if index < 1 || index > options.len() {
            return Err(PollError::InvalidInput(format!(
                "option index {} is out of range 1..={}",
                index,
                options.len()
            )));
        }

        self.cast_vote(poll_id, options[index - 1].id, member_id)
    }

    /// Withdraw a member's vote. Withdrawing a vote that does not exist is a no-op.
    pub fn cancel_vote(&self, poll_id: i64, member_id: i64) -> Result<()> {
        let poll = self.load_poll(poll_id)?;
        if poll.status == PollStatus::Closed {
            return Err(votes_are_final(poll_id));
        }

        match self.db.delete_vote(poll_id, member_id)? {
            VoteRemoval::Removed => {
                debug!("Member {} withdrew their vote on poll {}", member_id, poll_id);
                Ok(())
            }
            VoteRemoval::NoVote => Ok(()),
            VoteRemoval::Closed => Err(votes_are_final(poll_id)),
        }
    }

    /// Insert a first vote, falling back to the stored row once if a
    /// concurrent request for the same member inserted first.
    fn record_first_vote(
        &self,
        poll_id: i64,
        option_id: i64,
        member_id: i64,
    ) -> Result<(VoteRow, VoteOutcome)> {
        match self.insert_vote(poll_id, option_id, member_id) {
            Err(PollError::Conflict) => {
                warn!(
                    "Concurrent first vote detected for member {} on poll {}, resolving against stored vote",
                    member_id, poll_id
                );
                self.recover_from_conflict(poll_id, option_id, member_id)
            }
            other => other,
        }
    }

    fn insert_vote(&self, poll_id: i64, option_id: i64, member_id: i64) -> Result<(VoteRow, VoteOutcome)> {
        match self.db.insert_vote(poll_id, option_id, member_id)? {
            VoteInsert::Created(row) => Ok((row, VoteOutcome::Created)),
            VoteInsert::Duplicate => Err(PollError::Conflict),
            VoteInsert::Closed => Err(closed_to_votes(poll_id)),
        }
    }

    /// The single retry: re-read the winning row and treat this request as a
    /// recast against it. No further insert is attempted.
    fn recover_from_conflict(
        &self,
        poll_id: i64,
        option_id: i64,
        member_id: i64,
    ) -> Result<(VoteRow, VoteOutcome)> {
        match self.db.find_vote(poll_id, member_id)? {
            Some(existing) => self.apply_to_existing(existing, option_id),
            None => Err(PollError::InvalidState(format!(
                "vote for member {} on poll {} was withdrawn concurrently; retry the vote",
                member_id, poll_id
            ))),
        }
    }

    fn apply_to_existing(&self, existing: VoteRow, option_id: i64) -> Result<(VoteRow, VoteOutcome)> {
        if existing.option_id == option_id {
            return Ok((existing, VoteOutcome::Unchanged));
        }

        match self.db.update_vote_option(existing.id, option_id)? {
            VoteChange::Applied => Ok((VoteRow { option_id, ..existing }, VoteOutcome::Changed)),
            VoteChange::Missing => Err(PollError::InvalidState(format!(
                "vote for member {} on poll {} was withdrawn concurrently; retry the vote",
                existing.member_id, existing.poll_id
            ))),
            VoteChange::Closed => Err(closed_to_votes(existing.poll_id)),
        }
    }

    fn vote_result(&self, vote: VoteRow, outcome: VoteOutcome) -> Result<VoteResult> {
        let vote_count = self.db.count_option_votes(vote.option_id)?;
        Ok(VoteResult {
            vote_id: vote.id,
            poll_id: vote.poll_id,
            option_id: vote.option_id,
            member_id: vote.member_id,
            vote_count,
            outcome,
            message: outcome.message().to_string(),
        })
    }

    /// Total votes on a poll.
    pub fn vote_count(&self, poll_id: i64) -> Result<u64> {
        if self.db.get_poll(poll_id)?.is_none() {
            return Err(PollError::poll_not_found(poll_id));
        }
        Ok(self.db.count_poll_votes(poll_id)?)
    }

    /// Total votes on the poll attached to a post.
    pub fn vote_count_by_post(&self, post_id: i64) -> Result<u64> {
        let poll_id = self
            .db
            .poll_id_for_post(post_id)?
            .ok_or_else(|| PollError::NotFound(format!("post {} has no poll", post_id)))?;
        Ok(self.db.count_poll_votes(poll_id)?)
    }
}

fn closed_to_votes(poll_id: i64) -> PollError {
    PollError::InvalidState(format!("poll {} is closed and no longer accepts votes", poll_id))
}

fn votes_are_final(poll_id: i64) -> PollError {
    PollError::InvalidState(format!("poll {} is closed; its votes are final", poll_id))
}
