use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Gender, Member, MemberRole, PollStatus};

// -- JWT Claims --

/// JWT claims issued by the identity service. `sub` is the opaque member id;
/// the profile claims are optional and refresh the local member copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemberRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
}

impl Claims {
    /// The member profile carried by the token, if it names a role.
    pub fn member(&self) -> Option<Member> {
        Some(Member {
            id: self.sub,
            role: self.role?,
            age: self.age,
            gender: self.gender,
        })
    }
}

// -- Polls --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePollRequest {
    pub post_id: i64,
    pub title: String,
    pub options: Vec<OptionInput>,
    pub reserved_close_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionInput {
    pub content: String,
}

/// Partial update. Omitted fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePollRequest {
    pub title: Option<String>,
    pub options: Option<Vec<UpdateOptionInput>>,
    pub reserved_close_at: Option<DateTime<Utc>>,
}

/// An option with an id rewrites that option; without one it is added.
/// Existing options not listed are removed.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateOptionInput {
    pub option_id: Option<i64>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollView {
    pub poll_id: i64,
    pub post_id: i64,
    pub title: String,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub expected_close_at: DateTime<Utc>,
    pub options: Vec<OptionView>,
    pub total_vote_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionView {
    pub option_id: i64,
    /// 1-based position among the poll's options.
    pub index: usize,
    pub content: String,
    pub vote_count: u64,
    /// Whether the requesting member currently holds this option.
    pub voted: bool,
    /// Gender × age breakdown, present once the poll is closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Vec<DemographicCount>>,
}

// -- Votes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Created,
    Changed,
    Unchanged,
}

impl VoteOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Created => "vote recorded",
            Self::Changed => "vote changed",
            Self::Unchanged => "already voted for this option",
        }
    }

    /// Unchanged votes touch nothing, so they are never broadcast.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResult {
    pub vote_id: i64,
    pub poll_id: i64,
    pub option_id: i64,
    pub member_id: i64,
    /// Votes currently held by `option_id`, counted when the result was built.
    pub vote_count: u64,
    pub outcome: VoteOutcome,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteCountResponse {
    pub vote_count: u64,
}

// -- Statistics --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCount {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemographicCount {
    pub gender: String,
    pub age_group: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionStatistics {
    pub option_id: i64,
    pub index: usize,
    pub content: String,
    pub vote_count: u64,
    pub age_groups: Vec<BucketCount>,
    pub genders: Vec<BucketCount>,
    pub demographics: Vec<DemographicCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub poll_id: i64,
    pub post_id: i64,
    pub options: Vec<OptionStatistics>,
    pub total_votes: u64,
}

// -- Errors --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_claims_are_optional() {
        let bare: Claims = serde_json::from_str(r#"{"sub":7,"exp":1}"#).unwrap();
        assert!(bare.member().is_none());

        let full: Claims =
            serde_json::from_str(r#"{"sub":7,"exp":1,"role":"USER","age":33,"gender":"FEMALE"}"#).unwrap();
        assert_eq!(
            full.member(),
            Some(Member { id: 7, role: MemberRole::User, age: Some(33), gender: Some(Gender::Female) })
        );
        assert!(!serde_json::to_string(&bare).unwrap().contains("role"));
    }
}
