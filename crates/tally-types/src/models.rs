use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Poll lifecycle. A poll moves from `Ongoing` to `Closed` once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollStatus {
    Ongoing,
    Closed,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ONGOING",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONGOING" => Ok(Self::Ongoing),
            "CLOSED" => Ok(Self::Closed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Member role as reported by the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    User,
    Admin,
    Guest,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
            Self::Guest => "GUEST",
        }
    }

    /// Only regular members and admins may cast votes.
    pub fn can_vote(&self) -> bool {
        matches!(self, Self::User | Self::Admin)
    }
}

impl FromStr for MemberRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Self::User),
            "ADMIN" => Ok(Self::Admin),
            "GUEST" => Ok(Self::Guest),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "MALE",
            Self::Female => "FEMALE",
        }
    }
}

impl FromStr for Gender {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MALE" => Ok(Self::Male),
            "FEMALE" => Ok(Self::Female),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Demographic attributes the engine needs about a voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub role: MemberRole,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        assert_eq!(serde_json::to_string(&PollStatus::Ongoing).unwrap(), "\"ONGOING\"");
        assert_eq!("CLOSED".parse::<PollStatus>().unwrap(), PollStatus::Closed);
        assert!("closed".parse::<PollStatus>().is_err());
    }

    #[test]
    fn guests_cannot_vote() {
        assert!(MemberRole::User.can_vote());
        assert!(MemberRole::Admin.can_vote());
        assert!(!MemberRole::Guest.can_vote());
    }
}
