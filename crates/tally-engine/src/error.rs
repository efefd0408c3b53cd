pub type Result<T> = std::result::Result<T, PollError>;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// Poll, option or member does not exist
    #[error("{0}")]
    NotFound(String),

    /// Operation not allowed in the poll's current state
    #[error("{0}")]
    InvalidState(String),

    /// Malformed request: foreign option, bad index, bad close time
    #[error("{0}")]
    InvalidInput(String),

    /// Caller lacks the role or ownership required
    #[error("{0}")]
    Forbidden(String),

    /// A concurrent first vote for the same member won the insert race.
    /// Only raised inside the vote coordinator, which resolves it before returning.
    #[error("concurrent vote for the same member and poll")]
    Conflict,

    /// Storage failure; not recoverable by the engine
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PollError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict => "CONFLICT",
            Self::Storage(_) => "STORAGE",
        }
    }

    pub(crate) fn poll_not_found(poll_id: i64) -> Self {
        Self::NotFound(format!("poll {} not found", poll_id))
    }
}
