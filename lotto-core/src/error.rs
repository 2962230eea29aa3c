use thiserror::Error;

pub type Result<T> = std::result::Result<T, LotteryError>;

/// Why a compare-and-swap transition was not committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// `start` lost: the draw is already running or needs a reset.
    AlreadyInProgress,
    /// `step` lost: wrong status, draw already full, stale generation or controller mismatch.
    StepRejected,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::AlreadyInProgress => write!(f, "draw already in progress or requires reset"),
            ConflictKind::StepRejected => write!(f, "draw step rejected"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LotteryError {
    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid selection: ticket must contain {expected} unique numbers, got {actual}")]
    InvalidSelection { expected: usize, actual: usize },

    #[error("Concurrency conflict: {0}")]
    Conflict(ConflictKind),

    #[error("All numbers in range already drawn")]
    RangeExhausted,

    #[error("Range too small: need {needed} unique numbers, only {available} available")]
    RangeTooSmall { needed: usize, available: usize },

    #[error("Secure entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LotteryError {
    pub fn invalid_name(msg: impl Into<String>) -> Self {
        Self::InvalidName(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn entropy(msg: impl Into<String>) -> Self {
        Self::EntropyUnavailable(msg.into())
    }

    /// Rejected before any store interaction.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LotteryError::InvalidName(_) | LotteryError::InvalidSelection { .. }
        )
    }

    /// Another writer won the race; re-read state instead of retrying blindly.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LotteryError::Conflict(_))
    }

    /// Short, non-fatal text suitable for a status line or banner.
    pub fn user_message(&self) -> String {
        match self {
            LotteryError::Conflict(ConflictKind::AlreadyInProgress) => {
                "Draw already in progress".to_string()
            }
            LotteryError::Conflict(ConflictKind::StepRejected) => "Draw step rejected".to_string(),
            LotteryError::InvalidName(msg) => msg.clone(),
            LotteryError::InvalidSelection { expected, .. } => {
                format!("Pick exactly {} different numbers", expected)
            }
            other => other.to_string(),
        }
    }
}
