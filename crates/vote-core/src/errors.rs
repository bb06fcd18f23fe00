use crate::ids::{ConnectionId, VotingId};

/// Broken invariants inside the voting server.
///
/// Caller-level conditions (unknown voting ids, malformed messages) are not
/// errors at all; everything in here means the process state is suspect.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VotingError {
    #[error("generated duplicated id for voting: {0}")]
    DuplicateId(VotingId),

    #[error("can't claim voting {voting_id} for connection {connection_id}")]
    ClaimFailed {
        connection_id: ConnectionId,
        voting_id: VotingId,
    },
}

impl VotingError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateId(_) | Self::ClaimFailed { .. })
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::DuplicateId(_) => "duplicate_id",
            Self::ClaimFailed { .. } => "claim_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_are_fatal() {
        assert!(VotingError::DuplicateId(VotingId::from_raw("a")).is_fatal());
        assert!(VotingError::ClaimFailed {
            connection_id: ConnectionId::from_raw("c"),
            voting_id: VotingId::from_raw("a"),
        }
        .is_fatal());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(
            VotingError::DuplicateId(VotingId::from_raw("a")).error_kind(),
            "duplicate_id"
        );
        let err = VotingError::ClaimFailed {
            connection_id: ConnectionId::from_raw("c"),
            voting_id: VotingId::from_raw("a"),
        };
        assert_eq!(err.error_kind(), "claim_failed");
        assert_eq!(err.to_string(), "can't claim voting a for connection c");
    }
}
