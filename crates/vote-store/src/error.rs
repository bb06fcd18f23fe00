use vote_core::{VotingError, VotingId};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate voting id: {0}")]
    DuplicateId(VotingId),
}

impl From<StoreError> for VotingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateId(id) => VotingError::DuplicateId(id),
        }
    }
}
