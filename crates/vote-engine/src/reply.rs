use serde::Serialize;
use vote_core::{VotingId, VotingSnapshot};

/// Body of a message sent to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// `{"votingId": ...}`
    VotingId {
        #[serde(rename = "votingId")]
        voting_id: VotingId,
    },
    /// Full voting state.
    Snapshot(VotingSnapshot),
    /// `{}`
    Empty {},
}

impl Reply {
    pub fn voting_id(voting_id: VotingId) -> Self {
        Self::VotingId { voting_id }
    }

    pub fn empty() -> Self {
        Self::Empty {}
    }

    pub fn as_snapshot(&self) -> Option<&VotingSnapshot> {
        match self {
            Self::Snapshot(s) => Some(s),
            _ => None,
        }
    }
}
