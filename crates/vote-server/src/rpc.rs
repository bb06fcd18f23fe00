use serde::Deserialize;
use vote_core::{Variant, VotingId};

/// One inbound envelope, decoded once at the socket boundary.
///
/// The `action` field selects the variant; anything that does not decode
/// into one of these is dropped by the caller.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all_fields = "camelCase")]
pub enum Request {
    SubmitVoting {
        #[serde(default)]
        question: String,
        variants: Vec<Variant>,
    },
    CheckVoting {
        voting_id: VotingId,
    },
    GetExistingVoting {
        voting_id: VotingId,
    },
    SubmitVoteVariant {
        voting_id: VotingId,
        variant_id: i64,
        #[serde(default)]
        user: String,
    },
    CloseVoting {
        voting_id: VotingId,
    },
}

impl Request {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Wire name of the action, for logging.
    pub fn action(&self) -> &'static str {
        match self {
            Self::SubmitVoting { .. } => "SubmitVoting",
            Self::CheckVoting { .. } => "CheckVoting",
            Self::GetExistingVoting { .. } => "GetExistingVoting",
            Self::SubmitVoteVariant { .. } => "SubmitVoteVariant",
            Self::CloseVoting { .. } => "CloseVoting",
        }
    }
}
