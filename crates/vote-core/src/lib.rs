pub mod errors;
pub mod ids;
pub mod voting;

pub use errors::VotingError;
pub use ids::{ConnectionId, VotingId};
pub use voting::{UserAnswer, Variant, Voting, VotingSnapshot};
