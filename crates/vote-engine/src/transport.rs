use vote_core::{ConnectionId, VotingId};

use crate::reply::Reply;

/// Outbound side of the real-time connection layer.
///
/// Every send is fire-and-forget: implementations must not block on a slow
/// or vanished recipient, and failures are only reported through the return
/// value.
pub trait Transport: Send + Sync {
    /// Deliver to one connection. Returns `false` if it was not queued.
    fn send_to(&self, connection_id: &ConnectionId, reply: &Reply) -> bool;

    /// Deliver to every member of the voting's group. Returns the number queued.
    fn broadcast(&self, group: &VotingId, reply: &Reply) -> usize;

    /// Subscribe a connection to a voting's broadcasts.
    fn join_group(&self, connection_id: &ConnectionId, group: &VotingId);

    /// Forget a group entirely.
    fn drop_group(&self, group: &VotingId);
}
