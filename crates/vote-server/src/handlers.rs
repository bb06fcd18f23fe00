//! Routes decoded envelopes to voting operations.

use std::sync::Arc;

use tracing::{debug, error};
use vote_core::{ConnectionId, VotingError};
use vote_engine::VotingService;
use vote_telemetry::{MetricsRecorder, MESSAGES_DROPPED};

use crate::rpc::Request;

/// Shared state available to the message router.
pub struct HandlerState {
    pub service: Arc<VotingService>,
    pub metrics: Arc<MetricsRecorder>,
}

impl HandlerState {
    pub fn new(service: Arc<VotingService>, metrics: Arc<MetricsRecorder>) -> Self {
        Self { service, metrics }
    }
}

/// Handle one raw envelope from `caller` to completion, including any sends.
///
/// Undecodable messages are dropped without a reply. An `Err` means an
/// internal invariant broke and the caller's connection should be closed.
pub fn dispatch(state: &HandlerState, caller: &ConnectionId, raw: &str) -> Result<(), VotingError> {
    let request = match Request::parse(raw) {
        Ok(request) => request,
        Err(e) => {
            debug!(connection_id = %caller, error = %e, "dropping undecodable message");
            state
                .metrics
                .counter_inc(MESSAGES_DROPPED, &[("reason", "undecodable")], 1);
            return Ok(());
        }
    };

    debug!(connection_id = %caller, action = request.action(), "dispatching");
    let service = &state.service;

    match request {
        Request::SubmitVoting { question, variants } => {
            if let Err(e) = service.create_voting(caller, question, variants) {
                error!(
                    connection_id = %caller,
                    error = %e,
                    kind = e.error_kind(),
                    "voting creation hit a broken invariant"
                );
                return Err(e);
            }
        }
        Request::CheckVoting { voting_id } => {
            let _ = service.check_voting(caller, &voting_id);
        }
        Request::GetExistingVoting { voting_id } => {
            let _ = service.get_existing_voting(caller, &voting_id);
        }
        Request::SubmitVoteVariant {
            voting_id,
            variant_id,
            user,
        } => {
            let _ = service.submit_vote_variant(caller, &voting_id, variant_id, user);
        }
        Request::CloseVoting { voting_id } => {
            let _ = service.close_voting(&voting_id);
        }
    }
    Ok(())
}
