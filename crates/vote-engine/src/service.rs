//! Voting business operations over the store, the ownership registry and the transport.
//!
//! Not-found cases are silent: the caller gets an empty reply or nothing at
//! all. Only broken invariants come back as [`VotingError`].

use std::sync::Arc;

use tracing::{debug, error, info};
use vote_core::{ConnectionId, UserAnswer, Variant, Voting, VotingError, VotingId};
use vote_store::{ConnectionRegistry, EvictionListener, EvictionReason, VotingStore};
use vote_telemetry::{
    MetricsRecorder, VOTES_SUBMITTED, VOTINGS_CLOSED, VOTINGS_CREATED, VOTINGS_EVICTED,
};

use crate::reply::Reply;
use crate::transport::Transport;

type IdGenerator = Box<dyn Fn() -> VotingId + Send + Sync>;

pub struct VotingService {
    store: Arc<VotingStore>,
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsRecorder>,
    id_generator: IdGenerator,
}

impl VotingService {
    /// Wire the service up and subscribe its cleanup to the store's evictions.
    pub fn new(
        store: Arc<VotingStore>,
        registry: Arc<ConnectionRegistry>,
        transport: Arc<dyn Transport>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        store.subscribe(Arc::new(EvictionCleanup {
            registry: Arc::clone(&registry),
            transport: Arc::clone(&transport),
            metrics: Arc::clone(&metrics),
        }));
        Self {
            store,
            registry,
            transport,
            metrics,
            id_generator: Box::new(VotingId::generate),
        }
    }

    /// Replace the voting id source.
    pub fn with_id_generator(mut self, generator: impl Fn() -> VotingId + Send + Sync + 'static) -> Self {
        self.id_generator = Box::new(generator);
        self
    }

    pub fn store(&self) -> &VotingStore {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Create a voting owned by `caller`, closing any voting it owned before.
    ///
    /// The caller joins the new voting's group and alone receives `{votingId}`.
    pub fn create_voting(
        &self,
        caller: &ConnectionId,
        question: String,
        variants: Vec<Variant>,
    ) -> Result<VotingId, VotingError> {
        // close before inserting: capacity eviction may drop it without a broadcast
        let previous = self.registry.owned_by(caller);
        if let Some(previous) = &previous {
            debug!(connection_id = %caller, previous = %previous, "closing previously owned voting");
            let _ = self.close_voting(previous);
        }

        let voting_id = (self.id_generator)();
        let _ = self
            .store
            .create(Voting::new(voting_id.clone(), question, variants))
            .map_err(|e| {
                error!(connection_id = %caller, voting_id = %voting_id, "generated duplicated id for voting");
                VotingError::from(e)
            })?;

        if let Err(e) = self.claim_for(caller, &voting_id, previous.as_ref()) {
            let _ = self.store.remove(&voting_id);
            return Err(e);
        }
        self.transport.join_group(caller, &voting_id);
        self.metrics.counter_inc(VOTINGS_CREATED, &[], 1);
        info!(connection_id = %caller, voting_id = %voting_id, "voting created");

        let _ = self
            .transport
            .send_to(caller, &Reply::voting_id(voting_id.clone()));
        Ok(voting_id)
    }

    /// Tell the caller whether the voting exists: `{votingId}` or `{}`.
    pub fn check_voting(&self, caller: &ConnectionId, voting_id: &VotingId) -> bool {
        let exists = self.store.contains(voting_id);
        let reply = if exists {
            Reply::voting_id(voting_id.clone())
        } else {
            Reply::empty()
        };
        let _ = self.transport.send_to(caller, &reply);
        exists
    }

    /// Join the voting's group and send its current state to the caller, or `{}`.
    pub fn get_existing_voting(&self, caller: &ConnectionId, voting_id: &VotingId) -> bool {
        let Some(voting) = self.store.get(voting_id) else {
            let _ = self.transport.send_to(caller, &Reply::empty());
            return false;
        };
        self.transport.join_group(caller, voting.id());
        let _ = self
            .transport
            .send_to(caller, &Reply::Snapshot(voting.snapshot()));
        true
    }

    /// Record the caller's vote, replacing its earlier one, and broadcast the result.
    ///
    /// Closed votings and unknown variant ids are accepted as-is.
    pub fn submit_vote_variant(
        &self,
        caller: &ConnectionId,
        voting_id: &VotingId,
        variant_id: i64,
        user: String,
    ) -> bool {
        let Some(voting) = self.store.get(voting_id) else {
            debug!(connection_id = %caller, voting_id = %voting_id, "vote for unknown voting ignored");
            return false;
        };
        voting.record_answer(caller.clone(), UserAnswer { variant_id, user });
        self.metrics.counter_inc(VOTES_SUBMITTED, &[], 1);
        let recipients = self
            .transport
            .broadcast(voting_id, &Reply::Snapshot(voting.snapshot()));
        debug!(connection_id = %caller, voting_id = %voting_id, variant_id, recipients, "vote recorded");
        true
    }

    /// Flag the voting closed and broadcast its state. No-op for unknown ids.
    ///
    /// The voting stays in the store and its owner's claim is kept.
    pub fn close_voting(&self, voting_id: &VotingId) -> bool {
        let Some(voting) = self.store.get(voting_id) else {
            return false;
        };
        if voting.close() {
            self.metrics.counter_inc(VOTINGS_CLOSED, &[], 1);
            info!(voting_id = %voting_id, "voting closed");
        }
        let _ = self
            .transport
            .broadcast(voting_id, &Reply::Snapshot(voting.snapshot()));
        true
    }

    /// Close whatever the connection owns. The claim itself is left for eviction.
    pub fn on_disconnect(&self, connection_id: &ConnectionId) -> Option<VotingId> {
        let voting_id = self.registry.owned_by(connection_id)?;
        info!(connection_id = %connection_id, voting_id = %voting_id, "owner disconnected");
        let _ = self.close_voting(&voting_id);
        Some(voting_id)
    }

    /// Expire stale votings and drop claims on votings no longer stored.
    ///
    /// Returns `(evicted, purged_claims)`.
    pub fn sweep(&self) -> (usize, usize) {
        let evicted = self.store.sweep_expired();
        let purged = self.reconcile();
        (evicted, purged)
    }

    /// Drop claims pointing at votings the store no longer holds.
    pub fn reconcile(&self) -> usize {
        let store = &self.store;
        self.registry.retain_live(|voting_id| store.contains_key(voting_id))
    }

    /// Claim `voting_id` for the caller, force-closing whatever it owns that
    /// is not `already_closed`.
    fn claim_for(
        &self,
        caller: &ConnectionId,
        voting_id: &VotingId,
        already_closed: Option<&VotingId>,
    ) -> Result<(), VotingError> {
        if self.registry.claim(caller, voting_id).is_ok() {
            return Ok(());
        }
        if let Some(previous) = self.registry.release(caller) {
            if &previous != voting_id && Some(&previous) != already_closed {
                debug!(connection_id = %caller, previous = %previous, "closing previously owned voting");
                let _ = self.close_voting(&previous);
            }
        }
        self.registry.claim(caller, voting_id).map_err(|_| {
            error!(connection_id = %caller, voting_id = %voting_id, "can't add voting id to registry");
            VotingError::ClaimFailed {
                connection_id: caller.clone(),
                voting_id: voting_id.clone(),
            }
        })
    }
}

/// Keeps the registry and the transport's groups in step with the store.
struct EvictionCleanup {
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsRecorder>,
}

impl EvictionListener for EvictionCleanup {
    fn on_evict(&self, voting_id: &VotingId, reason: EvictionReason) {
        let purged = self.registry.purge(voting_id);
        self.transport.drop_group(voting_id);
        let reason = reason.to_string();
        self.metrics
            .counter_inc(VOTINGS_EVICTED, &[("reason", reason.as_str())], 1);
        debug!(voting_id = %voting_id, reason = %reason, purged, "voting evicted");
    }
}
