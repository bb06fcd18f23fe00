use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use vote_core::{ConnectionId, VotingId};

/// Which voting each connection created and owns.
///
/// Lookups go by connection only; purging by voting id is a linear scan.
/// The one-voting-per-connection rule lives in the service, not here.
#[derive(Default)]
pub struct ConnectionRegistry {
    owners: DashMap<ConnectionId, VotingId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `voting_id` as owned by `connection_id` if it owns nothing yet.
    ///
    /// On conflict nothing changes and the currently owned id is returned.
    pub fn claim(&self, connection_id: &ConnectionId, voting_id: &VotingId) -> Result<(), VotingId> {
        match self.owners.entry(connection_id.clone()) {
            Entry::Occupied(current) => Err(current.get().clone()),
            Entry::Vacant(slot) => {
                let _ = slot.insert(voting_id.clone());
                Ok(())
            }
        }
    }

    /// Drop the connection's claim, returning what it owned.
    pub fn release(&self, connection_id: &ConnectionId) -> Option<VotingId> {
        self.owners.remove(connection_id).map(|(_, voting_id)| voting_id)
    }

    pub fn owned_by(&self, connection_id: &ConnectionId) -> Option<VotingId> {
        self.owners.get(connection_id).map(|v| v.value().clone())
    }

    /// Remove every claim pointing at `voting_id`. Returns how many were removed.
    pub fn purge(&self, voting_id: &VotingId) -> usize {
        self.retain_live(|owned| owned != voting_id)
    }

    /// Keep only claims whose voting passes `is_live`. Returns how many were removed.
    pub fn retain_live(&self, is_live: impl Fn(&VotingId) -> bool) -> usize {
        let mut removed = 0;
        self.owners.retain(|_, voting_id| {
            let keep = is_live(voting_id);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(s: &str) -> ConnectionId {
        ConnectionId::from_raw(s)
    }

    fn vid(s: &str) -> VotingId {
        VotingId::from_raw(s)
    }

    #[test]
    fn claim_vacant_then_conflict() {
        let reg = ConnectionRegistry::new();
        assert_eq!(reg.claim(&conn("c1"), &vid("a")), Ok(()));
        assert_eq!(reg.claim(&conn("c1"), &vid("b")), Err(vid("a")));
        assert_eq!(reg.owned_by(&conn("c1")), Some(vid("a")));
    }

    #[test]
    fn release_returns_owned() {
        let reg = ConnectionRegistry::new();
        reg.claim(&conn("c1"), &vid("a")).unwrap();
        assert_eq!(reg.release(&conn("c1")), Some(vid("a")));
        assert_eq!(reg.release(&conn("c1")), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn purge_removes_all_claims_on_voting() {
        let reg = ConnectionRegistry::new();
        reg.claim(&conn("c1"), &vid("a")).unwrap();
        reg.claim(&conn("c2"), &vid("a")).unwrap();
        reg.claim(&conn("c3"), &vid("b")).unwrap();

        assert_eq!(reg.purge(&vid("a")), 2);
        assert_eq!(reg.purge(&vid("a")), 0);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.owned_by(&conn("c3")), Some(vid("b")));
    }

    #[test]
    fn retain_live_reconciles_against_key_set() {
        let reg = ConnectionRegistry::new();
        reg.claim(&conn("c1"), &vid("a")).unwrap();
        reg.claim(&conn("c2"), &vid("b")).unwrap();

        let live = [vid("b")];
        assert_eq!(reg.retain_live(|v| live.contains(v)), 1);
        assert_eq!(reg.owned_by(&conn("c1")), None);
        assert_eq!(reg.owned_by(&conn("c2")), Some(vid("b")));
    }
}
