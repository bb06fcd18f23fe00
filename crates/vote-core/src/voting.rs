use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, VotingId};

/// One selectable answer option. Ids are chosen by the creating client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: i64,
    pub text: String,
}

/// A single connection's vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswer {
    pub variant_id: i64,
    pub user: String,
}

/// A live voting: fixed question and variants, mutable answers and closed flag.
///
/// Shared as `Arc<Voting>` between the store and every handler touching it.
/// The answers map never leaves this type; readers get a [`VotingSnapshot`].
#[derive(Debug)]
pub struct Voting {
    id: VotingId,
    question: String,
    variants: Vec<Variant>,
    answers: DashMap<ConnectionId, UserAnswer>,
    closed: AtomicBool,
}

impl Voting {
    pub fn new(id: VotingId, question: impl Into<String>, variants: Vec<Variant>) -> Self {
        Self {
            id,
            question: question.into(),
            variants,
            answers: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &VotingId {
        &self.id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flag the voting closed. Returns `true` if this call made the transition.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Replace the connection's previous answer, if any.
    ///
    /// Neither the variant id nor the closed flag is checked.
    pub fn record_answer(&self, connection_id: ConnectionId, answer: UserAnswer) {
        let _ = self.answers.insert(connection_id, answer);
    }

    pub fn answer_of(&self, connection_id: &ConnectionId) -> Option<UserAnswer> {
        self.answers.get(connection_id).map(|a| a.value().clone())
    }

    pub fn answer_count(&self) -> usize {
        self.answers.len()
    }

    /// Copy the current state into a serializable value.
    pub fn snapshot(&self) -> VotingSnapshot {
        VotingSnapshot {
            id: self.id.clone(),
            question: self.question.clone(),
            variants: self.variants.clone(),
            answers: self.answers.iter().map(|a| a.value().clone()).collect(),
            is_closed: self.is_closed(),
        }
    }
}

/// Point-in-time copy of a [`Voting`], as sent to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingSnapshot {
    pub id: VotingId,
    pub question: String,
    pub variants: Vec<Variant>,
    pub answers: Vec<UserAnswer>,
    pub is_closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lunch() -> Voting {
        Voting::new(
            VotingId::from_raw("v1"),
            "Lunch?",
            vec![
                Variant { id: 1, text: "Pizza".into() },
                Variant { id: 2, text: "Salad".into() },
            ],
        )
    }

    #[test]
    fn new_voting_is_open_and_empty() {
        let v = lunch();
        assert!(!v.is_closed());
        assert_eq!(v.answer_count(), 0);
        assert_eq!(v.variants().len(), 2);
    }

    #[test]
    fn close_transitions_once() {
        let v = lunch();
        assert!(v.close());
        assert!(!v.close());
        assert!(v.is_closed());
    }

    #[test]
    fn answer_replaces_previous_for_same_connection() {
        let v = lunch();
        let conn = ConnectionId::from_raw("c1");
        v.record_answer(conn.clone(), UserAnswer { variant_id: 1, user: "ann".into() });
        v.record_answer(conn.clone(), UserAnswer { variant_id: 2, user: "ann b".into() });
        assert_eq!(v.answer_count(), 1);
        assert_eq!(
            v.answer_of(&conn),
            Some(UserAnswer { variant_id: 2, user: "ann b".into() })
        );
    }

    #[test]
    fn snapshot_is_detached_copy() {
        let v = lunch();
        let snap = v.snapshot();
        v.record_answer(ConnectionId::from_raw("c1"), UserAnswer { variant_id: 1, user: "a".into() });
        let _ = v.close();
        assert!(snap.answers.is_empty());
        assert!(!snap.is_closed);
    }

    #[test]
    fn snapshot_wire_format() {
        let v = lunch();
        v.record_answer(ConnectionId::from_raw("c1"), UserAnswer { variant_id: 1, user: "bob".into() });
        let json = serde_json::to_value(v.snapshot()).unwrap();
        assert_eq!(json["id"], "v1");
        assert_eq!(json["question"], "Lunch?");
        assert_eq!(json["variants"][1]["text"], "Salad");
        assert_eq!(json["answers"][0]["variantId"], 1);
        assert_eq!(json["answers"][0]["user"], "bob");
        assert_eq!(json["isClosed"], false);
    }
}
