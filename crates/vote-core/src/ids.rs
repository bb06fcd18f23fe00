use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(VotingId);
branded_id!(ConnectionId);

impl VotingId {
    /// Fresh unguessable id: 32 lowercase hex characters from a random v4 UUID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voting_id_is_32_hex_chars() {
        let id = VotingId::generate();
        assert_eq!(id.as_str().len(), 32, "got: {id}");
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()), "got: {id}");
    }

    #[test]
    fn voting_ids_are_unique() {
        let ids: std::collections::HashSet<VotingId> = (0..1000).map(|_| VotingId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
        assert_ne!(id, ConnectionId::new());
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = VotingId::from_raw("custom-id-123");
        assert_eq!(id.as_str(), "custom-id-123");
        let parsed: VotingId = "custom-id-123".parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = VotingId::from_raw("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
