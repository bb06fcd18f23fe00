pub mod error;
pub mod registry;
pub mod store;

pub use error::StoreError;
pub use registry::ConnectionRegistry;
pub use store::{EvictionListener, EvictionReason, StoreConfig, VotingStore};
