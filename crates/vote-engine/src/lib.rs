pub mod reply;
pub mod service;
pub mod transport;

pub use reply::Reply;
pub use service::VotingService;
pub use transport::Transport;
