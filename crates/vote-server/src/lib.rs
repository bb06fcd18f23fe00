pub mod client;
pub mod config;
pub mod handlers;
pub mod rpc;
pub mod server;

pub use config::{load_config, ConfigError, ServerConfig};
pub use server::{start, ServerHandle};
