pub mod api;
pub mod auth;
pub mod config;
pub mod logging;
pub mod node;
pub mod x402;

pub use config::NodeConfig;
pub use node::{load_authority_secret, parse_authority_secret, AgoraNode};
