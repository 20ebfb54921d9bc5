//! Depot Server
//!
//! HTTP surface of the client↔vendor and vendor↔warehouse container
//! ledgers.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{DatabaseConfig, ServerConfig};
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
