//! bot-core: Shared infrastructure for the budget bot services.
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;

pub use serde_json;
pub use tokio;
pub use tracing;
