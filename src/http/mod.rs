//! REST Surface
//!
//! The HTTP API over warp: game creation and reads, the synchronous
//! PvAI move surface, and the queue endpoints that feed the event log.

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::ErrorBody;
pub use handlers::ApiContext;
pub use routes::routes;
