//! HTTP API for the change stream

pub mod handlers;
pub mod routes;
pub mod stream_handlers;

pub use handlers::{AppError, FeedState, ServerState};
pub use routes::create_router;
