//! HTTP API handlers for btr-engine
//!
//! REST for the session operations, SSE for progress events

pub mod health;
pub mod sessions;
pub mod sse;

pub use health::health_routes;
pub use sessions::session_routes;
pub use sse::event_stream;
