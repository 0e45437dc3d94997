//! Session lifecycle: in-memory store and the adaptive controller

pub mod controller;
pub mod store;

pub use controller::{SessionController, SessionOutcome, SessionResult};
pub use store::{SessionHandle, SessionStore};
