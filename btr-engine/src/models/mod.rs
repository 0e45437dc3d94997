//! Data models for btr-engine
//!
//! - Rectification session state machine

pub mod rectification_session;

pub use rectification_session::{
    RectificationSession, SessionState, StateTransition, TerminationReason,
};
