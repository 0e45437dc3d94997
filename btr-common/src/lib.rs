//! # BTR Common Library
//!
//! Shared code for the birth-time rectification service:
//! - Error type used at service boundaries
//! - Bootstrap configuration helpers (TOML path resolution, data folder)
//! - Event types (RectificationEvent) and the broadcast EventBus
//! - Minute-of-day clock arithmetic

pub mod clock;
pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
