//! Fusion of technique estimates
//!
//! - agreement: multi-tier pairwise agreement between technique peaks
//! - aggregator: ensemble confidence, quality dampening, ceiling rule, rectified time

pub mod aggregator;
pub mod agreement;

pub use aggregator::ConfidenceAggregator;
pub use agreement::AgreementAnalyzer;
