//! Input and output validation
//!
//! - quality_assessor: scores birth-data precision and free-text answer quality
//! - reliability: maps a confidence score onto a reliability label

pub mod quality_assessor;
pub mod reliability;

pub use quality_assessor::QualityAssessor;
pub use reliability::ReliabilityClassifier;
