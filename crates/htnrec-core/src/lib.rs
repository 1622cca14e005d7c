//! Core library for htnrec: HTN domains, grounding of decomposition
//! methods, and bottom-up recognition of partially observed plans.

pub mod domain;
pub mod lattice;
pub mod recognizer;
pub mod rule;
pub mod subplan;
pub mod task;
pub mod term;
pub mod timeline;

pub use domain::{Domain, DomainBuilder, DomainError};
pub use recognizer::{
    InsertionMode, Problem, RecognitionError, RecognitionOutcome, RecognizedPlan, Recognizer,
    RecognizerConfig,
};
