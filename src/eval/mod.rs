//! Evaluation gate: fixed-opponent match play with statistical reporting.

pub mod harness;
pub mod stats;

pub use harness::{CompareReport, EvalReport, EvaluationHarness};
pub use stats::{cohen_h, wilson_interval};
