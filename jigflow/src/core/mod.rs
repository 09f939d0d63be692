//! Core result types shared across the engine.
//!
//! A [`TestResult`] is the immutable outcome of one test case run. Step
//! results accumulate into an [`AggregatedResult`], the phase-scoped record
//! that is pushed to the remote sink exactly once per phase.

mod aggregate;
mod result;

pub use aggregate::{AggregatedResult, BootRecord, Phase, StepRecord};
pub use result::{Outcome, TestResult};
