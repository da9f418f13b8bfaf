//! Condition matching engine
//!
//! Evaluates every stored condition against a freshly polled rate snapshot.
//! Matching is pure: the store is read through a snapshot and never mutated.

pub mod matcher;

pub use matcher::{MatchReport, Matcher, MatcherConfig};
