//! Property-based tests

pub mod backoff_proptest;
pub mod simplify_proptest;
