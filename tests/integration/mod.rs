//! Integration tests
//!
//! Full flows across the store, engine, remotes and recorder.

pub mod persistence;
pub mod recorder;
pub mod rest_remote;
pub mod sync_scenarios;
