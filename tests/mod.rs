//! Test suite for trailsync
//!
//! This module organizes all tests

pub mod integration;
pub mod property;
