//! Shared integration test harness.

// Each test binary uses a different slice of the harness.
#![allow(dead_code)]

pub mod client;
pub mod server;
