//! Test module for the consensus core.
//!
//! - Support: recording/loopback networks and fixture builders
//! - Integration: multi-player rounds driven end to end in process

pub mod support;
mod integration;
