//! Integration tests for csync-pipeline.
//!
//! These tests drive the whole pipeline against a local WebSocket server:
//! - Session establishment and the config request
//! - Message flow into the dataset
//! - Reconnection behavior

pub mod common;
