//! Integration tests for tickstream-app.
//!
//! These tests verify the interaction between components:
//! - Stream connection lifecycle over a real WebSocket
//! - HTTP fallback polling
//! - End-to-end application runs

pub mod common;
