//! Integration tests for `OrderCore`
//!
//! This crate holds tests that drive the services, coordinator, outbox relay
//! and partitioned executor together over the in-memory backend.

// This is a test-only crate
#![cfg(test)]
