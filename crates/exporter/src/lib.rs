//! Addon exporter service
//!
//! Configuration loading and the HTTP API, shared by the binary and its
//! integration tests.

pub mod api;
pub mod config;
