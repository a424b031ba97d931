//! Gatekeeper - Request Rate Limiting
//!
//! This crate decides, per caller and per protected endpoint, whether an
//! incoming request may proceed. Decisions come from a sliding window kept in
//! a shared store when one is configured, and from a process-local fixed
//! window when it is not or when the shared store fails.

pub mod config;
pub mod error;
pub mod ratelimit;
