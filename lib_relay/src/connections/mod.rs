//! # Connections Module
//!
//! Persistent connections to external services.

/// Redis connection setup and URL handling.
pub mod cache_redis;
