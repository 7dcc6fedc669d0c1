//! Unit tests module organization

pub mod auth;
pub mod rate_limiter;
pub mod routing;

// Test utilities and helpers
pub mod helpers;
