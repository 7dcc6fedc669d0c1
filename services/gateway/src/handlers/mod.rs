//! HTTP handlers: gateway-owned endpoints and the proxy fallback

pub mod health;
pub mod proxy;

pub use health::{gateway_info, health_check, metrics};
pub use proxy::proxy;
