mod health;
pub mod mcp;

pub use health::{health_check, readiness_check};
pub use mcp::handle_rpc;
