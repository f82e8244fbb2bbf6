//! HTTP endpoint handlers.

pub mod mcp;
pub mod status;
