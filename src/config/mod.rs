//! Configuration module.

mod loader;
mod mcp;
mod types;

pub use loader::*;
pub use mcp::*;
pub use types::*;
