//! Authentication: maps an auth configuration to environment overlays.

mod resolver;
mod types;

pub use resolver::*;
pub use types::*;
