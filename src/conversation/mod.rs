//! Multi-turn conversations with the agent.

mod session;
mod state;

pub use session::*;
pub use state::*;
