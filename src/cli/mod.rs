//! Agent process plumbing: invocation building, spawning and output decoding.

mod command;
mod events;
mod process;
mod stream;

pub use command::*;
pub use events::*;
pub use process::*;
pub use stream::*;
