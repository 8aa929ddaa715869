//! Claude Code SDK - drive the Claude Code agent from Rust.
//!
//! [`ClaudeCode`] runs one-shot prompts; [`Conversation`] threads a session
//! through repeated turns. Every call spawns the `claude` binary with a
//! freshly built argument vector and decodes its output as it arrives.

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod conversation;
mod error;

pub use client::{ClaudeCode, Response};
pub use conversation::{Conversation, ConversationState, RecordStream, TurnStream};
pub use error::{Error, ExecutionError, Result, TimeoutError};
