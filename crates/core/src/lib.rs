//! Tool bridging for realtime voice sessions.
//!
//! This crate holds everything that happens between a raw event arriving from
//! the remote model and a result frame going back to it:
//!
//! - `tool_call`: recognizes and normalizes tool invocations in arbitrary events.
//! - `tools`: the `Tool` contract, the two webhook-backed tools, and the dispatcher.
//! - `webhook`: the HTTP relay collaborator and its outcome type.
//! - `protocol`: the outbound data-channel wire format.

pub mod protocol;
pub mod tool_call;
pub mod tools;
pub mod webhook;

/// Provenance tag merged into every webhook payload unless configured otherwise.
pub const DEFAULT_SOURCE_TAG: &str = "realtime-agent";
