//! Engram MCP server library
//!
//! The server core, tool implementations, protocol plumbing, and
//! daemon lifecycle, shared by the `engram-mcp` server binary and the
//! `engram` control CLI.

pub mod daemon;
pub mod protocol;
pub mod server;
pub mod tools;
