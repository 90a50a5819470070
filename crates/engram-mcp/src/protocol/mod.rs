//! MCP protocol plumbing
//!
//! JSON-RPC 2.0 message types and the stdio transport.

pub mod stdio;
pub mod types;
