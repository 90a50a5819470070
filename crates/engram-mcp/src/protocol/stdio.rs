//! stdio transport
//!
//! One JSON-RPC message per line on stdin, responses on stdout.
//! Logging goes to stderr so stdout stays a clean protocol channel.

use std::io::{self, BufRead, BufReader, Write};

use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::McpServer;

/// stdio transport for the MCP server
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Run the server until stdin closes.
    pub async fn run(self, mut server: McpServer) -> Result<(), io::Error> {
        let stdin = io::stdin();
        let stdout = io::stdout();

        let reader = BufReader::new(stdin.lock());
        let mut stdout = stdout.lock();

        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("failed to read line: {}", e);
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            debug!("received {} bytes", line.len());

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!("failed to parse request: {}", e);
                    let response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                    write_response(&mut stdout, &response)?;
                    continue;
                }
            };

            if let Some(response) = server.handle_request(request).await {
                write_response(&mut stdout, &response)?;
            }
        }
        Ok(())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn write_response(stdout: &mut impl Write, response: &JsonRpcResponse) -> io::Result<()> {
    match serde_json::to_string(response) {
        Ok(text) => {
            debug!("sending {} bytes", text.len());
            writeln!(stdout, "{text}")?;
            stdout.flush()
        }
        Err(e) => {
            error!("failed to serialize response: {}", e);
            // Minimal fallback so the client does not hang
            let fallback =
                r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;
            writeln!(stdout, "{fallback}")?;
            stdout.flush()
        }
    }
}
