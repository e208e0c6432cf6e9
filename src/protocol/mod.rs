//! Wire protocol: JSON-RPC 2.0 envelopes and the stdio server loop.

pub mod jsonrpc;
pub mod server;

pub use server::McpServer;
