//! MCP surface: the action catalog, JSON dispatch and the stdio server.
//!
//! ```text
//! stdin line ──► McpProtocol (JSON-RPC) ──► ActionHandler ──► TruthEngine
//! stdout line ◄──────────── result or ErrorEnvelope ◄──────────┘
//! ```

pub mod actions;
pub mod handler;
pub mod protocol;
#[cfg(feature = "server")]
pub mod server;

pub use actions::{Action, ConsistencyTier};
pub use handler::ActionHandler;
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpProtocol, MCP_PROTOCOL_VERSION};
#[cfg(feature = "server")]
pub use server::{serve, serve_stdio};
