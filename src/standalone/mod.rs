//! Standalone MCP surface for the recon gateway.

pub mod server;

pub use server::ReconMcpServer;
