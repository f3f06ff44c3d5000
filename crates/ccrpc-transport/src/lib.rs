//! Count-contigs RPC: transport layer
//!
//! The HTTP front door (Axum) and the outbound JSON-RPC client.
//! The front door handles:
//! - CORS pre-flight and response headers
//! - Body reading and JSON parse errors
//! - Client address and bearer-token extraction
//! - Status codes for the serialized reply
//!
//! Routing and authentication live behind the `RequestHandler` trait.

pub mod client;
pub mod server;

pub use client::JsonRpcClient;
pub use server::{HttpCall, RequestHandler, TransportConfig, TransportServer, router};
