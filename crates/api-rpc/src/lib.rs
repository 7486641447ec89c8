//! JSON-RPC API Layer
//!
//! JSON-RPC 2.0 control surface for submitting trainings and managing watchers.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
