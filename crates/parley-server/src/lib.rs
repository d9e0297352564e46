//! WebSocket message relay: authenticated clients send addressed messages
//! that the hub delivers to the receiver's live connection.

pub mod auth;
pub mod config;
pub mod handshake;
pub mod hub;
pub mod persist;
pub mod server;
pub mod session;
pub mod transport;

pub use server::ParleyServer;
