//! Network transport for the relay endpoint.

pub mod websocket;

pub use websocket::{bind, upgrade, AcceptedConnection, WsStream};
