//! parley-core: shared protocol library for the parley messaging relay.
//!
//! Provides user identities, the wire envelope and its JSON codec, and the
//! HS256 bearer tokens presented at the WebSocket handshake.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod token;

// Re-export commonly used items at crate root.
pub use codec::{decode_inbound, decode_outbound, encode_outbound};
pub use envelope::{Envelope, InboundFrame, OutboundFrame, Payload};
pub use error::{ParleyError, ParleyResult};
pub use identity::{SessionId, UserId};
pub use token::{generate_secret, issue_token, verify_token, Claims};
