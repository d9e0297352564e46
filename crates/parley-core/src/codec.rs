//! JSON framing for the message stream.
//!
//! Each WebSocket text (or binary) message carries exactly one JSON object.

use crate::envelope::{Envelope, InboundFrame, OutboundFrame};
use crate::error::{ParleyError, ParleyResult};

/// Decode and validate a client frame.
///
/// Fails with [`ParleyError::InvalidFrame`] on malformed JSON, a missing or
/// non-UUID `receiver_id`, a missing payload, or the nil receiver.
pub fn decode_inbound(data: &[u8]) -> ParleyResult<InboundFrame> {
    let frame: InboundFrame =
        serde_json::from_slice(data).map_err(|e| ParleyError::InvalidFrame(e.to_string()))?;
    if frame.receiver_id.is_nil() {
        return Err(ParleyError::InvalidFrame("nil receiver_id".into()));
    }
    Ok(frame)
}

/// Encode an envelope as the JSON text delivered to the receiver.
pub fn encode_outbound(env: &Envelope) -> ParleyResult<String> {
    Ok(serde_json::to_string(&OutboundFrame::from(env))?)
}

/// Decode a server frame (client side and tests).
pub fn decode_outbound(data: &[u8]) -> ParleyResult<OutboundFrame> {
    Ok(serde_json::from_slice(data)?)
}
