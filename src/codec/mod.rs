//! Wire representation of envelopes
//!
//! The bridge speaks JSON on the wire, mirroring the serde derives on the
//! envelope types one-to-one. Keeping the translation in one place allows the
//! wire format to be swapped without touching the pipeline.

use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::BoxedError;

/// Encodes an outgoing request for the publish side
pub fn encode_request(envelope: &RequestEnvelope) -> Result<Vec<u8>, BoxedError> {
    serde_json::to_vec(envelope).map_err(Into::into)
}

/// Decodes a raw inbound message into a request envelope
///
/// Used by answering services consuming the request topic.
pub fn decode_request(payload: &[u8]) -> Result<RequestEnvelope, BoxedError> {
    serde_json::from_slice(payload).map_err(Into::into)
}

/// Encodes a reply for publication to a request's reply destination
pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Vec<u8>, BoxedError> {
    serde_json::to_vec(envelope).map_err(Into::into)
}

/// Decodes a raw inbound message from the reply topic
pub fn decode_response(payload: &[u8]) -> Result<ResponseEnvelope, BoxedError> {
    serde_json::from_slice(payload).map_err(Into::into)
}
