//! JSON codec for Switchboard frames.
//!
//! Payloads are opaque: anything that serializes to JSON can be sent, and
//! inbound frames decode to a [`serde_json::Value`] without interpretation.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// The value could not be serialized to JSON.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// The frame is not valid JSON.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a value as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(value).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Convert a serializable value into the opaque payload representation.
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(ProtocolError::Encode)
}

/// Decode a JSON text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not valid JSON.
pub fn decode(text: &str) -> Result<Value, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_struct() {
        #[derive(Serialize)]
        struct Chat<'a> {
            msg: &'a str,
        }

        let text = encode(&Chat { msg: "hi" }).unwrap();
        assert_eq!(text, r#"{"msg":"hi"}"#);
    }

    #[test]
    fn test_decode_any_json_value() {
        assert_eq!(decode("42").unwrap(), json!(42));
        assert_eq!(decode(r#"["a",1]"#).unwrap(), json!(["a", 1]));
        assert_eq!(decode("null").unwrap(), Value::Null);
    }

    #[test]
    fn test_decode_invalid() {
        match decode("{not json") {
            Err(ProtocolError::Decode(_)) => {}
            other => panic!("Expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let large = "a".repeat(MAX_FRAME_SIZE);

        match encode(&large) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }
}
