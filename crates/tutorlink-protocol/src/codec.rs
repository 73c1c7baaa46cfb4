//! JSON codec for protocol events.
//!
//! Events travel as JSON text WebSocket messages. Decoding failures carry
//! enough context to log, but the connection loop treats them as silent
//! drops per the protocol's no-negative-acknowledgement policy.

use crate::events::{ClientEvent, ServerEvent};
use thiserror::Error;

/// Maximum accepted inbound message size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound message exceeds the size limit.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode an inbound client event.
///
/// # Errors
///
/// Returns an error if the message is oversized or is not a well-formed
/// tagged event.
pub fn decode_client_event(raw: &str) -> Result<ClientEvent, ProtocolError> {
    if raw.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(raw.len()));
    }
    Ok(serde_json::from_str(raw)?)
}

/// Encode an outbound server event.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_server_event(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Slot;

    #[test]
    fn test_decode_valid_event() {
        let event = decode_client_event(r#"{"type":"delete_slot","slot_id":"slot_9"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::DeleteSlot {
                slot_id: "slot_9".into()
            }
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_client_event("not json").is_err());
        assert!(decode_client_event("{}").is_err());
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let raw = format!(
            r#"{{"type":"leave_room","room":"r","name":"{}"}}"#,
            "a".repeat(MAX_MESSAGE_SIZE)
        );
        match decode_client_event(&raw) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("expected MessageTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_decode_server_event() {
        let event = ServerEvent::SlotDeleted {
            slot_id: "slot_1".into(),
        };
        let raw = encode_server_event(&event).unwrap();
        let back: ServerEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(event, back);

        // Entities embed unchanged.
        let upsert = ServerEvent::SlotUpserted {
            slot: Slot::default(),
        };
        assert!(encode_server_event(&upsert).unwrap().contains("slot_upserted"));
    }
}
