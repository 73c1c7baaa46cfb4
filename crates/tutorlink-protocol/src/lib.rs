//! # tutorlink-protocol
//!
//! Wire protocol definitions for the Tutorlink realtime server.
//!
//! This crate defines:
//!
//! - **Model** - The marketplace entities (slots, lessons, profiles, demand
//!   requests, conversations, notifications) as they appear on the wire and
//!   in the persisted snapshot
//! - **Events** - The tagged client/server event enums exchanged over the
//!   WebSocket connection
//! - **Codec** - JSON encoding/decoding with the protocol error taxonomy

pub mod codec;
pub mod events;
pub mod model;

pub use codec::{decode_client_event, encode_server_event, ProtocolError};
pub use events::{ClientEvent, ServerEvent};
pub use model::{
    conversation_id, ChatMessage, Conversation, Dataset, DemandRequest, DemandStatus, Lesson,
    LessonFormat, LessonStatus, Notification, Slot, StudentProfile, TeacherProfile, UserRecord,
    UserRole,
};
