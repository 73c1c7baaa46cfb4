//! Client and server event types.
//!
//! Every WebSocket message is one JSON object tagged with `type`. Inbound
//! intents are [`ClientEvent`]; everything the server emits, whether a
//! global broadcast or a targeted delivery, is a [`ServerEvent`].

use crate::model::{
    ChatMessage, Conversation, DemandRequest, Lesson, Notification, Slot, StudentProfile,
    TeacherProfile, UserRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An inbound intent from a client.
///
/// Mutating intents carry whole entity values (replace-by-id semantics) or
/// the correlating ids the mutation needs. A payload that fails to parse is
/// dropped by the connection loop; there is no negative acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Declare this connection as teacher `teacher_id`, binding it in the
    /// connection registry and flushing any pending demand deliveries.
    SubscribeTeacher { teacher_id: String },

    /// Declare interest in notifications addressed to `user_id`.
    WatchNotifications { user_id: String },

    CreateSlot { slot: Slot },
    UpdateSlot { slot: Slot },
    DeleteSlot { slot_id: String },

    /// Book a slot for a student, creating a lesson.
    BookSlot { slot_id: String, student_id: String },

    /// Cancel a booking: removes the lesson and reopens the paired slot.
    CancelBooking { lesson_id: String },

    /// Mark a lesson completed. One-way; ignored for non-scheduled lessons.
    CompleteLesson { lesson_id: String },

    UpdateTeacherProfile { profile: TeacherProfile },
    UpdateStudentProfile { profile: StudentProfile },

    SendMessage {
        sender_id: String,
        sender_name: String,
        receiver_id: Option<String>,
        content: String,
    },

    MarkConversationRead { conversation_id: String, user_id: String },
    ClearConversation { conversation_id: String },
    ArchiveConversation { conversation_id: String },
    UnarchiveConversation { conversation_id: String },
    DeleteConversation { conversation_id: String },

    /// Submit a demand request to be routed to matching teachers.
    SubmitDemand { request: DemandRequest },

    /// Accept a pending demand request. First accept wins.
    AcceptDemand { request_id: String, teacher_id: String },

    // Call signaling. The relay forwards offer/answer/candidate payloads
    // verbatim to the other members of the room and never inspects them.
    JoinRoom { room: String, name: String, role: String },
    LeaveRoom { room: String, name: String },
    Offer { room: String, sdp: String },
    Answer { room: String, sdp: String },
    IceCandidate { room: String, candidate: serde_json::Value },
}

/// An outbound event from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    // Full-state push on connect, in this order.
    Slots { slots: Vec<Slot> },
    Lessons { lessons: Vec<Lesson> },
    Conversations { conversations: Vec<Conversation> },
    Teachers { teachers: HashMap<String, TeacherProfile> },
    Students { students: Vec<StudentProfile> },
    Users { users: Vec<UserRecord> },

    // Entity change broadcasts.
    SlotUpserted { slot: Slot },
    SlotDeleted { slot_id: String },
    /// Full-state catch-up for clients that missed a granular event.
    DataChanged { slots: Vec<Slot>, lessons: Vec<Lesson> },
    LessonAdded { lesson: Lesson },
    LessonRemoved { lesson_id: String },
    LessonUpdated { lesson: Lesson },
    TeacherUpdated { profile: TeacherProfile },
    StudentUpdated { profile: StudentProfile },
    /// Synthetic directory update so connected clients can refresh their
    /// user list without a full resync.
    UserRegistered { user: UserRecord },

    MessageReceived { conversation_id: String, message: ChatMessage },
    /// A conversation mutated; clients resolve the change by id.
    ConversationChanged { conversation_id: String },
    NotificationCreated { notification: Notification },

    /// Targeted delivery of a demand request to one matched teacher.
    DemandCreated { request: DemandRequest },
    DemandAccepted { request: DemandRequest },

    // Signaling relay.
    PeerJoined { room: String, name: String, role: String },
    PeerLeft { room: String, name: String },
    Offer { room: String, sdp: String },
    Answer { room: String, sdp: String },
    IceCandidate { room: String, candidate: serde_json::Value },
}
