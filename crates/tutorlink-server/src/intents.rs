//! Mutating-intent dispatch.
//!
//! Every inbound [`ClientEvent`] lands here. State-changing intents apply
//! their mutation through the snapshot store (which persists before the
//! function returns), then emit either a global broadcast or a targeted
//! delivery. There is no request/response surface: a malformed or
//! unresolvable intent changes nothing and answers nothing.

use crate::handlers::AppState;
use crate::metrics;
use chrono::Utc;
use std::collections::HashSet;
use tracing::debug;
use tutorlink_core::{matching_teachers, teacher_matches, ConnectionHandle};
use tutorlink_protocol::model::generate_id;
use tutorlink_protocol::{
    conversation_id, ChatMessage, ClientEvent, Conversation, DemandRequest, DemandStatus, Lesson,
    LessonStatus, Notification, ServerEvent, UserRecord,
};

/// Apply one client intent.
///
/// `bound_teacher` is the connection's declared teacher identity; it is
/// written by `SubscribeTeacher` and read by the disconnect cleanup.
pub fn handle_client_event(
    event: ClientEvent,
    conn_id: &str,
    handle: &ConnectionHandle,
    bound_teacher: &mut Option<String>,
    state: &AppState,
) {
    metrics::record_event(event_kind(&event));

    match event {
        ClientEvent::SubscribeTeacher { teacher_id } => {
            subscribe_teacher(&teacher_id, handle, state);
            *bound_teacher = Some(teacher_id);
            metrics::set_teachers_bound(state.registry.bound_count());
        }

        ClientEvent::WatchNotifications { user_id } => {
            state.registry.watch_notifications(&user_id, handle.clone());
        }

        ClientEvent::CreateSlot { slot } | ClientEvent::UpdateSlot { slot } => {
            if slot.id.is_empty() {
                return;
            }
            let (slots, lessons) = state.store.mutate(|data| {
                match data.slots.iter_mut().find(|s| s.id == slot.id) {
                    Some(existing) => *existing = slot.clone(),
                    None => data.slots.push(slot.clone()),
                }
                (data.slots.clone(), data.lessons.clone())
            });
            state.broadcast(ServerEvent::SlotUpserted { slot });
            state.broadcast(ServerEvent::DataChanged { slots, lessons });
        }

        ClientEvent::DeleteSlot { slot_id } => {
            let removed = state.store.mutate(|data| {
                let before = data.slots.len();
                data.slots.retain(|s| s.id != slot_id);
                (before != data.slots.len())
                    .then(|| (data.slots.clone(), data.lessons.clone()))
            });
            // Unknown id: referential miss, nothing happened.
            if let Some((slots, lessons)) = removed {
                state.broadcast(ServerEvent::SlotDeleted { slot_id });
                state.broadcast(ServerEvent::DataChanged { slots, lessons });
            }
        }

        ClientEvent::BookSlot {
            slot_id,
            student_id,
        } => {
            let booked = state.store.mutate(|data| {
                let slot = data
                    .slots
                    .iter_mut()
                    .find(|s| s.id == slot_id && !s.booked)?;
                slot.booked = true;
                slot.booked_by = Some(student_id.clone());
                let lesson = Lesson::from_slot(slot, student_id.clone());
                let slot = slot.clone();
                data.lessons.push(lesson.clone());
                Some((slot, lesson))
            });
            if let Some((slot, lesson)) = booked {
                state.broadcast(ServerEvent::SlotUpserted { slot });
                state.broadcast(ServerEvent::LessonAdded { lesson });
            }
        }

        ClientEvent::CancelBooking { lesson_id } => {
            let cancelled = state.store.mutate(|data| {
                let position = data.lessons.iter().position(|l| l.id == lesson_id)?;
                // Only a scheduled lesson can be cancelled; completion is
                // terminal and a completed lesson keeps its slot.
                if !data.lessons[position]
                    .status
                    .can_transition_to(LessonStatus::Cancelled)
                {
                    return None;
                }
                let lesson = data.lessons.remove(position);
                let slot = data
                    .slots
                    .iter_mut()
                    .find(|s| s.id == lesson.slot_id)
                    .map(|slot| {
                        slot.booked = false;
                        slot.booked_by = None;
                        slot.clone()
                    });
                Some((lesson.id, slot))
            });
            if let Some((lesson_id, slot)) = cancelled {
                if let Some(slot) = slot {
                    state.broadcast(ServerEvent::SlotUpserted { slot });
                }
                state.broadcast(ServerEvent::LessonRemoved { lesson_id });
            }
        }

        ClientEvent::CompleteLesson { lesson_id } => {
            let completed = state.store.mutate(|data| {
                let lesson = data.lessons.iter_mut().find(|l| l.id == lesson_id)?;
                if !lesson.status.can_transition_to(LessonStatus::Completed) {
                    return None;
                }
                lesson.status = LessonStatus::Completed;
                Some(lesson.clone())
            });
            if let Some(lesson) = completed {
                state.broadcast(ServerEvent::LessonUpdated { lesson });
            }
        }

        ClientEvent::UpdateTeacherProfile { profile } => {
            if profile.id.is_empty() {
                return;
            }
            state.store.mutate(|data| {
                data.teachers.insert(profile.id.clone(), profile.clone());
            });
            let user = UserRecord::teacher(&profile);
            state.broadcast(ServerEvent::TeacherUpdated { profile });
            state.broadcast(ServerEvent::UserRegistered { user });
        }

        ClientEvent::UpdateStudentProfile { profile } => {
            if profile.id.is_empty() {
                return;
            }
            state.store.mutate(|data| {
                match data.students.iter_mut().find(|s| s.id == profile.id) {
                    Some(existing) => *existing = profile.clone(),
                    None => data.students.push(profile.clone()),
                }
            });
            let user = UserRecord::student(&profile);
            state.broadcast(ServerEvent::StudentUpdated { profile });
            state.broadcast(ServerEvent::UserRegistered { user });
        }

        ClientEvent::SendMessage {
            sender_id,
            sender_name,
            receiver_id,
            content,
        } => {
            if sender_id.is_empty() {
                return;
            }
            send_message(sender_id, sender_name, receiver_id, content, state);
        }

        ClientEvent::MarkConversationRead {
            conversation_id,
            user_id,
        } => {
            mutate_conversation(state, &conversation_id, |conversation| {
                for message in conversation
                    .messages
                    .iter_mut()
                    .filter(|m| m.receiver_id.as_deref() == Some(user_id.as_str()))
                {
                    message.read = true;
                }
            });
        }

        ClientEvent::ClearConversation { conversation_id } => {
            mutate_conversation(state, &conversation_id, |conversation| {
                conversation.messages.clear();
            });
        }

        ClientEvent::ArchiveConversation { conversation_id } => {
            mutate_conversation(state, &conversation_id, |conversation| {
                conversation.archived = true;
            });
        }

        ClientEvent::UnarchiveConversation { conversation_id } => {
            mutate_conversation(state, &conversation_id, |conversation| {
                conversation.archived = false;
            });
        }

        ClientEvent::DeleteConversation { conversation_id } => {
            let removed = state.store.mutate(|data| {
                let before = data.conversations.len();
                data.conversations.retain(|c| c.id != conversation_id);
                before != data.conversations.len()
            });
            if removed {
                state.broadcast(ServerEvent::ConversationChanged { conversation_id });
            }
        }

        ClientEvent::SubmitDemand { request } => {
            submit_demand(request, state);
        }

        ClientEvent::AcceptDemand {
            request_id,
            teacher_id,
        } => {
            let accepted = state.store.mutate(|data| {
                let request = data.demands.iter_mut().find(|d| d.id == request_id)?;
                // First accept wins; later attempts are silently ignored.
                if request.status != DemandStatus::Pending {
                    return None;
                }
                request.status = DemandStatus::Accepted;
                request.accepted_by = Some(teacher_id);
                Some(request.clone())
            });
            if let Some(request) = accepted {
                state.broadcast(ServerEvent::DemandAccepted { request });
            }
        }

        ClientEvent::JoinRoom { room, name, role } => {
            state.rooms.join(&room, handle.clone(), &name, &role);
        }

        ClientEvent::LeaveRoom { room, name: _ } => {
            state.rooms.leave(&room, conn_id);
        }

        ClientEvent::Offer { room, sdp } => {
            state
                .rooms
                .forward(&room, conn_id, ServerEvent::Offer { room: room.clone(), sdp });
        }

        ClientEvent::Answer { room, sdp } => {
            state
                .rooms
                .forward(&room, conn_id, ServerEvent::Answer { room: room.clone(), sdp });
        }

        ClientEvent::IceCandidate { room, candidate } => {
            state.rooms.forward(
                &room,
                conn_id,
                ServerEvent::IceCandidate {
                    room: room.clone(),
                    candidate,
                },
            );
        }
    }
}

/// Bind a teacher connection, flush its pending queue, then re-evaluate
/// every still-pending demand request against this one teacher.
///
/// The re-evaluation closes the gap for requests created while the
/// teacher was offline and never queued (e.g. the profile changed in the
/// meantime); requests already flushed from the queue are skipped so no
/// demand arrives twice in one subscribe.
fn subscribe_teacher(teacher_id: &str, handle: &ConnectionHandle, state: &AppState) {
    let flushed = state.registry.bind(teacher_id, handle.clone());

    let mut delivered: HashSet<String> = HashSet::new();
    for event in flushed {
        if let ServerEvent::DemandCreated { request } = &event {
            delivered.insert(request.id.clone());
        }
        handle.send(event);
    }

    let rematched: Vec<DemandRequest> = state.store.read(|data| {
        let Some(teacher) = data.teachers.get(teacher_id) else {
            return Vec::new();
        };
        data.demands
            .iter()
            .filter(|request| {
                request.status == DemandStatus::Pending
                    && !delivered.contains(&request.id)
                    && teacher_matches(request, teacher, &data.lessons)
            })
            .cloned()
            .collect()
    });

    debug!(
        teacher = %teacher_id,
        flushed = delivered.len(),
        rematched = rematched.len(),
        "Teacher subscribed"
    );

    for request in rematched {
        handle.send(ServerEvent::DemandCreated { request });
    }
}

fn send_message(
    sender_id: String,
    sender_name: String,
    receiver_id: Option<String>,
    content: String,
    state: &AppState,
) {
    let other = receiver_id.clone().unwrap_or_else(|| sender_id.clone());
    let conversation_id = conversation_id(&sender_id, &other);

    let message = ChatMessage {
        sender_id: sender_id.clone(),
        sender_name: sender_name.clone(),
        receiver_id: receiver_id.clone(),
        content: content.clone(),
        sent_at: Some(Utc::now()),
        read: false,
    };

    // A notification exists only for a receiver distinct from the sender.
    let notification = receiver_id
        .filter(|receiver| *receiver != sender_id)
        .map(|receiver| Notification {
            id: generate_id("notification"),
            user_id: receiver,
            kind: "message".into(),
            title: format!("New message from {}", sender_name),
            body: content,
            payload: serde_json::json!({
                "conversationId": conversation_id,
                "senderId": sender_id,
            }),
            read: false,
            created_at: Some(Utc::now()),
        });

    state.store.mutate(|data| {
        match data
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            Some(conversation) => conversation.messages.push(message.clone()),
            None => data.conversations.push(Conversation {
                id: conversation_id.clone(),
                participants: vec![sender_id.clone(), other.clone()],
                messages: vec![message.clone()],
                archived: false,
            }),
        }
        if let Some(notification) = &notification {
            data.notifications.push(notification.clone());
        }
    });

    state.broadcast(ServerEvent::MessageReceived {
        conversation_id,
        message,
    });

    if let Some(notification) = notification {
        let user_id = notification.user_id.clone();
        state
            .registry
            .notify(&user_id, &ServerEvent::NotificationCreated { notification });
    }
}

fn submit_demand(request: DemandRequest, state: &AppState) {
    if request.student_id.is_empty() {
        return;
    }

    let (request, matched) = state.store.mutate(|data| {
        let mut request = request;
        if request.id.is_empty() {
            request.id = generate_id("demand");
        }
        request.status = DemandStatus::Pending;
        request.accepted_by = None;
        request.created_at = Some(Utc::now());

        let matched = matching_teachers(&request, &data.teachers, &data.lessons);
        data.demands.push(request.clone());
        (request, matched)
    });

    metrics::record_demand_matches(matched.len());
    debug!(request = %request.id, matched = matched.len(), "Demand request routed");

    // Targeted delivery only; uninvolved clients never see the request.
    for teacher_id in matched {
        let event = ServerEvent::DemandCreated {
            request: request.clone(),
        };
        match state.registry.lookup(&teacher_id) {
            Some(teacher) => {
                teacher.send(event);
            }
            None => state.registry.enqueue_pending(&teacher_id, event),
        }
    }
}

/// Apply a closure to one conversation and broadcast the change. Unknown
/// ids are a no-op.
fn mutate_conversation(state: &AppState, conversation_id: &str, f: impl FnOnce(&mut Conversation)) {
    let found = state.store.mutate(|data| {
        data.conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .map(f)
            .is_some()
    });
    if found {
        state.broadcast(ServerEvent::ConversationChanged {
            conversation_id: conversation_id.to_string(),
        });
    }
}

/// Stable label for the inbound-event metric.
fn event_kind(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::SubscribeTeacher { .. } => "subscribe_teacher",
        ClientEvent::WatchNotifications { .. } => "watch_notifications",
        ClientEvent::CreateSlot { .. } => "create_slot",
        ClientEvent::UpdateSlot { .. } => "update_slot",
        ClientEvent::DeleteSlot { .. } => "delete_slot",
        ClientEvent::BookSlot { .. } => "book_slot",
        ClientEvent::CancelBooking { .. } => "cancel_booking",
        ClientEvent::CompleteLesson { .. } => "complete_lesson",
        ClientEvent::UpdateTeacherProfile { .. } => "update_teacher_profile",
        ClientEvent::UpdateStudentProfile { .. } => "update_student_profile",
        ClientEvent::SendMessage { .. } => "send_message",
        ClientEvent::MarkConversationRead { .. } => "mark_conversation_read",
        ClientEvent::ClearConversation { .. } => "clear_conversation",
        ClientEvent::ArchiveConversation { .. } => "archive_conversation",
        ClientEvent::UnarchiveConversation { .. } => "unarchive_conversation",
        ClientEvent::DeleteConversation { .. } => "delete_conversation",
        ClientEvent::SubmitDemand { .. } => "submit_demand",
        ClientEvent::AcceptDemand { .. } => "accept_demand",
        ClientEvent::JoinRoom { .. } => "join_room",
        ClientEvent::LeaveRoom { .. } => "leave_room",
        ClientEvent::Offer { .. } => "offer",
        ClientEvent::Answer { .. } => "answer",
        ClientEvent::IceCandidate { .. } => "ice_candidate",
    }
}
