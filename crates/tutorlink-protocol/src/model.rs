//! Marketplace entities.
//!
//! These types are shared between the wire protocol and the persisted
//! snapshot: a `Slot` broadcast to a client is serialized exactly like a
//! `Slot` written to disk. Every field defaults so that an older snapshot
//! file still deserializes after a model extension.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomic counter for ensuring unique ids even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique entity id with the given prefix, e.g. `demand_17293...`.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}", prefix, timestamp.wrapping_add(counter))
}

/// Conversation id for a pair of participants.
///
/// The pair is sorted before joining, so the id is identical regardless of
/// which participant initiates.
#[must_use]
pub fn conversation_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}-{}", a, b)
    } else {
        format!("{}-{}", b, a)
    }
}

/// Lesson delivery format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonFormat {
    Remote,
    InPerson,
    Group,
}

/// Party role in the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Teacher,
    Student,
}

/// Lesson lifecycle.
///
/// The only legal transitions are scheduled -> completed and
/// scheduled -> cancelled; both are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    #[default]
    Scheduled,
    Completed,
    Cancelled,
}

impl LessonStatus {
    /// Whether a transition from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: LessonStatus) -> bool {
        matches!(
            (self, next),
            (LessonStatus::Scheduled, LessonStatus::Completed)
                | (LessonStatus::Scheduled, LessonStatus::Cancelled)
        )
    }
}

/// Demand request lifecycle: pending -> accepted, once, first accept wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandStatus {
    #[default]
    Pending,
    Accepted,
}

/// A teacher's profile, keyed by teacher id in the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeacherProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    /// Subjects the teacher offers.
    pub subjects: Vec<String>,
    /// Formats the teacher can deliver.
    pub formats: Vec<LessonFormat>,
    /// Session durations offered, in minutes.
    pub durations: Vec<u32>,
    pub city: Option<String>,
    /// Whether broadcast demand requests should be routed to this teacher.
    pub accepts_demand: bool,
    pub experience_level: Option<String>,
    /// Grade levels taught.
    pub grades: Vec<String>,
    /// Learning goals the teacher caters to.
    pub goals: Vec<String>,
    pub bio: String,
    pub rating: f32,
}

/// A student's profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub grade: Option<String>,
    /// Subjects the student is interested in.
    pub subjects: Vec<String>,
}

/// An offered time window.
///
/// Invariant: `booked == true` exactly when `booked_by` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Slot {
    pub id: String,
    pub teacher_id: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub duration_minutes: u32,
    pub subject: String,
    pub format: Option<LessonFormat>,
    /// Free-form lesson kind (trial, regular, exam prep, ...).
    pub kind: Option<String>,
    pub price: f64,
    pub booked: bool,
    pub booked_by: Option<String>,
}

/// A confirmed booking derived from a slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lesson {
    pub id: String,
    pub slot_id: String,
    pub teacher_id: String,
    pub student_id: String,
    pub subject: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub duration_minutes: u32,
    pub format: Option<LessonFormat>,
    pub price: f64,
    pub status: LessonStatus,
}

impl Lesson {
    /// Build the lesson recorded when a slot is booked.
    #[must_use]
    pub fn from_slot(slot: &Slot, student_id: impl Into<String>) -> Self {
        Self {
            id: generate_id("lesson"),
            slot_id: slot.id.clone(),
            teacher_id: slot.teacher_id.clone(),
            student_id: student_id.into(),
            subject: slot.subject.clone(),
            date: slot.date,
            start_time: slot.start_time,
            duration_minutes: slot.duration_minutes,
            format: slot.format,
            price: slot.price,
            status: LessonStatus::Scheduled,
        }
    }
}

/// An ask for a lesson not tied to an existing slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemandRequest {
    pub id: String,
    pub student_id: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub duration_minutes: Option<u32>,
    pub subject: Option<String>,
    pub format: Option<LessonFormat>,
    pub grade: Option<String>,
    pub city: Option<String>,
    pub experience_level: Option<String>,
    pub goals: Vec<String>,
    pub status: DemandStatus,
    /// Set exactly once, by the first accepting teacher.
    pub accepted_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A single message within a conversation. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: Option<String>,
    pub content: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub read: bool,
}

/// A message thread between exactly two participants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conversation {
    /// Sorted, hyphen-joined participant pair; see [`conversation_id`].
    pub id: String,
    pub participants: Vec<String>,
    pub messages: Vec<ChatMessage>,
    pub archived: bool,
}

/// A notification addressed to one user. Append-only except the read flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub read: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// A materialized user-directory entry sent to clients on connect.
///
/// Online status is intentionally never tracked; the flag is always false
/// and exists only so client directories have a uniform shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub role: UserRole,
    pub online: bool,
}

impl UserRecord {
    #[must_use]
    pub fn teacher(profile: &TeacherProfile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            role: UserRole::Teacher,
            online: false,
        }
    }

    #[must_use]
    pub fn student(profile: &StudentProfile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            role: UserRole::Student,
            online: false,
        }
    }
}

/// The entire logical dataset: one snapshot document on disk.
///
/// Teacher profiles are an id-keyed map, everything else is an array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub teachers: HashMap<String, TeacherProfile>,
    pub students: Vec<StudentProfile>,
    pub slots: Vec<Slot>,
    pub lessons: Vec<Lesson>,
    pub demands: Vec<DemandRequest>,
    pub conversations: Vec<Conversation>,
    pub notifications: Vec<Notification>,
}

impl Dataset {
    /// Materialize the user directory from both profile collections.
    #[must_use]
    pub fn users(&self) -> Vec<UserRecord> {
        let mut users: Vec<UserRecord> = self.teachers.values().map(UserRecord::teacher).collect();
        users.extend(self.students.iter().map(UserRecord::student));
        users
    }
}
