//! # tutorlink-core
//!
//! Core state and routing for the Tutorlink realtime server.
//!
//! This crate provides the shared mutable resources behind the event
//! protocol:
//!
//! - **SnapshotStore** - The entire logical dataset, mirrored to one on-disk
//!   JSON document after every mutation
//! - **ConnectionRegistry** - Teacher-id to live-connection bindings, with a
//!   pending-delivery queue for offline teachers and targeted notification
//!   fan-out
//! - **Matching** - The demand-request filtering predicates with conflict
//!   detection
//! - **RoomMap** - Call-signaling rooms relaying offer/answer/ICE between
//!   the members of one call
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │ Connection │────▶│ SnapshotStore    │────▶│ snapshot.json │
//! └────────────┘     └──────────────────┘     └───────────────┘
//!        │           ┌──────────────────┐
//!        ├──────────▶│ ConnectionRegistry│──▶ matching teachers
//!        │           └──────────────────┘
//!        │           ┌──────────────────┐
//!        └──────────▶│ RoomMap          │──▶ call peers
//!                    └──────────────────┘
//! ```

pub mod matching;
pub mod registry;
pub mod rooms;
pub mod store;

pub use matching::{matching_teachers, teacher_matches};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use rooms::RoomMap;
pub use store::{SnapshotStore, StoreError};
