//! WebSocket transport and the JSON envelope shared by every transport.

mod handler;
mod message;

pub use handler::{student_ws_handler, teacher_ws_handler, StudentQuery, TokenQuery};
pub use message::{
    Envelope, LineRequest, MessageType, NewFeedback, NewQuestion, OutboundMessage, Resource,
    ServerMessage, SnapshotFilter, SnapshotKey, SnapshotKind,
};
