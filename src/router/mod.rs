//! Interprets inbound envelopes, applies them to the store, and pushes the
//! resulting snapshots to teachers.
//!
//! Socket messages and REST calls both land here, so every mutation
//! broadcasts the same way regardless of where it came from.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::broadcast::{BroadcastEngine, DeliveryReport};
use crate::connection_manager::{ConnectionHandle, ConnectionRegistry, Role};
use crate::metrics::{MessageMetrics, StoreMetrics};
use crate::store::{QuestionEntry, ResourceStore};
use crate::websocket::{
    Envelope, LineRequest, MessageType, NewFeedback, NewQuestion, Resource, ServerMessage,
};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("'{0}' requires a resource")]
    MissingResource(&'static str),

    #[error("invalid {resource} data: {source}")]
    InvalidData {
        resource: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("question id is required")]
    MissingId,

    #[error("student must not be empty")]
    EmptyStudent,

    #[error("'{action}' is not allowed for {role} connections")]
    Forbidden { action: &'static str, role: Role },
}

impl RouteError {
    /// Code carried in the `error` envelope sent back to the client
    pub fn code(&self) -> &'static str {
        match self {
            RouteError::Malformed(_) => "INVALID_MESSAGE",
            RouteError::MissingResource(_) | RouteError::MissingId => "MISSING_FIELD",
            RouteError::InvalidData { .. } | RouteError::EmptyStudent => "INVALID_DATA",
            RouteError::Forbidden { .. } => "FORBIDDEN",
        }
    }
}

/// What a routed message did
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    FeedbackRecorded,
    FeedbackCleared,
    QuestionAdded(QuestionEntry),
    QuestionDeleted { id: String, removed: bool },
    LineJoined,
    LineAdvanced(Option<String>),
    Initialized,
    /// Recognized envelope with no server-side action
    Ignored(MessageType),
}

pub struct MessageRouter {
    store: Arc<ResourceStore>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<BroadcastEngine>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<ResourceStore>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<BroadcastEngine>,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
        }
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    /// Entry point for a raw text frame.
    ///
    /// Bad input is answered with an `error` envelope to `origin` only;
    /// the connection is left open.
    pub async fn handle_text(&self, origin: &ConnectionHandle, text: &str) {
        let result = match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => self.route(origin, envelope).await,
            Err(e) => {
                MessageMetrics::record_malformed();
                Err(RouteError::from(e))
            }
        };

        if let Err(e) = result {
            tracing::warn!(connection_id = %origin.id, error = %e, "Rejected client message");
            let reply = ServerMessage::error(e.code(), e.to_string());
            if self.broadcaster.send_to(origin, reply).await.is_err() {
                self.registry.unregister(origin.id);
            }
        }
    }

    #[tracing::instrument(
        name = "router.route",
        skip(self, origin, envelope),
        fields(
            connection_id = %origin.id,
            role = %origin.role,
            message_type = envelope.kind.as_str(),
            resource = ?envelope.resource
        )
    )]
    pub async fn route(
        &self,
        origin: &ConnectionHandle,
        envelope: Envelope,
    ) -> Result<RouteOutcome, RouteError> {
        MessageMetrics::record_received(envelope.kind.as_str());

        match envelope.kind {
            MessageType::Init => {
                require_teacher(origin, "init")?;
                self.init_connection(origin).await;
                Ok(RouteOutcome::Initialized)
            }
            MessageType::New => match envelope.resource {
                Some(Resource::Feedback) => {
                    let data: NewFeedback = parse_data("feedback", envelope.data)?;
                    self.submit_feedback(data.student, data.feedback).await?;
                    Ok(RouteOutcome::FeedbackRecorded)
                }
                Some(Resource::Question) => {
                    let data: NewQuestion = parse_data("question", envelope.data)?;
                    let entry = self.ask_question(data.student, data.question).await?;
                    Ok(RouteOutcome::QuestionAdded(entry))
                }
                Some(Resource::Line) => {
                    let data: LineRequest = parse_data("line", envelope.data)?;
                    self.join_line(data.student).await?;
                    Ok(RouteOutcome::LineJoined)
                }
                None => Err(RouteError::MissingResource("new")),
            },
            MessageType::Delete => match envelope.resource {
                Some(Resource::Feedback) => {
                    require_teacher(origin, "clear feedback")?;
                    self.clear_feedback().await;
                    Ok(RouteOutcome::FeedbackCleared)
                }
                Some(Resource::Question) => {
                    let id = envelope.id.ok_or(RouteError::MissingId)?;
                    let removed = self.delete_question(&id).await;
                    Ok(RouteOutcome::QuestionDeleted { id, removed })
                }
                Some(Resource::Line) => {
                    require_teacher(origin, "help next")?;
                    Ok(RouteOutcome::LineAdvanced(self.help_next().await))
                }
                None => Err(RouteError::MissingResource("delete")),
            },
            other => {
                MessageMetrics::record_unhandled();
                tracing::info!(message_type = other.as_str(), "Unhandled message type");
                Ok(RouteOutcome::Ignored(other))
            }
        }
    }

    pub async fn submit_feedback(
        &self,
        student: String,
        feedback: String,
    ) -> Result<(), RouteError> {
        let student = require_student(student)?;
        tracing::info!(student = %student, "Feedback submitted");

        self.store.add_feedback(student, feedback).await;
        self.broadcast_update().await;
        Ok(())
    }

    pub async fn ask_question(
        &self,
        student: String,
        question: String,
    ) -> Result<QuestionEntry, RouteError> {
        let student = require_student(student)?;

        let entry = self.store.add_question(student, question).await;
        tracing::info!(student = %entry.student, question_id = %entry.id, "Question asked");
        self.broadcast_update().await;
        Ok(entry)
    }

    /// Remove a question. Absent ids are not an error.
    pub async fn delete_question(&self, id: &str) -> bool {
        let removed = self.store.delete_question(id).await;
        if !removed {
            tracing::debug!(question_id = %id, "Delete for unknown question");
        }

        self.broadcast_update().await;
        removed
    }

    pub async fn clear_feedback(&self) {
        self.store.clear_feedback().await;
        tracing::info!("Feedback cleared");
        self.broadcast_update().await;
    }

    pub async fn join_line(&self, student: String) -> Result<(), RouteError> {
        let student = require_student(student)?;
        tracing::info!(student = %student, "Student joined help line");

        self.store.enqueue_line(student).await;
        self.broadcast_line().await;
        Ok(())
    }

    /// Pop the next student waiting for help
    pub async fn help_next(&self) -> Option<String> {
        let next = self.store.dequeue_line().await;
        match &next {
            Some(student) => {
                tracing::info!(student = %student, "Helping next student");
                self.broadcast_line().await;
            }
            None => tracing::debug!("Help line is empty"),
        }
        next
    }

    /// Send the current state to one connection only
    pub async fn init_connection(&self, handle: &ConnectionHandle) {
        let update = ServerMessage::Update(self.store.snapshot().await);
        let line = ServerMessage::Line(self.store.line_snapshot().await);

        for message in [update, line] {
            if let Err(e) = self.broadcaster.send_to(handle, message).await {
                tracing::debug!(connection_id = %handle.id, error = %e, "Init send failed");
                self.registry.unregister(handle.id);
                return;
            }
        }
    }

    async fn broadcast_update(&self) {
        let snapshot = self.store.snapshot().await;
        tracing::debug!(revision = snapshot.revision, "Broadcasting update");

        let report = self
            .broadcaster
            .broadcast_to_role(Role::Teacher, &ServerMessage::Update(snapshot))
            .await;
        self.prune(report);
        StoreMetrics::set_counts(&self.store.counts().await);
    }

    async fn broadcast_line(&self) {
        let snapshot = self.store.line_snapshot().await;
        tracing::debug!(revision = snapshot.revision, "Broadcasting line");

        let report = self
            .broadcaster
            .broadcast_to_role(Role::Teacher, &ServerMessage::Line(snapshot))
            .await;
        self.prune(report);
        StoreMetrics::set_counts(&self.store.counts().await);
    }

    fn prune(&self, report: DeliveryReport) {
        for id in report.failed {
            self.registry.unregister(id);
        }
    }
}

fn parse_data<T: DeserializeOwned>(
    resource: &'static str,
    data: serde_json::Value,
) -> Result<T, RouteError> {
    serde_json::from_value(data).map_err(|source| RouteError::InvalidData { resource, source })
}

/// Students may retract questions; only teachers read or reset the room.
fn require_teacher(origin: &ConnectionHandle, action: &'static str) -> Result<(), RouteError> {
    if origin.role != Role::Teacher {
        return Err(RouteError::Forbidden {
            action,
            role: origin.role,
        });
    }
    Ok(())
}

fn require_student(student: String) -> Result<String, RouteError> {
    let trimmed = student.trim();
    if trimmed.is_empty() {
        return Err(RouteError::EmptyStudent);
    }
    Ok(trimmed.to_string())
}
