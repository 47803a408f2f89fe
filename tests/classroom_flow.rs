//! End-to-end classroom scenarios driven through the library API.
//!
//! Connections are plain channels here; the transports only forward what
//! arrives on them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use classroom_live::broadcast::BroadcastEngine;
use classroom_live::connection_manager::{ConnectionHandle, ConnectionRegistry, Role};
use classroom_live::router::MessageRouter;
use classroom_live::store::ResourceStore;
use classroom_live::websocket::{OutboundMessage, SnapshotFilter};

struct Classroom {
    store: Arc<ResourceStore>,
    registry: Arc<ConnectionRegistry>,
    router: MessageRouter,
}

impl Classroom {
    fn new() -> Self {
        let store = Arc::new(ResourceStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(BroadcastEngine::new(
            registry.clone(),
            Duration::from_millis(200),
        ));
        let router = MessageRouter::new(store.clone(), registry.clone(), broadcaster);
        Self {
            store,
            registry,
            router,
        }
    }

    fn connect(&self, role: Role) -> Client {
        self.connect_with_buffer(role, 64)
    }

    fn connect_with_buffer(&self, role: Role, buffer: usize) -> Client {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = self.registry.register(ConnectionHandle::new(role, tx));
        Client {
            handle,
            rx,
            filter: SnapshotFilter::new(),
        }
    }
}

/// A connection as its writer task sees it
struct Client {
    handle: Arc<ConnectionHandle>,
    rx: mpsc::Receiver<OutboundMessage>,
    filter: SnapshotFilter,
}

impl Client {
    async fn send(&self, router: &MessageRouter, message: Value) {
        router.handle_text(&self.handle, &message.to_string()).await;
    }

    /// Everything the writer would put on the wire, in order
    fn drain(&mut self) -> Vec<Value> {
        let mut written = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            if self.filter.admit(&message) {
                written.push(serde_json::from_str(&message.to_json().unwrap()).unwrap());
            }
        }
        written
    }

    fn last_of(&mut self, kind: &str) -> Value {
        self.drain()
            .into_iter()
            .filter(|m| m["type"] == kind)
            .last()
            .unwrap_or(Value::Null)
    }
}

#[tokio::test]
async fn feedback_is_upserted_per_student() {
    let classroom = Classroom::new();
    let mut teacher = classroom.connect(Role::Teacher);
    let student = classroom.connect(Role::Student);

    for feedback in ["good pace", "too fast"] {
        student
            .send(
                &classroom.router,
                json!({"type":"new","resource":"feedback","id":null,"data":{"student":"A","feedback":feedback}}),
            )
            .await;
    }

    let update = teacher.last_of("update");
    assert_eq!(update["resource"], Value::Null);
    assert_eq!(update["id"], Value::Null);
    assert_eq!(update["data"][0], json!([{"student":"A","feedback":"too fast"}]));
    assert_eq!(update["data"][1], json!([]));
}

#[tokio::test]
async fn question_lifecycle() {
    let classroom = Classroom::new();
    let mut teacher = classroom.connect(Role::Teacher);
    let student = classroom.connect(Role::Student);

    student
        .send(
            &classroom.router,
            json!({"type":"new","resource":"question","id":null,"data":{"student":"B","question":"what is X?"}}),
        )
        .await;

    let update = teacher.last_of("update");
    let question = &update["data"][1][0];
    assert_eq!(question["student"], "B");
    assert_eq!(question["question"], "what is X?");
    assert!(question["timestamp"].is_string());
    let id = question["id"].as_str().unwrap().to_string();

    teacher
        .send(
            &classroom.router,
            json!({"type":"delete","resource":"question","id":id,"data":null}),
        )
        .await;

    let update = teacher.last_of("update");
    assert_eq!(update["data"][1], json!([]));
}

#[tokio::test]
async fn help_line_is_served_in_order() {
    let classroom = Classroom::new();
    let mut teacher = classroom.connect(Role::Teacher);
    let student = classroom.connect(Role::Student);

    for name in ["A", "B", "C"] {
        student
            .send(
                &classroom.router,
                json!({"type":"new","resource":"line","data":{"student":name}}),
            )
            .await;
    }
    assert_eq!(teacher.last_of("line")["data"], json!(["A", "B", "C"]));

    teacher
        .send(&classroom.router, json!({"type":"delete","resource":"line"}))
        .await;

    assert_eq!(teacher.last_of("line")["data"], json!(["B", "C"]));
    assert_eq!(classroom.store.line_snapshot().await.line, vec!["B", "C"]);
}

#[tokio::test]
async fn every_teacher_gets_the_same_payload_and_dead_ones_are_removed() {
    let classroom = Classroom::new();
    let mut first = classroom.connect(Role::Teacher);
    let mut second = classroom.connect(Role::Teacher);
    let dead = classroom.connect(Role::Teacher);
    let dead_id = dead.handle.id;
    drop(dead);

    classroom
        .router
        .submit_feedback("A".into(), "good pace".into())
        .await
        .unwrap();

    assert_eq!(first.drain(), second.drain());
    assert!(!classroom.registry.contains(dead_id));
    assert_eq!(classroom.registry.list(Role::Teacher).len(), 2);
}

#[tokio::test]
async fn late_teacher_is_initialized_with_current_state() {
    let classroom = Classroom::new();
    classroom
        .router
        .ask_question("B".into(), "why?".into())
        .await
        .unwrap();
    classroom.router.join_line("C".into()).await.unwrap();

    let mut teacher = classroom.connect(Role::Teacher);
    teacher
        .send(&classroom.router, json!({"type":"init"}))
        .await;

    let written = teacher.drain();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0]["data"][1][0]["question"], "why?");
    assert_eq!(written[1]["data"], json!(["C"]));
}

/// Feedback count carried by a raw `update`, which equals its revision when
/// every writer is a distinct student
fn update_size(message: &OutboundMessage) -> Option<usize> {
    let value: Value = serde_json::from_str(&message.to_json().ok()?).ok()?;
    if value["type"] != "update" {
        return None;
    }
    value["data"][0].as_array().map(Vec::len)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_students_never_produce_stale_snapshots() {
    const STUDENTS: usize = 300;
    const MAX_ROUNDS: usize = 20;

    let mut saw_reordering = false;
    for _ in 0..MAX_ROUNDS {
        let classroom = Arc::new(Classroom::new());
        let mut teacher = classroom.connect_with_buffer(Role::Teacher, STUDENTS * 2);

        let mut tasks = Vec::new();
        for i in 0..STUDENTS {
            let classroom = classroom.clone();
            tasks.push(tokio::spawn(async move {
                classroom
                    .router
                    .submit_feedback(format!("student-{}", i), "ok".into())
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut raw = Vec::new();
        let mut written = Vec::new();
        while let Ok(message) = teacher.rx.try_recv() {
            let Some(size) = update_size(&message) else {
                continue;
            };
            raw.push(size);
            if teacher.filter.admit(&message) {
                written.push(size);
            }
        }

        assert_eq!(raw.len(), STUDENTS);
        assert!(written.windows(2).all(|w| w[0] < w[1]), "stale update written: {:?}", written);
        assert_eq!(written.last().copied(), Some(STUDENTS));
        assert!(classroom.registry.contains(teacher.handle.id));

        if raw.windows(2).any(|w| w[0] > w[1]) {
            saw_reordering = true;
            break;
        }
    }

    // At least one round must have given the filter something to drop
    assert!(saw_reordering, "no reordered broadcasts in {} rounds", MAX_ROUNDS);
}

#[tokio::test]
async fn student_socket_cannot_read_or_reset_the_room() {
    let classroom = Classroom::new();
    let mut teacher = classroom.connect(Role::Teacher);
    let mut student = classroom.connect(Role::Student);
    classroom
        .router
        .submit_feedback("alice".into(), "I'm lost".into())
        .await
        .unwrap();
    classroom.router.join_line("bob".into()).await.unwrap();
    teacher.drain();

    for message in [
        json!({"type":"init"}),
        json!({"type":"delete","resource":"feedback"}),
        json!({"type":"delete","resource":"line"}),
    ] {
        student.send(&classroom.router, message).await;
    }

    let replies = student.drain();
    assert_eq!(replies.len(), 3);
    assert!(replies
        .iter()
        .all(|r| r["type"] == "error" && r["data"]["code"] == "FORBIDDEN"));
    assert!(teacher.drain().is_empty());

    let snapshot = classroom.store.full_snapshot().await;
    assert_eq!(snapshot.feedback.len(), 1);
    assert_eq!(snapshot.line, vec!["bob"]);
    assert!(classroom.registry.contains(student.handle.id));
}

#[tokio::test]
async fn malformed_input_is_reported_only_to_sender() {
    let classroom = Classroom::new();
    let mut teacher = classroom.connect(Role::Teacher);
    let mut student = classroom.connect(Role::Student);

    student
        .send(
            &classroom.router,
            json!({"type":"new","resource":"feedback","data":{"student":"A"}}),
        )
        .await;

    let reply = student.last_of("error");
    assert_eq!(reply["data"]["code"], "INVALID_DATA");
    assert!(teacher.drain().is_empty());
    assert!(classroom.store.snapshot().await.feedback.is_empty());
    assert!(classroom.registry.contains(student.handle.id));
}
