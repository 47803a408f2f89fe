use std::collections::VecDeque;

use chrono::Utc;
use tokio::sync::RwLock;

use super::types::{
    ClassroomSnapshot, FeedbackEntry, LineSnapshot, QuestionEntry, StoreCounts, StoreSnapshot,
};

#[derive(Debug, Default)]
struct StoreState {
    feedback: Vec<FeedbackEntry>,
    questions: Vec<QuestionEntry>,
    line: VecDeque<String>,
    /// Last issued question id
    last_question_id: u64,
    /// Bumped on every mutation
    revision: u64,
}

impl StoreState {
    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// In-memory classroom state behind a single lock.
///
/// Every operation takes the lock once, so each mutation is atomic and every
/// snapshot reflects a state between two complete mutations.
#[derive(Debug, Default)]
pub struct ResourceStore {
    state: RwLock<StoreState>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the feedback of `student`.
    ///
    /// An existing entry keeps its position; a new student is appended.
    pub async fn add_feedback(&self, student: impl Into<String>, feedback: impl Into<String>) {
        let entry = FeedbackEntry {
            student: student.into(),
            feedback: feedback.into(),
        };

        let mut state = self.state.write().await;
        match state.feedback.iter().position(|f| f.student == entry.student) {
            Some(index) => state.feedback[index] = entry,
            None => state.feedback.push(entry),
        }
        let revision = state.bump();

        tracing::debug!(revision, entries = state.feedback.len(), "Feedback recorded");
    }

    /// Append a question with a fresh id and creation timestamp.
    pub async fn add_question(
        &self,
        student: impl Into<String>,
        question: impl Into<String>,
    ) -> QuestionEntry {
        let mut state = self.state.write().await;
        state.last_question_id += 1;

        let entry = QuestionEntry {
            id: state.last_question_id.to_string(),
            student: student.into(),
            question: question.into(),
            timestamp: Some(Utc::now().to_rfc3339()),
        };
        state.questions.push(entry.clone());
        let revision = state.bump();

        tracing::debug!(question_id = %entry.id, revision, "Question added");
        entry
    }

    /// Remove the question with `id`. Returns whether anything was removed.
    pub async fn delete_question(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(index) = state.questions.iter().position(|q| q.id == id) else {
            return false;
        };

        state.questions.remove(index);
        let revision = state.bump();

        tracing::debug!(question_id = %id, revision, "Question deleted");
        true
    }

    pub async fn clear_feedback(&self) {
        let mut state = self.state.write().await;
        state.feedback.clear();
        state.bump();
    }

    pub async fn enqueue_line(&self, student: impl Into<String>) {
        let mut state = self.state.write().await;
        state.line.push_back(student.into());
        state.bump();
    }

    /// Pop the head of the help line, `None` when nobody is waiting.
    pub async fn dequeue_line(&self) -> Option<String> {
        let mut state = self.state.write().await;
        let student = state.line.pop_front()?;
        state.bump();
        Some(student)
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().await;
        StoreSnapshot {
            revision: state.revision,
            feedback: state.feedback.clone(),
            questions: state.questions.clone(),
        }
    }

    pub async fn line_snapshot(&self) -> LineSnapshot {
        let state = self.state.read().await;
        LineSnapshot {
            revision: state.revision,
            line: state.line.iter().cloned().collect(),
        }
    }

    /// Feedback, questions and line read together
    pub async fn full_snapshot(&self) -> ClassroomSnapshot {
        let state = self.state.read().await;
        ClassroomSnapshot {
            revision: state.revision,
            feedback: state.feedback.clone(),
            questions: state.questions.clone(),
            line: state.line.iter().cloned().collect(),
        }
    }

    pub async fn counts(&self) -> StoreCounts {
        let state = self.state.read().await;
        StoreCounts {
            revision: state.revision,
            feedback: state.feedback.len(),
            questions: state.questions.len(),
            line: state.line.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_feedback_upsert_keeps_one_entry_per_student() {
        let store = ResourceStore::new();
        store.add_feedback("A", "good pace").await;
        store.add_feedback("B", "I'm lost").await;
        store.add_feedback("A", "too fast").await;

        let snapshot = store.snapshot().await;
        assert_eq!(
            snapshot.feedback,
            vec![
                FeedbackEntry { student: "A".into(), feedback: "too fast".into() },
                FeedbackEntry { student: "B".into(), feedback: "I'm lost".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_question_add_then_delete_restores_collection() {
        let store = ResourceStore::new();
        store.add_question("A", "first?").await;
        let before = store.snapshot().await.questions;

        let added = store.add_question("B", "what is X?").await;
        assert!(added.timestamp.is_some());
        assert_eq!(store.snapshot().await.questions.len(), 2);

        assert!(store.delete_question(&added.id).await);
        assert_eq!(store.snapshot().await.questions, before);
    }

    #[tokio::test]
    async fn test_delete_missing_question_is_noop() {
        let store = ResourceStore::new();
        store.add_question("A", "why?").await;
        let revision = store.snapshot().await.revision;

        assert!(!store.delete_question("does-not-exist").await);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.questions.len(), 1);
        assert_eq!(snapshot.revision, revision);
    }

    #[tokio::test]
    async fn test_question_ids_are_never_reused() {
        let store = ResourceStore::new();
        let first = store.add_question("A", "one").await;
        store.delete_question(&first.id).await;
        let second = store.add_question("A", "two").await;

        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_clear_feedback() {
        let store = ResourceStore::new();
        store.add_feedback("A", "good").await;
        store.add_feedback("B", "slow down").await;
        store.clear_feedback().await;

        assert!(store.snapshot().await.feedback.is_empty());
    }

    #[tokio::test]
    async fn test_line_is_fifo() {
        let store = ResourceStore::new();
        for student in ["A", "B", "C"] {
            store.enqueue_line(student).await;
        }

        assert_eq!(store.dequeue_line().await.as_deref(), Some("A"));
        assert_eq!(store.line_snapshot().await.line, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_dequeue_empty_line() {
        let store = ResourceStore::new();
        assert_eq!(store.dequeue_line().await, None);
        assert_eq!(store.counts().await.revision, 0);
    }

    #[tokio::test]
    async fn test_revision_increases_with_each_mutation() {
        let store = ResourceStore::new();
        store.add_feedback("A", "ok").await;
        let first = store.snapshot().await.revision;
        store.enqueue_line("A").await;
        let second = store.line_snapshot().await.revision;

        assert!(second > first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_full_snapshot_is_consistent_under_writes() {
        let store = Arc::new(ResourceStore::new());

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let student = format!("student-{}", i);
                    store.add_feedback(student.clone(), "ok").await;
                    store.enqueue_line(student).await;
                }
            })
        };

        for _ in 0..200 {
            let snapshot = store.full_snapshot().await;
            // Each student adds feedback and then joins the line
            let joined = snapshot.line.len() as u64;
            assert_eq!(snapshot.revision, snapshot.feedback.len() as u64 + joined);
            assert!(snapshot.feedback.len() as u64 - joined <= 1);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let snapshot = store.full_snapshot().await;
        assert_eq!(snapshot.revision, 400);
        assert_eq!(snapshot.line.len(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations_are_all_visible() {
        let store = Arc::new(ResourceStore::new());
        let mut handles = Vec::new();

        for i in 0..300 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.add_feedback(format!("student-{}", i % 10), format!("fb-{}", i)).await;
                store.add_question(format!("student-{}", i), "q").await.id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }

        let snapshot = store.snapshot().await;
        assert_eq!(ids.len(), 300);
        assert_eq!(snapshot.questions.len(), 300);
        assert_eq!(snapshot.feedback.len(), 10);
        // 300 feedback writes + 300 question writes
        assert_eq!(snapshot.revision, 600);
    }
}
