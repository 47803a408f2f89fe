use serde::{Deserialize, Serialize};

/// Lecture feedback, one per student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub student: String,
    pub feedback: String,
}

/// A student question with its server-assigned id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionEntry {
    pub id: String,
    pub student: String,
    pub question: String,
    /// RFC 3339 creation time
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Feedback and questions as of `revision`, in store order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSnapshot {
    pub revision: u64,
    pub feedback: Vec<FeedbackEntry>,
    pub questions: Vec<QuestionEntry>,
}

/// The help line as of `revision`, head first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineSnapshot {
    pub revision: u64,
    pub line: Vec<String>,
}

/// Every resource as of one `revision`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassroomSnapshot {
    pub revision: u64,
    pub feedback: Vec<FeedbackEntry>,
    pub questions: Vec<QuestionEntry>,
    pub line: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub revision: u64,
    pub feedback: usize,
    pub questions: usize,
    pub line: usize,
}
