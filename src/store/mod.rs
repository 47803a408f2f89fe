//! Shared classroom state: lecture feedback, questions and the help line.
//!
//! The store owns every entry. Other components only see point-in-time
//! copies produced by [`ResourceStore::snapshot`],
//! [`ResourceStore::line_snapshot`] and [`ResourceStore::full_snapshot`].

mod resource_store;
mod types;

pub use resource_store::ResourceStore;
pub use types::{
    ClassroomSnapshot, FeedbackEntry, LineSnapshot, QuestionEntry, StoreCounts, StoreSnapshot,
};
