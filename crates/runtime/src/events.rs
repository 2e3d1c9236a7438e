use serde::{Deserialize, Serialize};

/// Operator-visible events fanned out to every subscribed client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    /// A run persisted a fresh snapshot.
    KeysUpdated { count: usize },
    ExportSucceeded { updated: usize, appended: usize },
    Failure { title: String, message: String },
}
