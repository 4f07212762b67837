//! Ordered, duplicate-free message log for one session
//!
//! Messages arrive from the REST snapshot, from `new_message` pushes and from the
//! response of our own REST sends. A candidate is a duplicate when its id is already
//! known, or when an existing entry has the same body and sender type and was created
//! less than [`DEDUP_WINDOW`] apart. The second rule collapses a local send with its
//! own echo when the two carry different ids.

use std::collections::HashSet;

use supportdesk_shared::Message;
use time::Duration;

/// Tolerance used to collapse a local send with its server echo
pub const DEDUP_WINDOW: Duration = Duration::milliseconds(1000);

/// Result of merging one candidate message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    /// Same id already in the log
    DuplicateId,
    /// Same body and sender within the dedup window
    DuplicateEcho,
}

impl MergeOutcome {
    pub fn is_appended(&self) -> bool {
        matches!(self, MergeOutcome::Appended)
    }
}

/// Append-only message log
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
    ids: HashSet<String>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a candidate, appending it unless it duplicates an accepted entry
    pub fn merge(&mut self, candidate: Message) -> MergeOutcome {
        if let Some(duplicate) = self.classify_duplicate(&candidate) {
            tracing::debug!(
                message_id = %candidate.id,
                outcome = ?duplicate,
                "Dropping duplicate message"
            );
            return duplicate;
        }

        self.ids.insert(candidate.id.clone());
        self.messages.push(candidate);
        MergeOutcome::Appended
    }

    fn classify_duplicate(&self, candidate: &Message) -> Option<MergeOutcome> {
        if self.ids.contains(&candidate.id) {
            return Some(MergeOutcome::DuplicateId);
        }

        // Echoes land close to the end of the log
        let echo = self.messages.iter().rev().any(|existing| {
            existing.message == candidate.message
                && existing.sender_type == candidate.sender_type
                && (existing.created_at - candidate.created_at).abs() < DEDUP_WINDOW
        });

        echo.then_some(MergeOutcome::DuplicateEcho)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
