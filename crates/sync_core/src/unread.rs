use shared::{
    domain::{MessageId, UserId},
    protocol::MessagePayload,
};
use tracing::debug;

/// Minimum number of unread messages before a boundary is worth showing.
pub const DEFAULT_UNREAD_THRESHOLD: usize = 6;

/// Identity and frozen display position of the oldest unread message at
/// the moment the conversation was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadBoundary {
    pub message_id: MessageId,
    /// Index into the newest-first display list at snapshot time.
    pub display_index: usize,
}

/// Computes the unread boundary exactly once per conversation visit.
///
/// The snapshot is deliberately not reactive: read receipts arriving while
/// the user is mid-scroll must not relocate or hide the marker. Only
/// [`UnreadTracker::reset`] (conversation exit/re-entry) or
/// [`UnreadTracker::dismiss`] change what is exposed.
#[derive(Debug, Default)]
pub struct UnreadTracker {
    snapped: bool,
    boundary: Option<UnreadBoundary>,
    dismissed: bool,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the once-per-visit snapshot from the initial window.
    ///
    /// `messages` is the display-ordered (newest-first) window. Returns
    /// `None` when every message is read, when fewer than `threshold`
    /// unread messages exist, or when the window is already fully paginated
    /// (`has_more == false`) and the marker would add nothing.
    pub fn snapshot(
        &mut self,
        messages: &[MessagePayload],
        current_user: &UserId,
        has_more: bool,
        threshold: usize,
    ) -> Option<&UnreadBoundary> {
        if self.snapped {
            debug!("unread boundary already snapped for this visit");
            return self.boundary();
        }
        self.snapped = true;
        self.boundary = compute_boundary(messages, current_user, has_more, threshold);
        self.boundary()
    }

    pub fn boundary(&self) -> Option<&UnreadBoundary> {
        if self.dismissed {
            return None;
        }
        self.boundary.as_ref()
    }

    /// One-way latch: suppress the boundary for the rest of the visit.
    pub fn dismiss(&mut self) {
        self.dismissed = true;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn compute_boundary(
    messages: &[MessagePayload],
    current_user: &UserId,
    has_more: bool,
    threshold: usize,
) -> Option<UnreadBoundary> {
    if !has_more {
        return None;
    }

    let mut unread = 0usize;
    let mut oldest: Option<UnreadBoundary> = None;
    // Display order is newest-first; scan chronologically from the tail.
    for (display_index, message) in messages.iter().enumerate().rev() {
        if &message.sender_id == current_user {
            continue;
        }
        if message.is_read_by(current_user) {
            continue;
        }
        unread += 1;
        if oldest.is_none() {
            oldest = Some(UnreadBoundary {
                message_id: message.message_id.clone(),
                display_index,
            });
        }
    }

    if unread < threshold {
        return None;
    }
    oldest
}

#[cfg(test)]
#[path = "tests/unread_tests.rs"]
mod tests;
