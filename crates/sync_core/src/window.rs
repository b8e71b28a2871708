use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, UserId},
    protocol::{MessagePage, MessagePatch, MessagePayload, ReadMark},
};
use tracing::debug;

/// Ordered, identity-deduplicated window of one chatroom's messages.
///
/// Messages are held newest-first (`sent_at` descending). The window owns
/// the dedup set and the backward-pagination cursor; callers never mutate
/// its contents directly.
#[derive(Debug, Default)]
pub struct MessageWindow {
    messages: Vec<MessagePayload>,
    known_ids: HashSet<MessageId>,
    cursor: Option<String>,
    has_more: bool,
    unread_count: u64,
    total_count: u64,
}

impl MessageWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[MessagePayload] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.known_ids.contains(message_id)
    }

    pub fn get(&self, message_id: &MessageId) -> Option<&MessagePayload> {
        self.messages.iter().find(|m| &m.message_id == message_id)
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Replace the window contents with the initial page.
    pub fn apply_initial(&mut self, page: MessagePage) {
        self.messages.clear();
        self.known_ids.clear();
        for message in page.messages {
            self.insert_sorted(message);
        }
        self.cursor = page.next_cursor;
        self.has_more = page.has_more;
        self.unread_count = page.unread_count;
        self.total_count = page.total_count;
    }

    /// Append an older page to the window, skipping already-known ids.
    ///
    /// Returns the number of messages actually added.
    pub fn apply_older(&mut self, page: MessagePage) -> usize {
        let mut added = 0;
        for message in page.messages {
            if self.known_ids.contains(&message.message_id) {
                debug!(message_id = %message.message_id, "pagination overlap dropped");
                continue;
            }
            self.insert_sorted(message);
            added += 1;
        }
        self.cursor = page.next_cursor;
        self.has_more = page.has_more;
        added
    }

    /// Insert a freshly delivered message at its sort position.
    ///
    /// Silently rejected when the id is already present; this is the primary
    /// defense against duplicate delivery from overlapping pagination and
    /// live-event sources. The first-arrived copy wins.
    pub fn insert(&mut self, message: MessagePayload) -> bool {
        if self.known_ids.contains(&message.message_id) {
            debug!(message_id = %message.message_id, "duplicate insert ignored");
            return false;
        }
        self.insert_sorted(message);
        self.total_count += 1;
        true
    }

    /// Merge a partial update into an existing message.
    ///
    /// A missing id is a no-op: the message may have scrolled out of the
    /// loaded window or not yet arrived.
    pub fn patch(&mut self, message_id: &MessageId, patch: &MessagePatch) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| &m.message_id == message_id)
        else {
            debug!(message_id = %message_id, "patch target outside window");
            return false;
        };
        if let Some(text) = &patch.text_content {
            message.text_content = Some(text.clone());
        }
        if let Some(url) = &patch.media_url {
            message.media_url = Some(url.clone());
        }
        if let Some(kind) = patch.media_kind {
            message.media_kind = Some(kind);
        }
        if let Some(edited) = patch.edited {
            message.edited = edited;
        }
        true
    }

    pub fn remove(&mut self, message_id: &MessageId) -> bool {
        let Some(idx) = self
            .messages
            .iter()
            .position(|m| &m.message_id == message_id)
        else {
            return false;
        };
        self.messages.remove(idx);
        self.known_ids.remove(message_id);
        self.total_count = self.total_count.saturating_sub(1);
        true
    }

    /// Upsert a read mark on one message, one entry per user.
    ///
    /// The sender never appears in its own message's read status.
    pub fn apply_read_mark(&mut self, message_id: &MessageId, mark: ReadMark) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| &m.message_id == message_id)
        else {
            debug!(message_id = %message_id, "read mark target outside window");
            return false;
        };
        if message.sender_id == mark.user_id {
            return false;
        }
        message.upsert_read_mark(mark);
        true
    }

    /// Upsert marks for one user on every loaded message not authored by
    /// that user. Returns the number of messages touched.
    pub fn apply_bulk_read(
        &mut self,
        user_id: &UserId,
        username: &str,
        read_at: DateTime<Utc>,
    ) -> usize {
        let mut touched = 0;
        for message in &mut self.messages {
            if &message.sender_id == user_id {
                continue;
            }
            if message.is_read_by(user_id) {
                continue;
            }
            message.upsert_read_mark(ReadMark {
                user_id: user_id.clone(),
                username: username.to_owned(),
                is_read: true,
                read_at,
            });
            touched += 1;
        }
        touched
    }

    /// Rollback primitive: drop the mark for one `(message, user)` pair.
    pub fn remove_read_mark(&mut self, message_id: &MessageId, user_id: &UserId) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| &m.message_id == message_id)
        else {
            return false;
        };
        let before = message.read_status.len();
        message.read_status.retain(|mark| &mark.user_id != user_id);
        message.read_status.len() != before
    }

    /// Adjust the caller-facing unread count as read-state mutations land.
    /// The count covers the whole conversation, not just the loaded window,
    /// so the orchestrator decides when a mutation affects it.
    pub fn decrement_unread(&mut self) {
        self.unread_count = self.unread_count.saturating_sub(1);
    }

    pub fn increment_unread(&mut self) {
        self.unread_count += 1;
    }

    pub fn clear_unread(&mut self) {
        self.unread_count = 0;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn insert_sorted(&mut self, message: MessagePayload) {
        let idx = self
            .messages
            .partition_point(|m| m.sent_at > message.sent_at);
        self.known_ids.insert(message.message_id.clone());
        self.messages.insert(idx, message);
    }
}

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
