use chrono::{DateTime, Utc};
use shared::{
    domain::{ChatroomId, UserId},
    protocol::MessagePayload,
};

/// Delivery classification for a message authored by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// No recipient has read it yet.
    Sent,
    /// Read by some but not all recipients.
    ReadBySome { read: usize, total: usize },
    /// Read by every recipient.
    ReadByAll { total: usize },
}

/// Classify a message's read status against the chatroom's recipient count.
///
/// `recipient_count` excludes the sender; marks belonging to the sender are
/// never counted.
pub fn read_status(message: &MessagePayload, recipient_count: usize) -> ReadStatus {
    let read = message
        .read_status
        .iter()
        .filter(|mark| mark.is_read && mark.user_id != message.sender_id)
        .count();
    if read == 0 || recipient_count == 0 {
        ReadStatus::Sent
    } else if read >= recipient_count {
        ReadStatus::ReadByAll {
            total: recipient_count,
        }
    } else {
        ReadStatus::ReadBySome {
            read,
            total: recipient_count,
        }
    }
}

/// Record of a bulk mark-all-read confirmation the server has not yet
/// accepted. The optimistic marks stay applied; the entry exists so the
/// confirmation can be retried or audited instead of silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReconciliation {
    pub chatroom_id: ChatroomId,
    pub user_id: UserId,
    pub requested_at: DateTime<Utc>,
    pub attempts: u32,
}

#[cfg(test)]
#[path = "tests/receipts_tests.rs"]
mod tests;
