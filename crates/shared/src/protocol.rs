use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChatroomId, MediaKind, MessageId, UserId},
    error::ApiError,
};

/// Per-user, per-message read record. At most one exists for a given
/// `(message, user)` pair; later updates mutate the existing mark in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadMark {
    pub user_id: UserId,
    pub username: String,
    pub is_read: bool,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: MessageId,
    pub chatroom_id: ChatroomId,
    pub sender_id: UserId,
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<MediaKind>,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub read_status: Vec<ReadMark>,
}

impl MessagePayload {
    pub fn read_mark_for(&self, user_id: &UserId) -> Option<&ReadMark> {
        self.read_status.iter().find(|mark| &mark.user_id == user_id)
    }

    pub fn is_read_by(&self, user_id: &UserId) -> bool {
        self.read_mark_for(user_id).is_some_and(|mark| mark.is_read)
    }

    /// Replace or append the mark for `mark.user_id`, keeping the
    /// one-mark-per-user invariant.
    pub fn upsert_read_mark(&mut self, mark: ReadMark) {
        if let Some(existing) = self
            .read_status
            .iter_mut()
            .find(|m| m.user_id == mark.user_id)
        {
            *existing = mark;
        } else {
            self.read_status.push(mark);
        }
    }
}

/// Partial message update; absent fields leave the target untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<bool>,
}

/// One page of a chatroom history query, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<MessagePayload>,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub unread_count: u64,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadReceiptEvent {
    /// One participant read one message.
    Single {
        message_id: MessageId,
        mark: ReadMark,
    },
    /// One participant read everything they had not authored.
    Bulk {
        user_id: UserId,
        username: String,
        read_at: DateTime<Utc>,
    },
}

/// Inbound push event delivered over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChannelEvent {
    MessageCreated {
        message: MessagePayload,
    },
    MessageUpdated {
        chatroom_id: ChatroomId,
        message_id: MessageId,
        patch: MessagePatch,
    },
    MessageDeleted {
        chatroom_id: ChatroomId,
        message_id: MessageId,
    },
    MessageRead {
        chatroom_id: ChatroomId,
        receipt: ReadReceiptEvent,
    },
    ChatroomDeleted {
        chatroom_id: ChatroomId,
    },
    Error(ApiError),
}

impl ChannelEvent {
    /// Chatroom the event is scoped to, when it carries one.
    pub fn chatroom_id(&self) -> Option<&ChatroomId> {
        match self {
            ChannelEvent::MessageCreated { message } => Some(&message.chatroom_id),
            ChannelEvent::MessageUpdated { chatroom_id, .. }
            | ChannelEvent::MessageDeleted { chatroom_id, .. }
            | ChannelEvent::MessageRead { chatroom_id, .. }
            | ChannelEvent::ChatroomDeleted { chatroom_id } => Some(chatroom_id),
            ChannelEvent::Error(_) => None,
        }
    }
}
