use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ChatroomId, MessageId, UserId},
    protocol::{ChannelEvent, MessagePatch, MessagePayload, ReadMark, ReadReceiptEvent},
};
use tracing::{debug, warn};

/// Subscription phase of one conversation visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterPhase {
    Disconnected,
    Subscribing,
    Subscribed,
}

/// Store mutation derived from one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Insert a newly created message. `needs_local_read` is set for
    /// messages from other senders: the orchestrator synthesizes a read
    /// mark for the current user before inserting, then confirms it
    /// asynchronously, so an actively viewed message never flashes unread.
    Insert {
        message: MessagePayload,
        needs_local_read: bool,
    },
    Patch {
        message_id: MessageId,
        patch: MessagePatch,
    },
    Remove {
        message_id: MessageId,
    },
    ApplyRead {
        message_id: MessageId,
        mark: ReadMark,
    },
    ApplyBulkRead {
        user_id: UserId,
        username: String,
        read_at: DateTime<Utc>,
    },
    /// The active chatroom was deleted; fatal to the visit.
    ChatroomDeleted,
}

/// Validates, de-duplicates, and translates inbound events for one visit.
///
/// The router holds no message state: only the per-visit dedup set and the
/// subscription phase, both discarded on teardown.
#[derive(Debug)]
pub struct EventRouter {
    chatroom_id: ChatroomId,
    current_user: UserId,
    phase: RouterPhase,
    seen_message_ids: HashSet<MessageId>,
}

impl EventRouter {
    pub fn new(chatroom_id: ChatroomId, current_user: UserId) -> Self {
        Self {
            chatroom_id,
            current_user,
            phase: RouterPhase::Disconnected,
            seen_message_ids: HashSet::new(),
        }
    }

    pub fn phase(&self) -> RouterPhase {
        self.phase
    }

    pub fn chatroom_id(&self) -> &ChatroomId {
        &self.chatroom_id
    }

    pub fn mark_subscribing(&mut self) {
        self.phase = RouterPhase::Subscribing;
    }

    pub fn mark_subscribed(&mut self) {
        self.phase = RouterPhase::Subscribed;
    }

    /// Drop the dedup set and return to `Disconnected`.
    pub fn teardown(&mut self) {
        self.phase = RouterPhase::Disconnected;
        self.seen_message_ids.clear();
    }

    /// Translate one inbound event into a store mutation, or `None` when
    /// the event is out of scope, a duplicate, or arrived outside the
    /// subscribed phase.
    pub fn route(&mut self, event: ChannelEvent) -> Option<Dispatch> {
        if self.phase != RouterPhase::Subscribed {
            debug!(phase = ?self.phase, "event dropped outside subscribed phase");
            return None;
        }

        if let Some(chatroom_id) = event.chatroom_id() {
            if chatroom_id != &self.chatroom_id {
                debug!(
                    event_chatroom = %chatroom_id,
                    active_chatroom = %self.chatroom_id,
                    "event for foreign chatroom rejected"
                );
                return None;
            }
        }

        match event {
            ChannelEvent::MessageCreated { message } => {
                if !self.seen_message_ids.insert(message.message_id.clone()) {
                    debug!(message_id = %message.message_id, "duplicate message_created dropped");
                    return None;
                }
                let needs_local_read = message.sender_id != self.current_user;
                Some(Dispatch::Insert {
                    message,
                    needs_local_read,
                })
            }
            ChannelEvent::MessageUpdated {
                message_id, patch, ..
            } => Some(Dispatch::Patch { message_id, patch }),
            ChannelEvent::MessageDeleted { message_id, .. } => {
                Some(Dispatch::Remove { message_id })
            }
            ChannelEvent::MessageRead { receipt, .. } => match receipt {
                ReadReceiptEvent::Single { message_id, mark } => {
                    Some(Dispatch::ApplyRead { message_id, mark })
                }
                ReadReceiptEvent::Bulk {
                    user_id,
                    username,
                    read_at,
                } => Some(Dispatch::ApplyBulkRead {
                    user_id,
                    username,
                    read_at,
                }),
            },
            ChannelEvent::ChatroomDeleted { .. } => Some(Dispatch::ChatroomDeleted),
            ChannelEvent::Error(err) => {
                warn!(code = ?err.code, message = %err.message, "error event on channel");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
