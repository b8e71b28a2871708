use shared::domain::{ChatroomId, MessageId, UserId};
use thiserror::Error;

/// Failure taxonomy for one conversation visit.
///
/// Duplicate delivery, out-of-order delivery, and late-arriving stale
/// responses are recovered locally and never reach this type.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Initial or pagination load failed. Retryable; the window is left
    /// unchanged.
    #[error("message fetch for chatroom {chatroom_id} failed: {source}")]
    Fetch {
        chatroom_id: ChatroomId,
        #[source]
        source: anyhow::Error,
    },

    /// A read-receipt confirmation was rejected. Reverted for that mark
    /// only; never surfaced as a user-facing failure.
    #[error("read confirmation for message {message_id} by user {user_id} failed: {source}")]
    Confirmation {
        message_id: MessageId,
        user_id: UserId,
        #[source]
        source: anyhow::Error,
    },

    /// The event channel failed to open. Surfaced as a connectivity
    /// indicator; reconnect policy belongs to the transport.
    #[error("event channel subscription failed: {source}")]
    Subscription {
        #[source]
        source: anyhow::Error,
    },

    /// An operation that requires an active visit was called outside one.
    #[error("no active chatroom visit")]
    NotInChatroom,
}
