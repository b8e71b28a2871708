use chrono::{TimeZone, Utc};
use shared::{
    domain::{ChatroomId, MessageId, UserId},
    protocol::{MessagePayload, ReadMark},
};

use super::{read_status, ReadStatus};

fn message_with_marks(reads: &[(&str, bool)]) -> MessagePayload {
    let read_at = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
    MessagePayload {
        message_id: MessageId::new("a"),
        chatroom_id: ChatroomId::new("room-1"),
        sender_id: UserId::new("me"),
        sender_name: "me".to_owned(),
        text_content: Some("hi".to_owned()),
        media_url: None,
        media_kind: None,
        sent_at: read_at,
        edited: false,
        read_status: reads
            .iter()
            .map(|(user, is_read)| ReadMark {
                user_id: UserId::new(*user),
                username: (*user).to_owned(),
                is_read: *is_read,
                read_at,
            })
            .collect(),
    }
}

#[test]
fn no_marks_classifies_as_sent() {
    let message = message_with_marks(&[]);
    assert_eq!(read_status(&message, 3), ReadStatus::Sent);
}

#[test]
fn unread_marks_do_not_count() {
    let message = message_with_marks(&[("u1", false), ("u2", false)]);
    assert_eq!(read_status(&message, 3), ReadStatus::Sent);
}

#[test]
fn partial_reads_report_read_of_total() {
    let message = message_with_marks(&[("u1", true), ("u2", false)]);
    assert_eq!(
        read_status(&message, 3),
        ReadStatus::ReadBySome { read: 1, total: 3 }
    );
}

#[test]
fn all_recipients_read_classifies_as_read_by_all() {
    let message = message_with_marks(&[("u1", true), ("u2", true), ("u3", true)]);
    assert_eq!(read_status(&message, 3), ReadStatus::ReadByAll { total: 3 });
}

#[test]
fn sender_marks_are_excluded_from_the_count() {
    // a stray mark for the sender must not satisfy the recipient count
    let message = message_with_marks(&[("me", true), ("u1", true)]);
    assert_eq!(
        read_status(&message, 2),
        ReadStatus::ReadBySome { read: 1, total: 2 }
    );
}

#[test]
fn zero_recipients_is_always_sent() {
    let message = message_with_marks(&[]);
    assert_eq!(read_status(&message, 0), ReadStatus::Sent);
}
