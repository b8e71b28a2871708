use chrono::{Duration, TimeZone, Utc};
use shared::{
    domain::{ChatroomId, MessageId, UserId},
    protocol::{MessagePayload, ReadMark},
};

use super::{UnreadTracker, DEFAULT_UNREAD_THRESHOLD};

fn me() -> UserId {
    UserId::new("me")
}

fn message(id: &str, sender: &str, offset_secs: i64, read_by_me: bool) -> MessagePayload {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let read_status = if read_by_me {
        vec![ReadMark {
            user_id: me(),
            username: "me".to_owned(),
            is_read: true,
            read_at: base + Duration::seconds(offset_secs + 1),
        }]
    } else {
        Vec::new()
    };
    MessagePayload {
        message_id: MessageId::new(id),
        chatroom_id: ChatroomId::new("room-1"),
        sender_id: UserId::new(sender),
        sender_name: sender.to_owned(),
        text_content: Some(id.to_owned()),
        media_url: None,
        media_kind: None,
        sent_at: base + Duration::seconds(offset_secs),
        edited: false,
        read_status,
    }
}

/// Newest-first display window with `unread` unread messages at the old end.
fn window_with_unread(unread: usize) -> Vec<MessagePayload> {
    let mut messages = Vec::new();
    // a couple of read messages at the new end
    messages.push(message("read-2", "them", 200, true));
    messages.push(message("read-1", "them", 190, true));
    for i in 0..unread {
        let offset = 100 - i as i64 * 10;
        messages.push(message(&format!("unread-{i}"), "them", offset, false));
    }
    messages
}

#[test]
fn returns_oldest_unread_with_frozen_display_index() {
    let mut tracker = UnreadTracker::new();
    let messages = window_with_unread(6);
    let boundary = tracker
        .snapshot(&messages, &me(), true, DEFAULT_UNREAD_THRESHOLD)
        .cloned()
        .expect("six unread messages warrant a boundary");
    assert_eq!(boundary.message_id, MessageId::new("unread-5"));
    assert_eq!(boundary.display_index, messages.len() - 1);
}

#[test]
fn five_unread_is_below_threshold() {
    let mut tracker = UnreadTracker::new();
    let messages = window_with_unread(5);
    assert!(tracker
        .snapshot(&messages, &me(), true, DEFAULT_UNREAD_THRESHOLD)
        .is_none());
}

#[test]
fn six_unread_meets_threshold() {
    let mut tracker = UnreadTracker::new();
    let messages = window_with_unread(6);
    assert!(tracker
        .snapshot(&messages, &me(), true, DEFAULT_UNREAD_THRESHOLD)
        .is_some());
}

#[test]
fn fully_paginated_window_shows_no_boundary() {
    let mut tracker = UnreadTracker::new();
    let messages = window_with_unread(10);
    assert!(tracker
        .snapshot(&messages, &me(), false, DEFAULT_UNREAD_THRESHOLD)
        .is_none());
}

#[test]
fn own_messages_are_skipped() {
    let mut tracker = UnreadTracker::new();
    let mut messages = window_with_unread(6);
    // an old unread-looking message authored by the current user must not
    // become the boundary
    messages.push(message("mine", "me", 0, false));
    let boundary = tracker
        .snapshot(&messages, &me(), true, DEFAULT_UNREAD_THRESHOLD)
        .expect("boundary still present");
    assert_eq!(boundary.message_id, MessageId::new("unread-5"));
}

#[test]
fn snapshot_is_computed_once_per_visit() {
    let mut tracker = UnreadTracker::new();
    let messages = window_with_unread(6);
    let first = tracker
        .snapshot(&messages, &me(), true, DEFAULT_UNREAD_THRESHOLD)
        .cloned();

    // everything becomes read afterwards; the exposed boundary is frozen
    let all_read = window_with_unread(0);
    let second = tracker
        .snapshot(&all_read, &me(), true, DEFAULT_UNREAD_THRESHOLD)
        .cloned();
    assert_eq!(first, second);
    assert_eq!(tracker.boundary().cloned(), first);
}

#[test]
fn dismiss_is_a_one_way_latch() {
    let mut tracker = UnreadTracker::new();
    let messages = window_with_unread(6);
    tracker
        .snapshot(&messages, &me(), true, DEFAULT_UNREAD_THRESHOLD)
        .expect("boundary present");
    tracker.dismiss();
    assert!(tracker.boundary().is_none());
}

#[test]
fn reset_allows_a_fresh_snapshot() {
    let mut tracker = UnreadTracker::new();
    tracker.snapshot(&window_with_unread(6), &me(), true, DEFAULT_UNREAD_THRESHOLD);
    tracker.dismiss();
    tracker.reset();
    assert!(tracker
        .snapshot(&window_with_unread(6), &me(), true, DEFAULT_UNREAD_THRESHOLD)
        .is_some());
}

#[test]
fn all_read_window_has_no_boundary() {
    let mut tracker = UnreadTracker::new();
    let messages = window_with_unread(0);
    assert!(tracker
        .snapshot(&messages, &me(), true, DEFAULT_UNREAD_THRESHOLD)
        .is_none());
}
