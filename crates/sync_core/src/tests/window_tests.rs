use chrono::{Duration, TimeZone, Utc};
use shared::{
    domain::{ChatroomId, MediaKind, MessageId, UserId},
    protocol::{MessagePage, MessagePatch, MessagePayload, ReadMark},
};

use super::MessageWindow;

fn message(id: &str, sender: &str, offset_secs: i64) -> MessagePayload {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    MessagePayload {
        message_id: MessageId::new(id),
        chatroom_id: ChatroomId::new("room-1"),
        sender_id: UserId::new(sender),
        sender_name: sender.to_owned(),
        text_content: Some(format!("message {id}")),
        media_url: None,
        media_kind: None,
        sent_at: base + Duration::seconds(offset_secs),
        edited: false,
        read_status: Vec::new(),
    }
}

fn page(messages: Vec<MessagePayload>, has_more: bool, cursor: Option<&str>) -> MessagePage {
    MessagePage {
        total_count: messages.len() as u64,
        unread_count: 0,
        messages,
        has_more,
        next_cursor: cursor.map(str::to_owned),
    }
}

fn ids(window: &MessageWindow) -> Vec<&str> {
    window
        .messages()
        .iter()
        .map(|m| m.message_id.as_str())
        .collect()
}

fn mark(user: &str, is_read: bool) -> ReadMark {
    ReadMark {
        user_id: UserId::new(user),
        username: user.to_owned(),
        is_read,
        read_at: Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap(),
    }
}

#[test]
fn inserting_same_id_twice_is_idempotent() {
    let mut window = MessageWindow::new();
    assert!(window.insert(message("a", "alice", 0)));
    assert!(!window.insert(message("a", "alice", 0)));
    assert_eq!(window.len(), 1);
    assert_eq!(window.total_count(), 1);
}

#[test]
fn live_insert_lands_at_newest_end() {
    let mut window = MessageWindow::new();
    window.apply_initial(page(
        vec![message("b", "bob", 10), message("a", "alice", 0)],
        true,
        Some("cur-a"),
    ));
    assert!(window.insert(message("c", "bob", 20)));
    assert_eq!(ids(&window), vec!["c", "b", "a"]);
}

#[test]
fn out_of_order_inserts_keep_sent_at_descending() {
    let mut window = MessageWindow::new();
    for (id, offset) in [("m3", 30), ("m1", 10), ("m4", 40), ("m2", 20)] {
        window.insert(message(id, "alice", offset));
    }
    assert_eq!(ids(&window), vec!["m4", "m3", "m2", "m1"]);
}

#[test]
fn older_page_appends_to_older_end() {
    let mut window = MessageWindow::new();
    window.apply_initial(page(
        vec![message("b", "bob", 10), message("a", "alice", 5)],
        true,
        Some("cur-a"),
    ));
    let added = window.apply_older(page(vec![message("z", "zoe", 0)], false, None));
    assert_eq!(added, 1);
    assert_eq!(ids(&window), vec!["b", "a", "z"]);
    assert!(!window.has_more());
    assert_eq!(window.cursor(), None);
}

#[test]
fn older_page_skips_ids_already_present() {
    let mut window = MessageWindow::new();
    window.apply_initial(page(
        vec![message("b", "bob", 10), message("a", "alice", 5)],
        true,
        Some("cur-a"),
    ));
    let added = window.apply_older(page(
        vec![message("a", "alice", 5), message("z", "zoe", 0)],
        false,
        None,
    ));
    assert_eq!(added, 1);
    assert_eq!(ids(&window), vec!["b", "a", "z"]);
}

#[test]
fn patch_merges_fields_and_ignores_missing_id() {
    let mut window = MessageWindow::new();
    window.insert(message("a", "alice", 0));

    let patch = MessagePatch {
        text_content: Some("edited text".to_owned()),
        edited: Some(true),
        ..MessagePatch::default()
    };
    assert!(window.patch(&MessageId::new("a"), &patch));
    let patched = window.get(&MessageId::new("a")).unwrap();
    assert_eq!(patched.text_content.as_deref(), Some("edited text"));
    assert!(patched.edited);
    // untouched fields survive
    assert_eq!(patched.media_kind, None);

    assert!(!window.patch(&MessageId::new("gone"), &patch));
}

#[test]
fn patch_can_attach_media() {
    let mut window = MessageWindow::new();
    window.insert(message("a", "alice", 0));
    let patch = MessagePatch {
        media_url: Some("https://cdn.example/a.ogg".to_owned()),
        media_kind: Some(MediaKind::Audio),
        ..MessagePatch::default()
    };
    assert!(window.patch(&MessageId::new("a"), &patch));
    let patched = window.get(&MessageId::new("a")).unwrap();
    assert_eq!(patched.media_kind, Some(MediaKind::Audio));
}

#[test]
fn remove_never_drives_total_below_zero() {
    let mut window = MessageWindow::new();
    window.apply_initial(page(vec![message("a", "alice", 0)], false, None));
    assert!(window.remove(&MessageId::new("a")));
    assert_eq!(window.total_count(), 0);
    assert!(!window.remove(&MessageId::new("a")));
    assert_eq!(window.total_count(), 0);
    assert!(window.is_empty());
}

#[test]
fn removed_id_can_be_reinserted() {
    let mut window = MessageWindow::new();
    window.insert(message("a", "alice", 0));
    window.remove(&MessageId::new("a"));
    assert!(window.insert(message("a", "alice", 0)));
}

#[test]
fn read_mark_is_upserted_not_duplicated() {
    let mut window = MessageWindow::new();
    window.insert(message("a", "alice", 0));
    let id = MessageId::new("a");

    assert!(window.apply_read_mark(&id, mark("bob", false)));
    assert!(window.apply_read_mark(&id, mark("bob", true)));
    let marks = &window.get(&id).unwrap().read_status;
    assert_eq!(marks.len(), 1);
    assert!(marks[0].is_read);
}

#[test]
fn sender_never_appears_in_own_read_status() {
    let mut window = MessageWindow::new();
    window.insert(message("a", "alice", 0));
    assert!(!window.apply_read_mark(&MessageId::new("a"), mark("alice", true)));
    assert!(window
        .get(&MessageId::new("a"))
        .unwrap()
        .read_status
        .is_empty());
}

#[test]
fn bulk_read_skips_own_and_already_read_messages() {
    let mut window = MessageWindow::new();
    window.insert(message("a", "alice", 0));
    window.insert(message("b", "bob", 10));
    window.insert(message("c", "alice", 20));
    window.apply_read_mark(&MessageId::new("a"), mark("bob", true));

    let touched = window.apply_bulk_read(
        &UserId::new("bob"),
        "bob",
        Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap(),
    );
    // "a" already read by bob, "b" is bob's own message
    assert_eq!(touched, 1);
    assert!(window
        .get(&MessageId::new("c"))
        .unwrap()
        .is_read_by(&UserId::new("bob")));
    assert!(window
        .get(&MessageId::new("b"))
        .unwrap()
        .read_status
        .is_empty());
}

#[test]
fn remove_read_mark_targets_one_pair_only() {
    let mut window = MessageWindow::new();
    window.insert(message("a", "alice", 0));
    window.insert(message("b", "alice", 10));
    window.apply_read_mark(&MessageId::new("a"), mark("bob", true));
    window.apply_read_mark(&MessageId::new("b"), mark("bob", true));

    assert!(window.remove_read_mark(&MessageId::new("a"), &UserId::new("bob")));
    assert!(window
        .get(&MessageId::new("a"))
        .unwrap()
        .read_status
        .is_empty());
    assert!(window
        .get(&MessageId::new("b"))
        .unwrap()
        .is_read_by(&UserId::new("bob")));
}

#[test]
fn unread_adjustments_saturate_at_zero() {
    let mut window = MessageWindow::new();
    let mut initial = page(vec![message("a", "alice", 0)], false, None);
    initial.unread_count = 1;
    window.apply_initial(initial);

    window.decrement_unread();
    assert_eq!(window.unread_count(), 0);
    window.decrement_unread();
    assert_eq!(window.unread_count(), 0);

    window.increment_unread();
    assert_eq!(window.unread_count(), 1);
    window.clear_unread();
    assert_eq!(window.unread_count(), 0);
}

#[test]
fn apply_initial_replaces_previous_contents() {
    let mut window = MessageWindow::new();
    window.apply_initial(page(vec![message("old", "alice", 0)], true, Some("c1")));
    window.apply_initial(page(vec![message("new", "bob", 10)], false, None));
    assert_eq!(ids(&window), vec!["new"]);
    assert!(!window.contains(&MessageId::new("old")));
}
