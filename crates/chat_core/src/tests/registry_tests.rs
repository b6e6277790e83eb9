use super::*;
use chrono::TimeZone;
use shared::domain::MessageId;

const ME: UserId = UserId(1);
const PEER: UserId = UserId(2);

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

fn summary(id: i64, unread: u32, last_at: i64) -> ConversationSummary {
    ConversationSummary {
        conversation_id: ConversationId(id),
        other_user: PeerSummary {
            user_id: PEER,
            display_name: format!("peer-{id}"),
            avatar_url: None,
        },
        last_message_preview: "hello".to_string(),
        last_message_at: at(last_at),
        unread_count: unread,
    }
}

fn inbound(conversation: i64, sender: UserId, body: &str, sent: i64) -> MessagePayload {
    MessagePayload {
        conversation_id: ConversationId(conversation),
        message_id: Some(MessageId(sent)),
        temp_id: None,
        sender_id: sender,
        body: body.to_string(),
        sent_at: at(sent),
    }
}

fn registry_with(summaries: Vec<ConversationSummary>) -> ConversationRegistry {
    let mut registry = ConversationRegistry::new(ME);
    registry.resync(summaries);
    registry
}

#[test]
fn list_orders_by_recency_with_stable_ties() {
    let registry = registry_with(vec![
        summary(3, 0, 100),
        summary(1, 0, 300),
        summary(2, 0, 100),
    ]);
    let ids: Vec<i64> = registry
        .list()
        .into_iter()
        .map(|c| c.conversation_id.0)
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn select_zeroes_unread_and_returns_previous_count() {
    let mut registry = registry_with(vec![summary(1, 4, 100)]);
    assert_eq!(registry.select(ConversationId(1)), Some(4));
    assert_eq!(registry.active(), Some(ConversationId(1)));
    assert_eq!(registry.get(ConversationId(1)).unwrap().unread_count, 0);
}

#[test]
fn select_unknown_conversation_is_rejected() {
    let mut registry = registry_with(vec![summary(1, 0, 100)]);
    assert_eq!(registry.select(ConversationId(99)), None);
    assert_eq!(registry.active(), None);
}

#[test]
fn restore_unread_undoes_the_optimistic_zeroing() {
    let mut registry = registry_with(vec![summary(1, 4, 100)]);
    let previous = registry.select(ConversationId(1)).unwrap();
    registry.restore_unread(ConversationId(1), previous);
    assert_eq!(registry.get(ConversationId(1)).unwrap().unread_count, 4);
}

#[test]
fn inbound_message_bumps_unread_and_preview() {
    let mut registry = registry_with(vec![summary(1, 0, 100)]);
    registry.apply_message(&inbound(1, PEER, "new text", 200));
    let row = registry.get(ConversationId(1)).unwrap();
    assert_eq!(row.unread_count, 1);
    assert_eq!(row.last_message_preview, "new text");
    assert_eq!(row.last_message_at, at(200));
}

#[test]
fn active_conversation_never_accumulates_unread() {
    let mut registry = registry_with(vec![summary(1, 0, 100)]);
    registry.select(ConversationId(1));
    registry.apply_message(&inbound(1, PEER, "while open", 200));
    assert_eq!(registry.get(ConversationId(1)).unwrap().unread_count, 0);
}

#[test]
fn own_echo_does_not_count_as_unread() {
    let mut registry = registry_with(vec![summary(1, 0, 100)]);
    registry.apply_message(&inbound(1, ME, "my own", 200));
    let row = registry.get(ConversationId(1)).unwrap();
    assert_eq!(row.unread_count, 0);
    assert_eq!(row.last_message_preview, "my own");
}

#[test]
fn unknown_conversation_gets_a_fabricated_entry() {
    let mut registry = registry_with(vec![]);
    let outcome = registry.apply_message(&inbound(9, PEER, "first contact", 100));
    assert!(outcome.fabricated);
    let row = registry.get(ConversationId(9)).unwrap();
    assert_eq!(row.other_user.user_id, PEER);
    assert_eq!(row.other_user.display_name, "");
    assert_eq!(row.unread_count, 1);

    // A second message in the same conversation is no longer a fabrication.
    let outcome = registry.apply_message(&inbound(9, PEER, "again", 200));
    assert!(!outcome.fabricated);
}

#[test]
fn metadata_repairs_a_fabricated_entry_without_touching_live_state() {
    let mut registry = registry_with(vec![]);
    registry.apply_message(&inbound(9, PEER, "first contact", 100));
    registry.apply_metadata(summary(9, 3, 50));
    let row = registry.get(ConversationId(9)).unwrap();
    assert_eq!(row.other_user.display_name, "peer-9");
    // Counts and preview reflect what we observed live, not the stale summary.
    assert_eq!(row.unread_count, 1);
    assert_eq!(row.last_message_preview, "first contact");
}

#[test]
fn long_bodies_are_truncated_in_the_preview() {
    let mut registry = registry_with(vec![summary(1, 0, 100)]);
    let body = "x".repeat(500);
    registry.apply_message(&inbound(1, PEER, &body, 200));
    let row = registry.get(ConversationId(1)).unwrap();
    assert_eq!(row.last_message_preview.chars().count(), 120);
}

#[test]
fn resync_replaces_the_list_wholesale() {
    let mut registry = registry_with(vec![summary(1, 2, 100), summary(2, 0, 100)]);
    registry.select(ConversationId(2));
    registry.resync(vec![summary(1, 5, 300), summary(3, 1, 200)]);

    let ids: Vec<i64> = registry
        .list()
        .into_iter()
        .map(|c| c.conversation_id.0)
        .collect();
    assert_eq!(ids, vec![1, 3]);
    assert_eq!(registry.get(ConversationId(1)).unwrap().unread_count, 5);
    // The active selection vanished with its conversation.
    assert_eq!(registry.active(), None);
}

#[test]
fn resync_preserves_peer_read_marks_for_surviving_ids() {
    let mut registry = registry_with(vec![summary(1, 0, 100)]);
    registry.apply_read_receipt(&ReadReceiptPayload {
        conversation_id: ConversationId(1),
        reader_id: PEER,
        read_at: at(150),
    });
    registry.resync(vec![summary(1, 0, 100)]);
    assert_eq!(
        registry.get(ConversationId(1)).unwrap().peer_last_read_at,
        Some(at(150))
    );
}

#[test]
fn resync_with_an_identical_list_changes_nothing() {
    let mut registry = registry_with(vec![summary(1, 4, 300), summary(2, 0, 100)]);
    let before = registry.list();

    registry.resync(vec![summary(1, 4, 300), summary(2, 0, 100)]);

    let after = registry.list();
    assert_eq!(after.len(), before.len());
    for (was, is) in before.iter().zip(&after) {
        assert_eq!(is.conversation_id, was.conversation_id);
        assert_eq!(is.unread_count, was.unread_count);
        assert_eq!(is.last_message_at, was.last_message_at);
    }
    // The nonzero count round-trips untouched.
    assert_eq!(registry.get(ConversationId(1)).unwrap().unread_count, 4);
}

#[test]
fn peer_read_receipt_advances_monotonically_and_leaves_unread_alone() {
    let mut registry = registry_with(vec![summary(1, 3, 100)]);
    let receipt = |read_at: i64| ReadReceiptPayload {
        conversation_id: ConversationId(1),
        reader_id: PEER,
        read_at: at(read_at),
    };
    assert!(registry.apply_read_receipt(&receipt(200)));
    assert!(!registry.apply_read_receipt(&receipt(150)));
    let row = registry.get(ConversationId(1)).unwrap();
    assert_eq!(row.peer_last_read_at, Some(at(200)));
    assert_eq!(row.unread_count, 3);
}

#[test]
fn own_read_receipt_is_ignored() {
    let mut registry = registry_with(vec![summary(1, 3, 100)]);
    assert!(!registry.apply_read_receipt(&ReadReceiptPayload {
        conversation_id: ConversationId(1),
        reader_id: ME,
        read_at: at(200),
    }));
    assert_eq!(
        registry.get(ConversationId(1)).unwrap().peer_last_read_at,
        None
    );
}
