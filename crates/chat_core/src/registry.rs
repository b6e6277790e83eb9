use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, PeerSummary, UserId},
    protocol::{ConversationSummary, MessagePayload, ReadReceiptPayload},
};

const PREVIEW_MAX_CHARS: usize = 120;

/// One row of the conversation list.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub conversation_id: ConversationId,
    pub other_user: PeerSummary,
    pub last_message_preview: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
    /// Latest point up to which the remote party has read this conversation.
    pub peer_last_read_at: Option<DateTime<Utc>>,
}

/// Result of applying an inbound message to the list.
#[derive(Debug, Clone, Copy)]
pub struct ApplyOutcome {
    /// The conversation id was unknown and a minimal entry was fabricated;
    /// the caller should schedule a metadata refresh for it.
    pub fabricated: bool,
}

/// Ordered conversation list for the current user. Exclusively owned by the
/// client's event loop; external readers receive snapshots.
#[derive(Debug)]
pub struct ConversationRegistry {
    own_user: UserId,
    conversations: HashMap<ConversationId, Conversation>,
    active: Option<ConversationId>,
    pending_metadata: HashSet<ConversationId>,
}

impl ConversationRegistry {
    pub fn new(own_user: UserId) -> Self {
        Self {
            own_user,
            conversations: HashMap::new(),
            active: None,
            pending_metadata: HashSet::new(),
        }
    }

    /// Replaces the list with the authoritative one from the query API, both
    /// for initial hydration and for reconnect resync. Speculative entries
    /// the server does not corroborate are dropped; the active selection is
    /// preserved when still present. Peer read marks survive for ids that
    /// persist, since summaries do not carry them.
    pub fn resync(&mut self, authoritative: Vec<ConversationSummary>) {
        let mut next: HashMap<ConversationId, Conversation> = authoritative
            .into_iter()
            .map(|summary| {
                (
                    summary.conversation_id,
                    Conversation {
                        conversation_id: summary.conversation_id,
                        other_user: summary.other_user,
                        last_message_preview: summary.last_message_preview,
                        last_message_at: summary.last_message_at,
                        unread_count: summary.unread_count,
                        peer_last_read_at: None,
                    },
                )
            })
            .collect();
        for (id, conversation) in next.iter_mut() {
            conversation.peer_last_read_at = self
                .conversations
                .get(id)
                .and_then(|previous| previous.peer_last_read_at);
        }
        self.conversations = next;
        if let Some(active) = self.active {
            if !self.conversations.contains_key(&active) {
                self.active = None;
            }
        }
        self.pending_metadata
            .retain(|id| !self.conversations.contains_key(id));
    }

    /// Conversations ordered by recency, newest first; ties broken by id so
    /// the ordering is stable.
    pub fn list(&self) -> Vec<Conversation> {
        let mut rows: Vec<Conversation> = self.conversations.values().cloned().collect();
        rows.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then(a.conversation_id.cmp(&b.conversation_id))
        });
        rows
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.conversations.get(&conversation_id)
    }

    pub fn active(&self) -> Option<ConversationId> {
        self.active
    }

    /// Marks a conversation active and optimistically zeroes its unread
    /// count. Returns the previous count so the caller can restore it if the
    /// server rejects the read receipt. `None` for unknown ids.
    pub fn select(&mut self, conversation_id: ConversationId) -> Option<u32> {
        let conversation = self.conversations.get_mut(&conversation_id)?;
        self.active = Some(conversation_id);
        let previous = conversation.unread_count;
        conversation.unread_count = 0;
        Some(previous)
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    pub fn restore_unread(&mut self, conversation_id: ConversationId, unread_count: u32) {
        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            conversation.unread_count = unread_count;
        }
    }

    /// Applies one inbound message: preview and recency always move forward;
    /// unread grows by one unless the conversation is the active selection
    /// (then it is immediately considered read) or the message is our own
    /// echo. Unknown conversation ids get a minimal fabricated entry.
    pub fn apply_message(&mut self, message: &MessagePayload) -> ApplyOutcome {
        let fabricated = !self.conversations.contains_key(&message.conversation_id);
        let conversation = self
            .conversations
            .entry(message.conversation_id)
            .or_insert_with(|| Conversation {
                conversation_id: message.conversation_id,
                other_user: PeerSummary {
                    user_id: message.sender_id,
                    display_name: String::new(),
                    avatar_url: None,
                },
                last_message_preview: String::new(),
                last_message_at: message.sent_at,
                unread_count: 0,
                peer_last_read_at: None,
            });
        if fabricated {
            self.pending_metadata.insert(message.conversation_id);
        }

        conversation.last_message_preview = preview_of(&message.body);
        conversation.last_message_at = message.sent_at;
        let own_echo = message.sender_id == self.own_user;
        if !own_echo && self.active != Some(message.conversation_id) {
            conversation.unread_count += 1;
        }

        ApplyOutcome { fabricated }
    }

    /// A read receipt from the remote party never touches our unread count;
    /// it only records how far the peer has read.
    pub fn apply_read_receipt(&mut self, receipt: &ReadReceiptPayload) -> bool {
        if receipt.reader_id == self.own_user {
            return false;
        }
        let Some(conversation) = self.conversations.get_mut(&receipt.conversation_id) else {
            return false;
        };
        if conversation
            .peer_last_read_at
            .is_some_and(|known| known >= receipt.read_at)
        {
            return false;
        }
        conversation.peer_last_read_at = Some(receipt.read_at);
        true
    }

    /// Repairs a fabricated entry once its authoritative summary arrives.
    /// Live preview/unread state is kept; only the peer identity is filled.
    pub fn apply_metadata(&mut self, summary: ConversationSummary) {
        if let Some(conversation) = self.conversations.get_mut(&summary.conversation_id) {
            conversation.other_user = summary.other_user;
        }
        self.pending_metadata.remove(&summary.conversation_id);
    }
}

fn preview_of(body: &str) -> String {
    if body.chars().count() <= PREVIEW_MAX_CHARS {
        return body.to_string();
    }
    body.chars().take(PREVIEW_MAX_CHARS).collect()
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
