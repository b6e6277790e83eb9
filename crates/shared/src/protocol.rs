use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ConversationId, MessageId, PeerSummary, PresenceStatus, TempId, UserId},
    error::ApiError,
};

/// One chat message as carried on the live channel or in transcript fetches.
///
/// A server-originated message carries `message_id`; an echo of a client send
/// additionally carries the client's `temp_id` so the sender can reconcile
/// its optimistic copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub conversation_id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<TempId>,
    pub sender_id: UserId,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceiptPayload {
    pub conversation_id: ConversationId,
    pub reader_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

/// Conversation summary as returned by the query API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub other_user: PeerSummary,
    pub last_message_preview: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
}

/// Frames the client pushes over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        conversation_id: ConversationId,
        temp_id: TempId,
        body: String,
        sent_at: DateTime<Utc>,
    },
    MarkRead {
        conversation_id: ConversationId,
        read_at: DateTime<Utc>,
    },
    Typing {
        conversation_id: ConversationId,
    },
}

/// Events the server pushes over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageReceived {
        message: MessagePayload,
    },
    PresenceUpdated {
        presence: PresencePayload,
    },
    ReadReceipt {
        receipt: ReadReceiptPayload,
    },
    Typing {
        typing: TypingPayload,
    },
    Error(ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_uses_tagged_wire_shape() {
        let event = ServerEvent::PresenceUpdated {
            presence: PresencePayload {
                user_id: UserId(7),
                status: PresenceStatus::Away,
                last_seen_at: None,
            },
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "presence_updated");
        assert_eq!(json["payload"]["presence"]["status"], "away");
    }

    #[test]
    fn message_payload_omits_absent_ids() {
        let payload = MessagePayload {
            conversation_id: ConversationId(3),
            message_id: None,
            temp_id: Some(TempId("t-1".into())),
            sender_id: UserId(2),
            body: "hi".into(),
            sent_at: Utc::now(),
        };
        let json = serde_json::to_value(&payload).expect("serialize");
        assert!(json.get("message_id").is_none());
        assert_eq!(json["temp_id"], "t-1");
    }
}
