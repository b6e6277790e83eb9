use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, MessageId, TempId, UserId},
    protocol::{MessagePayload, ReadReceiptPayload},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Pending,
    Sent,
    Failed,
}

/// One transcript entry. A locally staged message starts with only a temp id
/// and `Pending` delivery; reconciliation fills in the server id in place.
/// `Sent` is terminal for delivery; only `read_at` may change afterwards.
#[derive(Debug, Clone)]
pub struct Message {
    pub server_id: Option<MessageId>,
    pub temp_id: Option<TempId>,
    pub sender_id: UserId,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub delivery: Delivery,
    pub read_at: Option<DateTime<Utc>>,
}

/// Copy of a staged message, carrying exactly what the outbound frame needs.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub temp_id: TempId,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// Transcript of one conversation. Exclusively owns its message collection;
/// the client event loop is the only mutator. Closing a session keeps the
/// transcript in memory so reopening within the app lifetime is cheap.
#[derive(Debug)]
pub struct ChatSession {
    conversation_id: ConversationId,
    own_user: UserId,
    transcript: Vec<Message>,
}

impl ChatSession {
    pub fn new(conversation_id: ConversationId, own_user: UserId) -> Self {
        Self {
            conversation_id,
            own_user,
            transcript: Vec::new(),
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    /// Replaces the transcript with server history. Local messages that are
    /// still pending or failed survive unless the history corroborates them
    /// by temp id (the server saw them while we were away). The peer's
    /// confirmed read point is reapplied to our own messages so a reload
    /// never drops read markers.
    pub fn load(&mut self, history: Vec<MessagePayload>, peer_read_at: Option<DateTime<Utc>>) {
        let retained: Vec<Message> = self
            .transcript
            .drain(..)
            .filter(|message| {
                message.delivery != Delivery::Sent
                    && !message.temp_id.as_ref().is_some_and(|temp_id| {
                        history
                            .iter()
                            .any(|entry| entry.temp_id.as_ref() == Some(temp_id))
                    })
            })
            .collect();
        self.transcript = history
            .iter()
            .filter(|entry| entry.conversation_id == self.conversation_id)
            .map(|entry| Message {
                server_id: entry.message_id,
                temp_id: entry.temp_id.clone(),
                sender_id: entry.sender_id,
                body: entry.body.clone(),
                sent_at: entry.sent_at,
                delivery: Delivery::Sent,
                read_at: peer_read_at
                    .filter(|mark| entry.sender_id == self.own_user && entry.sent_at <= *mark),
            })
            .collect();
        self.transcript.extend(retained);
    }

    /// Appends an optimistic pending message and returns a copy for building
    /// the outbound frame.
    pub fn stage_send(&mut self, body: String) -> OutboundMessage {
        let temp_id = TempId::generate();
        let sent_at = Utc::now();
        self.transcript.push(Message {
            server_id: None,
            temp_id: Some(temp_id.clone()),
            sender_id: self.own_user,
            body: body.clone(),
            sent_at,
            delivery: Delivery::Pending,
            read_at: None,
        });
        OutboundMessage {
            temp_id,
            body,
            sent_at,
        }
    }

    /// Applies one inbound message in arrival order. An echo of our own send
    /// (matching temp id) reconciles the optimistic entry in place, updating
    /// the slot's id and state rather than appending a second entry.
    /// Duplicate server ids are dropped.
    pub fn apply_inbound(&mut self, payload: &MessagePayload) -> bool {
        if payload.conversation_id != self.conversation_id {
            return false;
        }

        if payload.sender_id == self.own_user {
            if let Some(temp_id) = &payload.temp_id {
                if let Some(slot) = self
                    .transcript
                    .iter_mut()
                    .find(|message| message.temp_id.as_ref() == Some(temp_id))
                {
                    slot.server_id = payload.message_id;
                    slot.sent_at = payload.sent_at;
                    slot.delivery = Delivery::Sent;
                    return true;
                }
            }
        }

        if let Some(message_id) = payload.message_id {
            if self
                .transcript
                .iter()
                .any(|message| message.server_id == Some(message_id))
            {
                return false;
            }
        }

        self.transcript.push(Message {
            server_id: payload.message_id,
            temp_id: payload.temp_id.clone(),
            sender_id: payload.sender_id,
            body: payload.body.clone(),
            sent_at: payload.sent_at,
            delivery: Delivery::Sent,
            read_at: None,
        });
        true
    }

    /// Marks a still-pending message failed (send error or ack timeout).
    /// Returns false when the message was already acknowledged or failed.
    pub fn mark_failed(&mut self, temp_id: &TempId) -> bool {
        match self
            .transcript
            .iter_mut()
            .find(|message| message.temp_id.as_ref() == Some(temp_id))
        {
            Some(message) if message.delivery == Delivery::Pending => {
                message.delivery = Delivery::Failed;
                true
            }
            _ => false,
        }
    }

    /// Re-arms a failed message for another send attempt and returns a copy
    /// for the outbound frame. Resending is always user-driven.
    pub fn prepare_retry(&mut self, temp_id: &TempId) -> Option<OutboundMessage> {
        let message = self
            .transcript
            .iter_mut()
            .find(|message| message.temp_id.as_ref() == Some(temp_id))?;
        if message.delivery != Delivery::Failed {
            return None;
        }
        message.delivery = Delivery::Pending;
        message.sent_at = Utc::now();
        Some(OutboundMessage {
            temp_id: temp_id.clone(),
            body: message.body.clone(),
            sent_at: message.sent_at,
        })
    }

    /// A receipt from the remote party marks our delivered messages up to
    /// its read point.
    pub fn apply_read_receipt(&mut self, receipt: &ReadReceiptPayload) -> bool {
        if receipt.conversation_id != self.conversation_id
            || receipt.reader_id == self.own_user
        {
            return false;
        }
        let mut changed = false;
        for message in &mut self.transcript {
            if message.sender_id == self.own_user
                && message.read_at.is_none()
                && message.sent_at <= receipt.read_at
            {
                message.read_at = Some(receipt.read_at);
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
