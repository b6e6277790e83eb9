use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, PresenceStatus, TempId, UserId},
    protocol::ClientFrame,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    api::ConversationApi,
    connection::{ChannelEvent, ConnectionManager, ConnectionSnapshot},
    error::{ConnectError, SendError},
    presence::PresenceTracker,
    registry::{Conversation, ConversationRegistry},
    session::{ChatSession, Message},
    status::{StatusPresenter, StatusView},
    transport::Transport,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub reconnect: crate::connection::ReconnectPolicy,
    /// A pending optimistic send is marked failed if no acknowledgment
    /// arrives within this window.
    pub ack_timeout: Duration,
    /// Resync retries back off independently of the connection state machine.
    pub resync_retry_base: Duration,
    pub resync_retry_cap: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect: crate::connection::ReconnectPolicy::default(),
            ack_timeout: Duration::from_secs(10),
            resync_retry_base: Duration::from_secs(1),
            resync_retry_cap: Duration::from_secs(30),
        }
    }
}

/// Change notifications for UI observers. Observers read fresh snapshots
/// through the client's accessors; events only say what moved.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Connection(ConnectionSnapshot),
    Presence {
        user_id: UserId,
    },
    Conversations,
    Transcript {
        conversation_id: ConversationId,
    },
    Typing {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    Error(String),
}

struct ClientState {
    presence: PresenceTracker,
    registry: ConversationRegistry,
    // Transcripts are kept across close/reopen for the app lifetime; only
    // the registry's active selection receives live events.
    sessions: HashMap<ConversationId, ChatSession>,
    // Bumped whenever the active session changes so in-flight transcript
    // fetches whose context has been superseded are discarded on completion.
    session_generation: u64,
}

/// Session root: owns one instance of every component, runs the single
/// event-consumer loop, and is injected into dependents explicitly. Created
/// on login, torn down via `shutdown`.
pub struct ChatClient {
    own_user: UserId,
    connection: Arc<ConnectionManager>,
    api: Arc<dyn ConversationApi>,
    config: ClientConfig,
    state: Mutex<ClientState>,
    changes: broadcast::Sender<ChangeEvent>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    resync_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    pub fn new(
        own_user: UserId,
        transport: Arc<dyn Transport>,
        api: Arc<dyn ConversationApi>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let connection = ConnectionManager::new(transport, config.reconnect.clone());
        let (changes, _) = broadcast::channel(1024);
        Arc::new(Self {
            own_user,
            connection,
            api,
            config,
            state: Mutex::new(ClientState {
                presence: PresenceTracker::new(),
                registry: ConversationRegistry::new(own_user),
                sessions: HashMap::new(),
                session_generation: 0,
            }),
            changes,
            consumer: Mutex::new(None),
            resync_task: Mutex::new(None),
        })
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    pub async fn connection_snapshot(&self) -> ConnectionSnapshot {
        self.connection.snapshot().await
    }

    pub async fn status(&self) -> StatusView {
        StatusPresenter::view(&self.connection.snapshot().await)
    }

    /// Establishes the live channel. The consumer loop subscribes before the
    /// first connect attempt so no events are missed; hydration happens when
    /// the channel comes up.
    pub async fn connect(self: &Arc<Self>, auth_token: &str) -> Result<(), ConnectError> {
        {
            let mut consumer = self.consumer.lock().await;
            if consumer.is_none() {
                let rx = self.connection.subscribe();
                *consumer = Some(tokio::spawn(Arc::clone(self).run_consumer(rx)));
            }
        }
        self.connection.connect(auth_token).await
    }

    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
        if let Some(task) = self.resync_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.consumer.lock().await.take() {
            task.abort();
        }
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().await.registry.list()
    }

    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.state.lock().await.registry.active()
    }

    pub async fn transcript(&self, conversation_id: ConversationId) -> Option<Vec<Message>> {
        self.state
            .lock()
            .await
            .sessions
            .get(&conversation_id)
            .map(|session| session.transcript().to_vec())
    }

    pub async fn presence_status(&self, user_id: UserId) -> PresenceStatus {
        self.state.lock().await.presence.status(user_id)
    }

    /// Last-seen timestamp, suppressed unless the user is offline.
    pub async fn displayable_last_seen(&self, user_id: UserId) -> Option<DateTime<Utc>> {
        self.state.lock().await.presence.displayable_last_seen(user_id)
    }

    /// Marks a conversation active: zeroes its unread count optimistically,
    /// issues the read receipt over the channel, then loads the transcript.
    /// A load completing after the selection moved on is discarded.
    pub async fn select_conversation(
        self: &Arc<Self>,
        conversation_id: ConversationId,
    ) -> Result<()> {
        let (previous_unread, generation) = {
            let mut state = self.state.lock().await;
            let Some(previous_unread) = state.registry.select(conversation_id) else {
                bail!("unknown conversation {}", conversation_id.0);
            };
            state.session_generation += 1;
            state
                .sessions
                .entry(conversation_id)
                .or_insert_with(|| ChatSession::new(conversation_id, self.own_user));
            (previous_unread, state.session_generation)
        };
        self.emit(ChangeEvent::Conversations);

        let receipt = ClientFrame::MarkRead {
            conversation_id,
            read_at: Utc::now(),
        };
        if let Err(err) = self.connection.send(receipt).await {
            {
                let mut state = self.state.lock().await;
                state.registry.restore_unread(conversation_id, previous_unread);
            }
            self.emit(ChangeEvent::Conversations);
            self.emit(ChangeEvent::Error(format!(
                "read receipt for conversation {} was not accepted: {err}",
                conversation_id.0
            )));
        }

        match self.api.fetch_transcript(conversation_id).await {
            Ok(history) => {
                let applied = {
                    let mut state = self.state.lock().await;
                    let current = state.session_generation == generation
                        && state.registry.active() == Some(conversation_id);
                    if current {
                        let peer_read_at = state
                            .registry
                            .get(conversation_id)
                            .and_then(|conversation| conversation.peer_last_read_at);
                        if let Some(session) = state.sessions.get_mut(&conversation_id) {
                            session.load(history, peer_read_at);
                        }
                    }
                    current
                };
                if applied {
                    self.emit(ChangeEvent::Transcript { conversation_id });
                }
                // A stale load is discarded silently; the selection moved on.
            }
            Err(err) => {
                // Keep whatever transcript we already have rather than blank it.
                warn!(conversation_id = conversation_id.0, error = %err, "transcript load failed");
                self.emit(ChangeEvent::Error(format!(
                    "could not load conversation {}: {err}",
                    conversation_id.0
                )));
            }
        }
        Ok(())
    }

    /// Detaches the active session synchronously. The transcript stays in
    /// memory; no further live events reach it until reselected.
    pub async fn close_conversation(&self) {
        let mut state = self.state.lock().await;
        state.session_generation += 1;
        state.registry.clear_active();
    }

    /// Optimistic send: the message appears in the transcript immediately as
    /// pending and is reconciled by the server echo carrying its temp id.
    pub async fn send_message(self: &Arc<Self>, body: &str) -> Result<TempId, SendError> {
        let (frame, temp_id, conversation_id) = {
            let mut state = self.state.lock().await;
            let Some(conversation_id) = state.registry.active() else {
                return Err(SendError::NoActiveConversation);
            };
            let session = state
                .sessions
                .entry(conversation_id)
                .or_insert_with(|| ChatSession::new(conversation_id, self.own_user));
            let staged = session.stage_send(body.to_string());
            (
                ClientFrame::SendMessage {
                    conversation_id,
                    temp_id: staged.temp_id.clone(),
                    body: staged.body,
                    sent_at: staged.sent_at,
                },
                staged.temp_id,
                conversation_id,
            )
        };
        self.emit(ChangeEvent::Transcript { conversation_id });
        self.dispatch_send(conversation_id, temp_id.clone(), frame)
            .await?;
        Ok(temp_id)
    }

    /// User-driven retry of a failed message. Never automatic.
    pub async fn retry_message(self: &Arc<Self>, temp_id: &TempId) -> Result<(), SendError> {
        let (frame, conversation_id) = {
            let mut state = self.state.lock().await;
            let Some(conversation_id) = state.registry.active() else {
                return Err(SendError::NoActiveConversation);
            };
            let Some(session) = state.sessions.get_mut(&conversation_id) else {
                return Err(SendError::NoActiveConversation);
            };
            let Some(staged) = session.prepare_retry(temp_id) else {
                return Err(SendError::NothingToRetry(temp_id.0.clone()));
            };
            (
                ClientFrame::SendMessage {
                    conversation_id,
                    temp_id: staged.temp_id,
                    body: staged.body,
                    sent_at: staged.sent_at,
                },
                conversation_id,
            )
        };
        self.emit(ChangeEvent::Transcript { conversation_id });
        self.dispatch_send(conversation_id, temp_id.clone(), frame)
            .await
    }

    pub async fn send_typing(&self) -> Result<(), SendError> {
        let conversation_id = {
            let state = self.state.lock().await;
            state
                .registry
                .active()
                .ok_or(SendError::NoActiveConversation)?
        };
        self.connection
            .send(ClientFrame::Typing { conversation_id })
            .await
    }

    async fn dispatch_send(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        temp_id: TempId,
        frame: ClientFrame,
    ) -> Result<(), SendError> {
        match self.connection.send(frame).await {
            Ok(()) => {
                self.spawn_ack_timeout(conversation_id, temp_id);
                Ok(())
            }
            Err(err) => {
                {
                    let mut state = self.state.lock().await;
                    if let Some(session) = state.sessions.get_mut(&conversation_id) {
                        session.mark_failed(&temp_id);
                    }
                }
                self.emit(ChangeEvent::Transcript { conversation_id });
                Err(err)
            }
        }
    }

    fn spawn_ack_timeout(self: &Arc<Self>, conversation_id: ConversationId, temp_id: TempId) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(client.config.ack_timeout).await;
            let timed_out = {
                let mut state = client.state.lock().await;
                state
                    .sessions
                    .get_mut(&conversation_id)
                    .map(|session| session.mark_failed(&temp_id))
                    .unwrap_or(false)
            };
            if timed_out {
                warn!(
                    conversation_id = conversation_id.0,
                    temp_id = %temp_id.0,
                    "send was never acknowledged; marking failed"
                );
                client.emit(ChangeEvent::Transcript { conversation_id });
            }
        });
    }

    /// Single logical event consumer: inbound channel events are applied in
    /// arrival order, one at a time. Handlers stay short and non-blocking;
    /// resync fetches run in their own task.
    async fn run_consumer(self: Arc<Self>, mut rx: broadcast::Receiver<ChannelEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.apply_channel_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event consumer lagged; forcing resync");
                    self.schedule_resync().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn apply_channel_event(self: &Arc<Self>, event: ChannelEvent) {
        match event {
            ChannelEvent::StateChanged(snapshot) => {
                self.emit(ChangeEvent::Connection(snapshot));
            }
            ChannelEvent::Up { resumed } => {
                info!(resumed, "live channel up");
                self.schedule_resync().await;
            }
            ChannelEvent::Down { reason } => {
                warn!(%reason, "live channel down");
            }
            ChannelEvent::Message(message) => {
                let (outcome, transcript_changed) = {
                    let mut state = self.state.lock().await;
                    let outcome = state.registry.apply_message(&message);
                    let transcript_changed =
                        if state.registry.active() == Some(message.conversation_id) {
                            state
                                .sessions
                                .get_mut(&message.conversation_id)
                                .map(|session| session.apply_inbound(&message))
                                .unwrap_or(false)
                        } else {
                            false
                        };
                    (outcome, transcript_changed)
                };
                self.emit(ChangeEvent::Conversations);
                if transcript_changed {
                    self.emit(ChangeEvent::Transcript {
                        conversation_id: message.conversation_id,
                    });
                }
                if outcome.fabricated {
                    self.spawn_metadata_refresh(message.conversation_id);
                }
            }
            ChannelEvent::Presence(presence) => {
                let changed = {
                    let mut state = self.state.lock().await;
                    state.presence.apply(&presence)
                };
                if changed {
                    self.emit(ChangeEvent::Presence {
                        user_id: presence.user_id,
                    });
                }
            }
            ChannelEvent::ReadReceipt(receipt) => {
                let (list_changed, transcript_changed) = {
                    let mut state = self.state.lock().await;
                    let list_changed = state.registry.apply_read_receipt(&receipt);
                    let transcript_changed = state
                        .sessions
                        .get_mut(&receipt.conversation_id)
                        .map(|session| session.apply_read_receipt(&receipt))
                        .unwrap_or(false);
                    (list_changed, transcript_changed)
                };
                if list_changed {
                    self.emit(ChangeEvent::Conversations);
                }
                if transcript_changed {
                    self.emit(ChangeEvent::Transcript {
                        conversation_id: receipt.conversation_id,
                    });
                }
            }
            ChannelEvent::Typing(typing) => {
                self.emit(ChangeEvent::Typing {
                    conversation_id: typing.conversation_id,
                    user_id: typing.user_id,
                });
            }
        }
    }

    async fn schedule_resync(self: &Arc<Self>) {
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move { client.run_resync().await });
        let mut slot = self.resync_task.lock().await;
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Full re-fetch of authoritative state after a connection gap (and for
    /// initial hydration). Failures retry on their own backoff while the
    /// existing, possibly stale, data stays visible.
    async fn run_resync(self: Arc<Self>) {
        let mut delay = self.config.resync_retry_base;
        loop {
            match self.api.list_conversations().await {
                Ok(authoritative) => {
                    let active = {
                        let mut state = self.state.lock().await;
                        state.registry.resync(authoritative);
                        state.registry.active()
                    };
                    self.emit(ChangeEvent::Conversations);
                    if let Some(conversation_id) = active {
                        self.refresh_active_transcript(conversation_id).await;
                    }
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "conversation resync failed; retrying");
                    self.emit(ChangeEvent::Error(format!(
                        "conversation resync failed: {err}"
                    )));
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2).min(self.config.resync_retry_cap);
                }
            }
        }
    }

    async fn refresh_active_transcript(self: &Arc<Self>, conversation_id: ConversationId) {
        let generation = self.state.lock().await.session_generation;
        match self.api.fetch_transcript(conversation_id).await {
            Ok(history) => {
                let applied = {
                    let mut state = self.state.lock().await;
                    let current = state.session_generation == generation
                        && state.registry.active() == Some(conversation_id);
                    if current {
                        let peer_read_at = state
                            .registry
                            .get(conversation_id)
                            .and_then(|conversation| conversation.peer_last_read_at);
                        if let Some(session) = state.sessions.get_mut(&conversation_id) {
                            session.load(history, peer_read_at);
                        }
                    }
                    current
                };
                if applied {
                    self.emit(ChangeEvent::Transcript { conversation_id });
                }
            }
            Err(err) => {
                warn!(conversation_id = conversation_id.0, error = %err, "transcript resync failed");
            }
        }
    }

    fn spawn_metadata_refresh(self: &Arc<Self>, conversation_id: ConversationId) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            match client.api.fetch_conversation(conversation_id).await {
                Ok(summary) => {
                    {
                        let mut state = client.state.lock().await;
                        state.registry.apply_metadata(summary);
                    }
                    client.emit(ChangeEvent::Conversations);
                }
                Err(err) => {
                    warn!(conversation_id = conversation_id.0, error = %err, "conversation metadata refresh failed");
                }
            }
        });
    }

    fn emit(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
