use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::StreamExt;
use shared::protocol::{
    ClientFrame, MessagePayload, PresencePayload, ReadReceiptPayload, ServerEvent, TypingPayload,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    error::{ConnectError, ConnectFailure, SendError},
    transport::{EventStream, FrameSink, Transport, TransportChannel},
};

/// Bounded exponential backoff for automatic reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay scheduled before the given attempt (1-based): base doubled per
    /// attempt, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Terminal: automatic retries exhausted or authentication rejected.
    /// Requires an explicit `connect` call to resume.
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    /// When the next automatic reconnect attempt fires, if one is scheduled.
    pub next_attempt_at: Option<Instant>,
}

impl ConnectionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn reconnect_attempt(&self) -> u32 {
        match self.state {
            ConnectionState::Reconnecting { attempt } => attempt,
            _ => 0,
        }
    }
}

/// Typed event stream delivered to subscribers. `Up { resumed: true }`
/// follows a channel loss and obliges consumers to resync authoritative
/// state; the channel itself is not assumed gap-free.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    StateChanged(ConnectionSnapshot),
    Up { resumed: bool },
    Down { reason: String },
    Message(MessagePayload),
    Presence(PresencePayload),
    ReadReceipt(ReadReceiptPayload),
    Typing(TypingPayload),
}

/// Owns the single live channel to the messaging server and the
/// reconnect/backoff state machine. All other components observe it through
/// the subscribed event stream or `send`; the channel handle never escapes.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    inner: Mutex<ConnectionInner>,
    events: broadcast::Sender<ChannelEvent>,
}

struct ConnectionInner {
    state: ConnectionState,
    last_error: Option<String>,
    next_attempt_at: Option<Instant>,
    auth_token: Option<String>,
    // The sink carries its own lock; outbound writes await on it without
    // holding the state lock.
    sink: Option<Arc<Mutex<Box<dyn FrameSink>>>>,
    driver: Option<JoinHandle<()>>,
    // Bumped on every connect/disconnect so a superseded driver task can
    // tell its results are no longer relevant and discard them.
    generation: u64,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            transport,
            policy,
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Idle,
                last_error: None,
                next_attempt_at: None,
                auth_token: None,
                sink: None,
                driver: None,
                generation: 0,
            }),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.inner.lock().await;
        ConnectionSnapshot {
            state: inner.state,
            last_error: inner.last_error.clone(),
            next_attempt_at: inner.next_attempt_at,
        }
    }

    /// Establishes the channel. A network-level failure does not error; it
    /// enters the reconnect cycle. An explicit authentication rejection is
    /// terminal and returned to the caller.
    pub async fn connect(self: &Arc<Self>, auth_token: &str) -> Result<(), ConnectError> {
        // Recreate the connection on every explicit connect (new auth token).
        self.disconnect().await;

        let generation = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.auth_token = Some(auth_token.to_string());
            inner.last_error = None;
            inner.next_attempt_at = None;
            self.transition(&mut inner, ConnectionState::Connecting);
            inner.generation
        };

        match self.transport.connect(auth_token).await {
            Ok(TransportChannel { sink, events }) => {
                {
                    let mut inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return Ok(());
                    }
                    inner.sink = Some(Arc::new(Mutex::new(sink)));
                    self.transition(&mut inner, ConnectionState::Connected);
                    let driver = tokio::spawn(Arc::clone(self).drive(generation, Some(events)));
                    if let Some(previous) = inner.driver.replace(driver) {
                        previous.abort();
                    }
                }
                let _ = self.events.send(ChannelEvent::Up { resumed: false });
                Ok(())
            }
            Err(ConnectFailure::AuthRejected(reason)) => {
                let mut inner = self.inner.lock().await;
                if inner.generation == generation {
                    inner.last_error = Some(reason.clone());
                    inner.auth_token = None;
                    self.transition(&mut inner, ConnectionState::Disconnected);
                }
                Err(ConnectError::AuthRejected { reason })
            }
            Err(ConnectFailure::Transport(err)) => {
                warn!(error = %err, "initial connect failed; entering reconnect cycle");
                let mut inner = self.inner.lock().await;
                if inner.generation == generation {
                    inner.last_error = Some(err.to_string());
                    let driver = tokio::spawn(Arc::clone(self).drive(generation, None));
                    if let Some(previous) = inner.driver.replace(driver) {
                        previous.abort();
                    }
                }
                Ok(())
            }
        }
    }

    /// Scoped teardown: releases the channel and cancels any pending
    /// reconnect timer. Idempotent.
    pub async fn disconnect(&self) {
        let driver = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.sink = None;
            inner.auth_token = None;
            inner.last_error = None;
            inner.next_attempt_at = None;
            let driver = inner.driver.take();
            if inner.state != ConnectionState::Idle {
                self.transition(&mut inner, ConnectionState::Idle);
            }
            driver
        };
        if let Some(driver) = driver {
            driver.abort();
        }
    }

    /// Queues an outbound frame. Fails immediately when the channel is not
    /// connected; nothing is buffered across disconnects.
    pub async fn send(&self, frame: ClientFrame) -> Result<(), SendError> {
        let sink = {
            let inner = self.inner.lock().await;
            if inner.state != ConnectionState::Connected {
                return Err(SendError::NotConnected);
            }
            inner.sink.clone().ok_or(SendError::NotConnected)?
        };
        let mut sink = sink.lock().await;
        sink.send(frame).await.map_err(SendError::Transport)
    }

    fn transition(&self, inner: &mut ConnectionInner, state: ConnectionState) {
        inner.state = state;
        let _ = self
            .events
            .send(ChannelEvent::StateChanged(ConnectionSnapshot {
                state,
                last_error: inner.last_error.clone(),
                next_attempt_at: inner.next_attempt_at,
            }));
    }

    /// Driver task: pumps inbound events while the channel is up and runs the
    /// bounded reconnect loop after each loss. One task per `connect`; the
    /// backoff timer inside it is the only reconnect timer and is cancelled
    /// with the task.
    async fn drive(self: Arc<Self>, generation: u64, mut current: Option<EventStream>) {
        loop {
            let events = match current.take() {
                Some(events) => events,
                None => match self.reconnect(generation).await {
                    Some(events) => events,
                    None => return,
                },
            };

            let reason = self.pump(events).await;
            {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return;
                }
                inner.sink = None;
                inner.last_error = Some(reason.clone());
            }
            warn!(%reason, "live channel lost");
            let _ = self.events.send(ChannelEvent::Down { reason });
        }
    }

    async fn pump(&self, mut events: EventStream) -> String {
        loop {
            match events.next().await {
                Some(Ok(event)) => self.forward(event),
                Some(Err(err)) => return err.to_string(),
                None => return "channel closed by server".to_string(),
            }
        }
    }

    fn forward(&self, event: ServerEvent) {
        let mapped = match event {
            ServerEvent::MessageReceived { message } => ChannelEvent::Message(message),
            ServerEvent::PresenceUpdated { presence } => ChannelEvent::Presence(presence),
            ServerEvent::ReadReceipt { receipt } => ChannelEvent::ReadReceipt(receipt),
            ServerEvent::Typing { typing } => ChannelEvent::Typing(typing),
            ServerEvent::Error(err) => {
                warn!(code = ?err.code, message = %err.message, "server reported channel error");
                return;
            }
        };
        let _ = self.events.send(mapped);
    }

    /// Bounded reconnect loop. Returns the new event stream on success, or
    /// `None` once terminal (attempts exhausted, auth rejected, superseded).
    async fn reconnect(self: &Arc<Self>, generation: u64) -> Option<EventStream> {
        let token = {
            let inner = self.inner.lock().await;
            if inner.generation != generation {
                return None;
            }
            inner.auth_token.clone()?
        };

        for attempt in 1..=self.policy.max_attempts {
            let delay = self.policy.delay_for(attempt);
            {
                let mut inner = self.inner.lock().await;
                if inner.generation != generation {
                    return None;
                }
                inner.next_attempt_at = Some(Instant::now() + delay);
                self.transition(&mut inner, ConnectionState::Reconnecting { attempt });
            }
            tokio::time::sleep(delay).await;

            match self.transport.connect(&token).await {
                Ok(TransportChannel { sink, events }) => {
                    let mut inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return None;
                    }
                    inner.sink = Some(Arc::new(Mutex::new(sink)));
                    inner.next_attempt_at = None;
                    inner.last_error = None;
                    self.transition(&mut inner, ConnectionState::Connected);
                    drop(inner);
                    info!(attempt, "reconnected to messaging server");
                    let _ = self.events.send(ChannelEvent::Up { resumed: true });
                    return Some(events);
                }
                Err(ConnectFailure::AuthRejected(reason)) => {
                    warn!(%reason, "reconnect rejected; giving up");
                    let mut inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return None;
                    }
                    inner.last_error = Some(reason.clone());
                    inner.next_attempt_at = None;
                    inner.auth_token = None;
                    self.transition(&mut inner, ConnectionState::Disconnected);
                    drop(inner);
                    let _ = self.events.send(ChannelEvent::Down { reason });
                    return None;
                }
                Err(ConnectFailure::Transport(err)) => {
                    warn!(attempt, error = %err, "reconnect attempt failed");
                    let mut inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return None;
                    }
                    inner.last_error = Some(err.to_string());
                }
            }
        }

        let reason = format!(
            "gave up after {} reconnect attempts",
            self.policy.max_attempts
        );
        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            return None;
        }
        inner.next_attempt_at = None;
        self.transition(&mut inner, ConnectionState::Disconnected);
        drop(inner);
        let _ = self.events.send(ChannelEvent::Down { reason });
        None
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
