use std::time::Instant;

use crate::connection::{ConnectionSnapshot, ConnectionState};

/// User-facing connection status line. Derived data only; no business logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub connected: bool,
    pub countdown_secs: Option<u64>,
    pub label: String,
}

pub struct StatusPresenter;

impl StatusPresenter {
    pub fn view(snapshot: &ConnectionSnapshot) -> StatusView {
        match snapshot.state {
            ConnectionState::Connected => StatusView {
                connected: true,
                countdown_secs: None,
                label: "Connected".to_string(),
            },
            ConnectionState::Reconnecting { .. } => {
                let secs = snapshot
                    .next_attempt_at
                    .map(|at| at.saturating_duration_since(Instant::now()))
                    .map(|remaining| remaining.as_secs_f64().ceil() as u64)
                    .unwrap_or(0);
                StatusView {
                    connected: false,
                    countdown_secs: Some(secs),
                    label: format!("Connection lost. Reconnecting in {secs}s"),
                }
            }
            ConnectionState::Connecting => StatusView {
                connected: false,
                countdown_secs: None,
                label: "Connecting".to_string(),
            },
            ConnectionState::Idle => StatusView {
                connected: false,
                countdown_secs: None,
                label: "Offline".to_string(),
            },
            ConnectionState::Disconnected => StatusView {
                connected: false,
                countdown_secs: None,
                label: "Disconnected".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn snapshot(state: ConnectionState, next_attempt_at: Option<Instant>) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state,
            last_error: None,
            next_attempt_at,
        }
    }

    #[test]
    fn connected_label() {
        let view = StatusPresenter::view(&snapshot(ConnectionState::Connected, None));
        assert!(view.connected);
        assert_eq!(view.countdown_secs, None);
        assert_eq!(view.label, "Connected");
    }

    #[test]
    fn reconnecting_shows_rounded_up_countdown() {
        let at = Instant::now() + Duration::from_millis(2900);
        let view = StatusPresenter::view(&snapshot(
            ConnectionState::Reconnecting { attempt: 2 },
            Some(at),
        ));
        assert!(!view.connected);
        assert_eq!(view.countdown_secs, Some(3));
        assert_eq!(view.label, "Connection lost. Reconnecting in 3s");
    }

    #[test]
    fn terminal_disconnect_is_not_counting_down() {
        let view = StatusPresenter::view(&snapshot(ConnectionState::Disconnected, None));
        assert!(!view.connected);
        assert_eq!(view.countdown_secs, None);
        assert_eq!(view.label, "Disconnected");
    }
}
