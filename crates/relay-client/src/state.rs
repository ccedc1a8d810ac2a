//! Connection state machine.
//!
//! Pure transitions only: the driver in [`crate::client`] feeds events in
//! and performs the returned actions. Keeping the socket out of here makes
//! the reentrancy guard and the retry schedule testable without a server.

use std::fmt;
use std::time::Duration;

use crate::backoff::ReconnectPolicy;

/// Socket lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no attempt in flight.
    Disconnected,
    /// An open attempt is in flight.
    Connecting,
    /// The socket is open.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiStatus {
    /// Opening the socket.
    Connecting,
    /// Open, catch-up in progress.
    Syncing,
    /// Open and caught up.
    Idle,
    /// Waiting to retry.
    Disconnected,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// The client was started.
    Start,
    /// The application became visible again.
    VisibilityRegained,
    /// A scheduled reconnect delay elapsed.
    ReconnectDue,
    /// The socket opened.
    Opened,
    /// The socket closed or an open attempt failed.
    Closed,
}

/// Side effects requested by a transition, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open a new socket.
    Connect,
    /// Start the periodic `"ping"` sender.
    StartKeepalive,
    /// Stop the periodic `"ping"` sender.
    StopKeepalive,
    /// Send any queued push subscription.
    FlushPush,
    /// Send `sync` with the persisted watermark.
    Sync,
    /// Arm the reconnect timer.
    ScheduleReconnect(Duration),
}

/// Reconnect state machine.
#[derive(Debug, Clone)]
pub struct Reconnector {
    state: ConnectionState,
    policy: ReconnectPolicy,
}

impl Reconnector {
    /// Start disconnected with the given retry policy.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Failures since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.policy.attempts()
    }

    /// Status implied by the current state, before any catch-up progress.
    pub fn ui_status(&self) -> UiStatus {
        match self.state {
            ConnectionState::Disconnected => UiStatus::Disconnected,
            ConnectionState::Connecting => UiStatus::Connecting,
            ConnectionState::Connected => UiStatus::Syncing,
        }
    }

    /// Apply one event and return the actions to perform.
    pub fn handle(&mut self, event: ClientEvent) -> Vec<Action> {
        use ConnectionState::*;

        match (self.state, event) {
            (Disconnected, ClientEvent::Start | ClientEvent::VisibilityRegained) => {
                // Coming back to the foreground retries at once.
                self.policy.reset();
                self.state = Connecting;
                vec![Action::Connect]
            }
            (Disconnected, ClientEvent::ReconnectDue) => {
                self.state = Connecting;
                vec![Action::Connect]
            }
            (Connected, ClientEvent::VisibilityRegained) => vec![Action::Sync],
            (Connecting, ClientEvent::Opened) => {
                self.state = Connected;
                self.policy.reset();
                vec![Action::StartKeepalive, Action::FlushPush, Action::Sync]
            }
            (Connecting | Connected, ClientEvent::Closed) => {
                let was_connected = self.state == Connected;
                self.state = Disconnected;
                let delay = self.policy.next_delay();
                let mut actions = Vec::with_capacity(2);
                if was_connected {
                    actions.push(Action::StopKeepalive);
                }
                actions.push(Action::ScheduleReconnect(delay));
                actions
            }
            // An attempt is already in flight or the socket is up; a stale
            // timer or duplicate close changes nothing.
            _ => Vec::new(),
        }
    }
}
