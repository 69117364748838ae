//! Connection State Machine
//!
//! Defines the valid lifecycle of a single connection attempt.

/// Observable state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    /// `connect` accepted, worker starting
    ConnectRequested,
    /// Handshake completed
    HandshakeSucceeded,
    /// Handshake failed, timed out or was denied
    HandshakeFailed,
    /// Read or write error on a live session
    IoFailed,
    /// Peer closed its end
    PeerClosed,
    /// Closed locally (close, supersede or shutdown)
    Closed,
    /// Failed attempt cleaned up
    Reset,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(ConnectionState),
    /// Transition was invalid from current state
    Invalid { from: ConnectionState, event: LinkTransition },
}

/// State machine for one connection attempt
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    pub fn is_connected(&self) -> bool {
        self.current_state == ConnectionState::Connected
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkTransition) -> TransitionResult {
        match self.get_next_state(event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn get_next_state(&self, event: LinkTransition) -> Option<ConnectionState> {
        use ConnectionState::*;
        use LinkTransition::*;

        match (self.current_state, event) {
            (Disconnected, ConnectRequested) => Some(Connecting),

            (Connecting, HandshakeSucceeded) => Some(Connected),
            // A cancelled handshake is a failed attempt
            (Connecting, HandshakeFailed | Closed) => Some(Failed),

            (Connected, IoFailed | PeerClosed | Closed) => Some(Disconnected),

            (Failed, Reset) => Some(Disconnected),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = ConnectionStateMachine::new();
        assert_eq!(fsm.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_successful_session_flow() {
        let mut fsm = ConnectionStateMachine::new();

        let result = fsm.process_event(LinkTransition::ConnectRequested);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connecting));

        let result = fsm.process_event(LinkTransition::HandshakeSucceeded);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Connected));
        assert!(fsm.is_connected());

        let result = fsm.process_event(LinkTransition::PeerClosed);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Disconnected));
    }

    #[test]
    fn test_failed_handshake_resets() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(LinkTransition::ConnectRequested);

        let result = fsm.process_event(LinkTransition::HandshakeFailed);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Failed));

        let result = fsm.process_event(LinkTransition::Reset);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Disconnected));
    }

    #[test]
    fn test_close_during_handshake_fails_attempt() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(LinkTransition::ConnectRequested);

        let result = fsm.process_event(LinkTransition::Closed);
        assert_eq!(result, TransitionResult::Success(ConnectionState::Failed));
    }

    #[test]
    fn test_invalid_transition() {
        let mut fsm = ConnectionStateMachine::new();

        // Can't complete a handshake that was never started
        let result = fsm.process_event(LinkTransition::HandshakeSucceeded);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_terminal_after_disconnect() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.process_event(LinkTransition::ConnectRequested);
        fsm.process_event(LinkTransition::HandshakeSucceeded);
        fsm.process_event(LinkTransition::Closed);

        // A second close on a finished session is rejected
        let result = fsm.process_event(LinkTransition::Closed);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
    }
}
