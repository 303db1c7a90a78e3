//! Actor lifecycle states
//!
//! TigerStyle: Explicit lifecycle states, checked transitions.

use std::fmt;

/// Actor lifecycle state
///
/// State transitions:
/// ```text
///   +------------+     +--------------+     +-------+
///   | NotStarted | --> | Initializing | --> | Ready |
///   +------------+     +--------------+     +-------+
///         |                   |                 |
///         |                   v                 |
///         |            +------------+           |
///         +----------> | Terminated | <---------+
///                      +------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Spawned or created, no start handshake processed yet
    #[default]
    NotStarted,
    /// Running the behavior's initialization routine
    Initializing,
    /// Initialized and processing messages
    Ready,
    /// Stopped; channels are closed
    Terminated,
}

impl LifecycleState {
    /// Check if the actor processes non-lifecycle messages
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Ready)
    }

    /// Check if valid transition per the state machine
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        match (self, next) {
            (LifecycleState::NotStarted, LifecycleState::Initializing) => true,
            (LifecycleState::Initializing, LifecycleState::Ready) => true,
            // Any live state may stop
            (LifecycleState::NotStarted, LifecycleState::Terminated) => true,
            (LifecycleState::Initializing, LifecycleState::Terminated) => true,
            (LifecycleState::Ready, LifecycleState::Terminated) => true,
            _ if *self == next => true,
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::NotStarted => write!(f, "not_started"),
            LifecycleState::Initializing => write!(f, "initializing"),
            LifecycleState::Ready => write!(f, "ready"),
            LifecycleState::Terminated => write!(f, "terminated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(LifecycleState::NotStarted.can_transition_to(LifecycleState::Initializing));
        assert!(LifecycleState::Initializing.can_transition_to(LifecycleState::Ready));
        assert!(LifecycleState::Initializing.can_transition_to(LifecycleState::Terminated));
        assert!(LifecycleState::Ready.can_transition_to(LifecycleState::Terminated));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!LifecycleState::Ready.can_transition_to(LifecycleState::Initializing));
        assert!(!LifecycleState::Terminated.can_transition_to(LifecycleState::Ready));
        assert!(!LifecycleState::NotStarted.can_transition_to(LifecycleState::Ready));
    }

    #[test]
    fn test_display() {
        assert_eq!(LifecycleState::Ready.to_string(), "ready");
        assert_eq!(LifecycleState::default(), LifecycleState::NotStarted);
    }
}
