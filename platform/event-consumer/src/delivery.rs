//! Per-message delivery state machine
//!
//! Every delivery moves through:
//!
//! ```text
//! Delivered -> Processing -> Acked        (terminal)
//!                         -> Retrying -> Delivered (after backoff)
//!                         -> DeadLettered (terminal)
//! ```
//!
//! No transition may skip `Processing`, and the terminal states accept no
//! further transitions.

use std::fmt;

/// State of a single message delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Handed to the consumer, not yet picked up by the handler
    Delivered,
    /// The handler is executing
    Processing,
    /// Acknowledged; removed from redelivery (terminal)
    Acked,
    /// Transient failure; waiting out the backoff delay
    Retrying,
    /// Routed to the dead-letter store (terminal)
    DeadLettered,
}

/// Rejected state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid delivery transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: DeliveryState,
    pub to: DeliveryState,
}

impl DeliveryState {
    /// Whether this state accepts no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Acked | DeliveryState::DeadLettered)
    }

    /// Attempt a transition, returning the new state if it is legal
    pub fn transition(self, to: DeliveryState) -> Result<DeliveryState, InvalidTransition> {
        use DeliveryState::*;

        let legal = matches!(
            (self, to),
            (Delivered, Processing)
                | (Processing, Acked)
                | (Processing, Retrying)
                | (Processing, DeadLettered)
                | (Retrying, Delivered)
        );

        if legal {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryState::Delivered => "delivered",
            DeliveryState::Processing => "processing",
            DeliveryState::Acked => "acked",
            DeliveryState::Retrying => "retrying",
            DeliveryState::DeadLettered => "dead_lettered",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::DeliveryState::*;

    #[test]
    fn test_happy_path_transitions() {
        let state = Delivered.transition(Processing).unwrap();
        let state = state.transition(Acked).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_retry_loop_returns_to_delivered() {
        let state = Delivered.transition(Processing).unwrap();
        let state = state.transition(Retrying).unwrap();
        let state = state.transition(Delivered).unwrap();
        let state = state.transition(Processing).unwrap();
        let state = state.transition(DeadLettered).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_cannot_skip_processing() {
        assert!(Delivered.transition(Acked).is_err());
        assert!(Delivered.transition(Retrying).is_err());
        assert!(Delivered.transition(DeadLettered).is_err());
        assert!(Retrying.transition(Acked).is_err());
        assert!(Retrying.transition(Processing).is_err());
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for to in [Delivered, Processing, Acked, Retrying, DeadLettered] {
            assert!(Acked.transition(to).is_err());
            assert!(DeadLettered.transition(to).is_err());
        }
    }
}
