//! Merging polled device status into local state.
//!
//! Polls may overlap on a slow link, so every request takes a ticket from a
//! monotonic counter and a response is applied only if its ticket is newer
//! than the last one applied. Failures go through the same check, so a late
//! timeout can't flag an error over a fresher success.

use chrono::{DateTime, Utc};
use shared::{domain::IgnitionState, protocol::DeviceStatus};

use crate::{
    display::DisplayState,
    error::TransportError,
    key::{KeyStateMachine, KeyTransition},
};

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Applied {
        transition: Option<KeyTransition>,
        /// The poll cleared a previous connection error.
        restored: bool,
    },
    Failed {
        /// First failure after a success (or since start).
        first: bool,
        error: String,
    },
    /// Superseded by a newer response, or arrived while demo mode owned the
    /// display.
    Stale,
}

#[derive(Debug, Default)]
pub struct ReconciliationLoop {
    issued: u64,
    applied: u64,
}

impl ReconciliationLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticket for a poll about to be sent.
    pub fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    pub fn last_applied(&self) -> u64 {
        self.applied
    }

    /// Marks every ticket issued so far as stale.
    pub fn invalidate(&mut self) {
        self.applied = self.issued;
    }

    pub fn apply(
        &mut self,
        ticket: u64,
        result: Result<DeviceStatus, TransportError>,
        key: &mut KeyStateMachine,
        display: &mut DisplayState,
        received_at: DateTime<Utc>,
    ) -> PollOutcome {
        if ticket <= self.applied {
            return PollOutcome::Stale;
        }
        self.applied = ticket;

        match result {
            Ok(status) => {
                let transition = status
                    .key_position
                    .map(IgnitionState::from_key_position)
                    .and_then(|state| key.apply_remote(state));
                let restored = display.connection_error;

                display.status = Some(status);
                display.received_at = Some(received_at);
                display.connection_error = false;
                display.consecutive_failures = 0;
                display.feedback = None;

                PollOutcome::Applied {
                    transition,
                    restored,
                }
            }
            Err(err) => {
                display.connection_error = true;
                display.consecutive_failures += 1;
                PollOutcome::Failed {
                    first: display.consecutive_failures == 1,
                    error: err.to_string(),
                }
            }
        }
    }
}
