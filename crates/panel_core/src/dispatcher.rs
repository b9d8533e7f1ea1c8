//! Outbound commands: optimistic feedback text, delivery, and failure
//! classification. Local key state is never rolled back on failure; the next
//! status poll corrects it.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::{domain::IgnitionState, protocol::ControlRequest};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    key::{KeyTransition, TransitionCause},
    transport::DeviceTransport,
};

pub const COMMUNICATION_ERROR: &str = "Communication error";

/// Transient headline shown right after a command is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFeedback {
    pub text: String,
    pub expires_at: Instant,
}

impl PendingFeedback {
    pub fn new(text: impl Into<String>, now: Instant, window: Duration) -> Self {
        Self {
            text: text.into(),
            expires_at: now + window,
        }
    }

    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Transient banner for a failed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientAlert {
    pub message: String,
    pub expires_at: Instant,
}

impl TransientAlert {
    pub fn new(message: impl Into<String>, now: Instant, window: Duration) -> Self {
        Self {
            message: message.into(),
            expires_at: now + window,
        }
    }

    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    Rejected(String),
    TransportFailed(String),
}

impl DispatchOutcome {
    /// Banner text for the user, if the command did not go through.
    pub fn alert_message(&self) -> Option<String> {
        match self {
            Self::Accepted => None,
            Self::Rejected(message) => Some(format!("Command failed: {message}")),
            Self::TransportFailed(_) => Some(COMMUNICATION_ERROR.to_string()),
        }
    }
}

pub fn feedback_text(request: &ControlRequest) -> &'static str {
    match request {
        ControlRequest::KeyPosition { position } => {
            match IgnitionState::from_key_position(*position) {
                IgnitionState::Off => "SHUTTING DOWN...",
                IgnitionState::On => "POWERING ON...",
                IgnitionState::Glow => "GLOW PLUGS HEATING...",
                IgnitionState::Start => "STARTING...",
            }
        }
        ControlRequest::KeyStartHold { held: true } => "STARTING...",
        ControlRequest::KeyStartHold { held: false } => "RELEASING START...",
        ControlRequest::EmergencyStop => "EMERGENCY STOP!",
        ControlRequest::Lights => "TOGGLING LIGHTS...",
        ControlRequest::Horn => "HORN ACTIVATED",
        ControlRequest::ToggleSleepMode => "TOGGLING SLEEP MODE...",
        ControlRequest::SleepNow => "ENTERING SLEEP...",
    }
}

/// Commands a local key transition has to send. Remote and forced
/// transitions send nothing.
pub fn commands_for(transition: &KeyTransition) -> Vec<ControlRequest> {
    if !transition.cause.is_local() {
        return Vec::new();
    }

    match transition.hold {
        Some(true) => vec![ControlRequest::KeyStartHold { held: true }],
        Some(false) if transition.cause == TransitionCause::SpringBack => {
            vec![ControlRequest::KeyStartHold { held: false }]
        }
        Some(false) => vec![
            ControlRequest::KeyStartHold { held: false },
            ControlRequest::KeyPosition {
                position: transition.to.key_position(),
            },
        ],
        None => vec![ControlRequest::KeyPosition {
            position: transition.to.key_position(),
        }],
    }
}

pub struct CommandDispatcher {
    transport: Arc<dyn DeviceTransport>,
    sent: AtomicU64,
}

impl CommandDispatcher {
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Self {
        Self {
            transport,
            sent: AtomicU64::new(0),
        }
    }

    /// Number of commands handed to the transport so far.
    pub fn commands_sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    pub async fn deliver(&self, request: ControlRequest) -> DispatchOutcome {
        self.sent.fetch_add(1, Ordering::SeqCst);
        let action = request.action();
        match self.transport.send_command(&request).await {
            Ok(response) if response.success => {
                info!(action, "command accepted");
                DispatchOutcome::Accepted
            }
            Ok(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "no reason given".to_string());
                warn!(action, %message, "command rejected by device");
                DispatchOutcome::Rejected(message)
            }
            Err(err) => {
                error!(action, %err, "command delivery failed");
                DispatchOutcome::TransportFailed(err.to_string())
            }
        }
    }
}
