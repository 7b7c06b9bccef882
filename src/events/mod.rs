//! Notifications published by the tap thread and its collaborators
//!
//! Everything user-visible (menu refresh, mini HUD, permission prompts) is
//! driven from these events on the async side, never from inside event
//! evaluation.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::chord::Decision;
use crate::tap::TapListener;

/// Permission a front end should ask the user for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Needed to install the keyboard tap
    InputMonitoring,
    /// Needed to post synthetic keystrokes
    Accessibility,
}

/// Events broadcast to the IPC server and other observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwitchEvent {
    /// The tap became active or inactive
    TapStateChanged {
        /// Whether events are being intercepted now
        enabled: bool,
    },

    /// The tap could not be installed or did not come back after suspension
    InstallationFailed,

    /// A trigger-key press was evaluated
    Decided {
        decision: Decision,
    },

    /// The input source changed (mini HUD)
    Switched {
        /// Symbol of the newly selected source
        symbol: String,
    },

    /// A permission is missing for the requested behaviour
    PermissionRequired {
        permission: Permission,
    },

    /// Secure input mode toggled
    SecureInputChanged {
        active: bool,
    },
}

impl std::fmt::Display for SwitchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchEvent::TapStateChanged { enabled } => {
                write!(f, "TAP_STATE_CHANGED ({})", if *enabled { "on" } else { "off" })
            }
            SwitchEvent::InstallationFailed => write!(f, "INSTALLATION_FAILED"),
            SwitchEvent::Decided { decision } => write!(f, "DECIDED ({})", decision),
            SwitchEvent::Switched { symbol } => write!(f, "SWITCHED ({})", symbol),
            SwitchEvent::PermissionRequired { permission } => {
                write!(f, "PERMISSION_REQUIRED ({:?})", permission)
            }
            SwitchEvent::SecureInputChanged { active } => {
                write!(f, "SECURE_INPUT_CHANGED ({})", active)
            }
        }
    }
}

/// `TapListener` that republishes tap notifications on the broadcast bus
///
/// `broadcast::Sender::send` never blocks, so this is safe to call from the
/// tap callback.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    event_tx: broadcast::Sender<SwitchEvent>,
}

impl EventNotifier {
    pub fn new(event_tx: broadcast::Sender<SwitchEvent>) -> Self {
        Self { event_tx }
    }

    fn publish(&self, event: SwitchEvent) {
        trace!(%event, "publishing");
        let _ = self.event_tx.send(event);
    }
}

impl TapListener for EventNotifier {
    fn tap_state_changed(&self, enabled: bool) {
        self.publish(SwitchEvent::TapStateChanged { enabled });
    }

    fn installation_failed(&self) {
        self.publish(SwitchEvent::InstallationFailed);
    }

    fn decided(&self, decision: Decision) {
        self.publish(SwitchEvent::Decided { decision });
    }
}
