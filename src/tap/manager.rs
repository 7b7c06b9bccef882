//! Tap lifecycle: Stopped, Running, SuspendedRecovering
//!
//! The manager owns the OS port, the chord detector and the switch action.
//! All of its methods run on the tap thread.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::chord::{ChordDetector, ChordState, Decision};
use crate::config::SettingsHandle;
use crate::hotkey::{KeyEvent, SuspendReason, TappedEvent};
use crate::switch::SwitchAction;

/// Lifecycle state of the event tap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TapState {
    /// No OS resource held
    #[default]
    Stopped,
    /// Intercepting events
    Running,
    /// The OS suspended the tap and a re-enable is in progress
    SuspendedRecovering,
}

impl fmt::Display for TapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TapState::Stopped => write!(f, "Stopped"),
            TapState::Running => write!(f, "Running"),
            TapState::SuspendedRecovering => write!(f, "SuspendedRecovering"),
        }
    }
}

/// Whether the tap may swallow keystrokes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TapMode {
    /// Swallow the trigger key when the decision says so
    #[default]
    Consume,
    /// Detect and switch, but forward every event
    ListenOnly,
}

/// What the OS adapter does with the event it is holding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Suppress,
}

/// Errors that can occur while acquiring the tap
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TapError {
    #[error("failed to install event tap - check Input Monitoring permission")]
    InstallationFailed,

    #[error("keyboard event taps are not supported on this platform")]
    Unsupported,
}

/// OS interception resource
pub trait TapPort {
    /// Create and enable the tap for modifier-change and key-down events
    fn install(&mut self, mode: TapMode) -> Result<(), TapError>;

    /// Re-enable after an OS suspension; true when the OS reports it enabled
    fn reenable(&mut self) -> bool;

    /// Release the resource; best effort and safe to call repeatedly
    fn release(&mut self);
}

/// Observer of tap lifecycle and decisions
///
/// Implementations must not block: they are called from the tap callback.
pub trait TapListener {
    /// Called once per state transition with the new enabled flag
    fn tap_state_changed(&self, enabled: bool);

    /// The tap could not be installed or did not survive a suspension
    fn installation_failed(&self);

    /// A trigger-key press was evaluated
    fn decided(&self, decision: Decision);
}

/// Something that turns tapped events into verdicts
pub trait EventSink {
    fn handle_event(&mut self, tapped: TappedEvent) -> Verdict;
}

/// Owns the tap and routes its events through the chord detector
pub struct TapManager<P, A, L> {
    port: P,
    action: A,
    listener: L,
    detector: ChordDetector,
    mode: TapMode,
    state: TapState,
}

impl<P, A, L> TapManager<P, A, L>
where
    P: TapPort,
    A: SwitchAction,
    L: TapListener,
{
    /// Create a stopped manager
    pub fn new(port: P, action: A, listener: L, settings: SettingsHandle) -> Self {
        Self {
            port,
            action,
            listener,
            detector: ChordDetector::new(settings),
            mode: TapMode::default(),
            state: TapState::Stopped,
        }
    }

    /// Get the current state
    pub fn state(&self) -> TapState {
        self.state
    }

    /// Current mode of the installed (or last installed) tap
    pub fn mode(&self) -> TapMode {
        self.mode
    }

    /// Chord state of the current session
    pub fn chord_state(&self) -> ChordState {
        self.detector.state()
    }

    /// Install the tap, restarting it when already active
    ///
    /// An installation failure is reported to the listener and returned;
    /// there is no retry.
    pub fn start(&mut self, mode: TapMode) -> Result<(), TapError> {
        if self.state != TapState::Stopped {
            debug!(state = %self.state, "restarting active tap");
            self.stop();
        }

        self.detector.reset();
        match self.port.install(mode) {
            Ok(()) => {
                self.mode = mode;
                self.transition(TapState::Running);
                Ok(())
            }
            Err(TapError::InstallationFailed) => {
                error!("failed to install event tap - is Input Monitoring permission granted?");
                self.listener.installation_failed();
                Err(TapError::InstallationFailed)
            }
            Err(e) => {
                warn!(error = %e, "event tap unavailable");
                Err(e)
            }
        }
    }

    /// Release the tap; safe to call at any time
    pub fn stop(&mut self) {
        self.detector.reset();
        if self.state == TapState::Stopped {
            return;
        }
        self.port.release();
        self.transition(TapState::Stopped);
    }

    /// Evaluate one event from the OS
    pub fn handle_event(&mut self, tapped: TappedEvent) -> Verdict {
        if let KeyEvent::TapDisabled { reason } = tapped.event {
            self.recover(reason);
            return Verdict::Forward;
        }

        if self.state != TapState::Running {
            return Verdict::Forward;
        }

        let Some(decision) = self.detector.handle(&tapped, &mut self.action) else {
            return Verdict::Forward;
        };

        // Plain Space without the modifier is ordinary typing.
        if decision.suppresses() || self.detector.state().modifier_held {
            self.listener.decided(decision);
        }
        if decision.suppresses() && self.mode == TapMode::Consume {
            Verdict::Suppress
        } else {
            Verdict::Forward
        }
    }

    /// One re-enable attempt after an OS suspension
    fn recover(&mut self, reason: SuspendReason) {
        if self.state != TapState::Running {
            debug!(%reason, state = %self.state, "ignoring suspension notice");
            return;
        }

        warn!(%reason, "event tap disabled by the OS, re-enabling");
        self.transition(TapState::SuspendedRecovering);
        self.detector.reset();

        if self.port.reenable() {
            self.transition(TapState::Running);
            return;
        }

        // A revoked permission looks exactly like a timeout from here.
        error!(%reason, "event tap did not come back after suspension");
        self.port.release();
        self.transition(TapState::Stopped);
        self.listener.installation_failed();
    }

    fn transition(&mut self, next: TapState) {
        if next == self.state {
            return;
        }
        info!(from = %self.state, to = %next, "tap state transition");
        self.state = next;
        self.listener.tap_state_changed(next == TapState::Running);
    }
}

impl<P, A, L> EventSink for TapManager<P, A, L>
where
    P: TapPort,
    A: SwitchAction,
    L: TapListener,
{
    fn handle_event(&mut self, tapped: TappedEvent) -> Verdict {
        TapManager::handle_event(self, tapped)
    }
}
