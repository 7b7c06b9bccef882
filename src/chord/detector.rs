//! Left Shift + Space chord detection
//!
//! Runs on the tap thread only. Every key event of a tap session passes
//! through `ChordDetector::handle`; trigger-key presses produce a `Decision`,
//! everything else is forwarded untouched.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::SettingsHandle;
use crate::hotkey::{KeyEvent, TappedEvent, TRACKED_MODIFIER, TRIGGER_KEY};
use crate::switch::SwitchAction;

/// Outcome of evaluating one trigger-key press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The input source was switched; the keystroke must be swallowed
    Switched,
    /// Swallow the keystroke without switching
    ConsumeOnly,
    /// Forward the keystroke unmodified
    Ignore,
}

impl Decision {
    /// Whether the underlying OS event should be dropped
    pub fn suppresses(self) -> bool {
        !matches!(self, Decision::Ignore)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Switched => write!(f, "switched"),
            Decision::ConsumeOnly => write!(f, "consume-only"),
            Decision::Ignore => write!(f, "ignore"),
        }
    }
}

/// Modifier-hold state of one tap session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChordState {
    /// Left Shift is currently held
    pub modifier_held: bool,
    /// A switch already fired during the current hold
    pub triggered_during_current_hold: bool,
    /// Timestamp of the last successful switch in this session
    pub last_trigger: Option<Duration>,
}

/// Detects the chord and decides what happens to each trigger press
pub struct ChordDetector {
    state: ChordState,
    settings: SettingsHandle,
}

impl ChordDetector {
    /// Create a detector reading debounce settings from `settings`
    pub fn new(settings: SettingsHandle) -> Self {
        Self {
            state: ChordState::default(),
            settings,
        }
    }

    /// Current chord state
    pub fn state(&self) -> ChordState {
        self.state
    }

    /// Forget everything; called whenever the tap (re)starts or stops
    pub fn reset(&mut self) {
        self.state = ChordState::default();
    }

    /// Feed one event through the detector
    ///
    /// Returns `None` for events that carry no decision (modifiers, other
    /// keys, synthetic events, tap notices) and must simply be forwarded.
    pub fn handle<A>(&mut self, tapped: &TappedEvent, action: &mut A) -> Option<Decision>
    where
        A: SwitchAction + ?Sized,
    {
        if tapped.is_synthetic() {
            trace!(event = ?tapped.event, "skipping synthetic event");
            return None;
        }

        match tapped.event {
            KeyEvent::ModifierChanged { key, pressed } => {
                if key == TRACKED_MODIFIER {
                    self.track_modifier(pressed);
                }
                None
            }
            KeyEvent::KeyDown {
                key,
                is_autorepeat,
                timestamp,
            } if key == TRIGGER_KEY => Some(self.evaluate_trigger(is_autorepeat, timestamp, action)),
            KeyEvent::KeyDown { .. } | KeyEvent::TapDisabled { .. } => None,
        }
    }

    fn track_modifier(&mut self, pressed: bool) {
        if pressed == self.state.modifier_held {
            return;
        }
        self.state.modifier_held = pressed;
        if !pressed {
            self.state.triggered_during_current_hold = false;
        }
        trace!(pressed, "tracked modifier changed");
    }

    fn evaluate_trigger<A>(&mut self, is_autorepeat: bool, timestamp: Duration, action: &mut A) -> Decision
    where
        A: SwitchAction + ?Sized,
    {
        if !self.state.modifier_held {
            return Decision::Ignore;
        }

        // Holding Space must never re-fire the switch.
        if is_autorepeat {
            return Decision::ConsumeOnly;
        }

        if self.settings.debounce().should_suppress(&self.state, timestamp) {
            debug!(?timestamp, last = ?self.state.last_trigger, "trigger debounced");
            return Decision::ConsumeOnly;
        }

        let decision = action.perform();
        if decision == Decision::Switched {
            self.state.last_trigger = Some(timestamp);
            self.state.triggered_during_current_hold = true;
        }
        debug!(%decision, ?timestamp, "chord evaluated");
        decision
    }
}
