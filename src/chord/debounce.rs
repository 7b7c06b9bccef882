//! Repeat-trigger suppression for the chord detector

use std::time::Duration;

use super::detector::ChordState;

/// Default minimum gap between two switches in multi-tap mode
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(90);

/// How repeated trigger presses are throttled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Allow several switches during one hold, spaced by `minimum_interval`
    pub multi_tap_enabled: bool,
    /// Minimum gap between switches in multi-tap mode
    pub minimum_interval: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            multi_tap_enabled: true,
            minimum_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl DebounceConfig {
    /// Whether a trigger press at `now` must be swallowed without running the action
    ///
    /// In multi-tap mode only the time window matters; otherwise a single
    /// switch per physical hold is allowed.
    pub fn should_suppress(&self, state: &ChordState, now: Duration) -> bool {
        if self.multi_tap_enabled {
            match state.last_trigger {
                Some(last) => now.saturating_sub(last) < self.minimum_interval,
                None => false,
            }
        } else {
            state.triggered_during_current_hold
        }
    }
}
