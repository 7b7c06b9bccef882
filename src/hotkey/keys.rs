//! Key codes and typed keyboard events
//!
//! The OS adapter translates raw tap callbacks into these values; the chord
//! detector and the tap manager only ever see `TappedEvent`.

use std::fmt;
use std::time::Duration;

/// macOS virtual key codes relevant to the chord
pub mod codes {
    /// Space bar, the trigger key
    pub const SPACE: u16 = 49;
    /// Left Shift, the tracked modifier
    pub const LEFT_SHIFT: u16 = 56;
    /// Right Shift (never tracked)
    pub const RIGHT_SHIFT: u16 = 60;
    /// Caps Lock, synthesized by the CapsLock switch method
    pub const CAPS_LOCK: u16 = 57;
    /// Left Option, synthesized by the shortcut switch method
    pub const OPTION: u16 = 58;
}

/// Key that fires the switch while the modifier is held
pub const TRIGGER_KEY: u16 = codes::SPACE;

/// Modifier whose hold state arms the trigger
pub const TRACKED_MODIFIER: u16 = codes::LEFT_SHIFT;

/// Source user-data stamped on every event this daemon posts ('SHF')
pub const SYNTHETIC_EVENT_TAG: i64 = 0x5353_4846;

/// Why the OS suspended the event tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// The callback took too long
    Timeout,
    /// Secure input or a user action disabled the tap
    UserInput,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendReason::Timeout => write!(f, "timeout"),
            SuspendReason::UserInput => write!(f, "user input"),
        }
    }
}

/// A keyboard event as delivered by the tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    /// A modifier key went down or up
    ModifierChanged {
        /// Virtual key code of the modifier
        key: u16,
        /// Whether the modifier is now held
        pressed: bool,
    },
    /// A regular key went down
    KeyDown {
        /// Virtual key code
        key: u16,
        /// The OS generated this press by holding the key
        is_autorepeat: bool,
        /// Monotonic time of the event
        timestamp: Duration,
    },
    /// The OS stopped delivering events to the tap
    TapDisabled {
        /// What caused the suspension
        reason: SuspendReason,
    },
}

impl KeyEvent {
    /// Key-down stamped with the OS event time (nanoseconds since boot)
    ///
    /// The OS time is used rather than the time the callback runs, so events
    /// queued behind a slow callback keep their real spacing.
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    pub fn key_down(key: u16, is_autorepeat: bool, event_time_ns: u64) -> Self {
        KeyEvent::KeyDown {
            key,
            is_autorepeat,
            timestamp: Duration::from_nanos(event_time_ns),
        }
    }
}

/// A key event together with the source tag the OS attached to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TappedEvent {
    pub event: KeyEvent,
    pub source_tag: i64,
}

impl TappedEvent {
    /// An event coming straight from hardware (no source tag)
    pub fn hardware(event: KeyEvent) -> Self {
        Self {
            event,
            source_tag: 0,
        }
    }

    /// An event this daemon posted itself
    #[cfg(test)]
    pub fn synthetic(event: KeyEvent) -> Self {
        Self {
            event,
            source_tag: SYNTHETIC_EVENT_TAG,
        }
    }

    /// Check whether the event carries our own source tag
    pub fn is_synthetic(&self) -> bool {
        self.source_tag == SYNTHETIC_EVENT_TAG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_event_is_not_synthetic() {
        let event = TappedEvent::hardware(KeyEvent::KeyDown {
            key: codes::SPACE,
            is_autorepeat: false,
            timestamp: Duration::ZERO,
        });
        assert!(!event.is_synthetic());
    }

    #[test]
    fn test_tagged_event_is_synthetic() {
        let event = TappedEvent::synthetic(KeyEvent::ModifierChanged {
            key: codes::OPTION,
            pressed: true,
        });
        assert!(event.is_synthetic());
    }

    #[test]
    fn test_foreign_tag_is_not_ours() {
        let event = TappedEvent {
            event: KeyEvent::TapDisabled {
                reason: SuspendReason::Timeout,
            },
            source_tag: 0x1234,
        };
        assert!(!event.is_synthetic());
    }

    #[test]
    fn test_key_down_keeps_os_spacing() {
        let first = KeyEvent::key_down(codes::SPACE, false, 5_000_000_000);
        let second = KeyEvent::key_down(codes::SPACE, false, 5_120_000_000);

        let (
            KeyEvent::KeyDown { timestamp: a, .. },
            KeyEvent::KeyDown { timestamp: b, .. },
        ) = (first, second)
        else {
            panic!("expected key-down events");
        };
        assert_eq!(b - a, Duration::from_millis(120));
    }

    #[test]
    fn test_suspend_reason_display() {
        assert_eq!(SuspendReason::Timeout.to_string(), "timeout");
        assert_eq!(SuspendReason::UserInput.to_string(), "user input");
    }
}
