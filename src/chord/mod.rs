//! Chord detection for left Shift + Space
//!
//! - `detector`: per-event state machine producing a `Decision`
//! - `debounce`: repeat-trigger suppression policy

mod debounce;
mod detector;

pub use debounce::{DebounceConfig, DEFAULT_MIN_INTERVAL};
pub use detector::{ChordDetector, ChordState, Decision};
