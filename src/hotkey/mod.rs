//! Keyboard event interception
//!
//! Key codes and the platform-neutral event model, the CGEventTap adapter
//! and the dedicated thread that owns it.

mod keys;
mod listener;
#[cfg(target_os = "macos")]
mod macos;

pub use keys::{
    codes, KeyEvent, SuspendReason, TappedEvent, SYNTHETIC_EVENT_TAG, TRACKED_MODIFIER,
    TRIGGER_KEY,
};
pub use listener::{HotkeyListener, TapCommand, TapController};
