//! Input source switching
//!
//! The chord detector only knows the `SwitchAction` trait; `GatedSwitch`
//! implements it on top of a platform `InputSwitcher`.

mod action;
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
mod input_source;
#[cfg(target_os = "macos")]
mod macos;
mod method;

pub use action::{GatedSwitch, InputSwitcher, SwitchAction, SwitchGate};
#[cfg(target_os = "macos")]
pub use macos::{current_symbol, switch_available, MacInputSwitcher};
pub use method::SwitchMethod;

/// Symbol of the currently selected input source
#[cfg(not(target_os = "macos"))]
pub fn current_symbol() -> &'static str {
    input_source::UNKNOWN_SYMBOL
}

/// Whether both sides of the English/Korean pair are enabled right now
#[cfg(not(target_os = "macos"))]
pub fn switch_available() -> bool {
    false
}
