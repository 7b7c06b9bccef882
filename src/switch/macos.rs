//! Text Input Source and synthetic-keystroke backend for macOS

use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{CFType, CFTypeRef, TCFType};
use core_foundation::boolean::{CFBoolean, CFBooleanRef};
use core_foundation::dictionary::CFDictionaryRef;
use core_foundation::string::{CFString, CFStringRef};
use core_graphics::event::{CGEvent, CGEventFlags, CGEventTapLocation, EventField};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use tracing::{debug, warn};

use crate::hotkey::{codes, SYNTHETIC_EVENT_TAG};
use crate::permissions;

use super::action::InputSwitcher;
use super::input_source::{symbol_for, toggle_target, SourcePair};
use super::method::SwitchMethod;

type TISInputSourceRef = CFTypeRef;

#[link(name = "Carbon", kind = "framework")]
extern "C" {
    fn TISCreateInputSourceList(
        properties: CFDictionaryRef,
        include_all_installed: u8,
    ) -> CFArrayRef;
    fn TISCopyCurrentKeyboardInputSource() -> TISInputSourceRef;
    fn TISGetInputSourceProperty(source: TISInputSourceRef, key: CFStringRef) -> CFTypeRef;
    fn TISSelectInputSource(source: TISInputSourceRef) -> i32;

    static kTISPropertyInputSourceID: CFStringRef;
    static kTISPropertyInputSourceIsEnabled: CFStringRef;
}

/// Switches between the enabled English and Korean input sources
pub struct MacInputSwitcher {
    pair: SourcePair<CFType>,
}

impl MacInputSwitcher {
    pub fn new() -> Self {
        Self {
            pair: enabled_pair(),
        }
    }

    fn select_opposite(&self) -> bool {
        let Some(current) = current_source_id() else {
            return false;
        };
        let Some(language) = toggle_target(&current) else {
            debug!(current, "current input source outside the pair, not switching");
            return false;
        };
        let Some(target) = self.pair.get(language) else {
            return false;
        };

        let status = unsafe { TISSelectInputSource(target.as_CFTypeRef()) };
        if status != 0 {
            warn!(status, "TISSelectInputSource failed");
        }
        status == 0
    }
}

impl Default for MacInputSwitcher {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSwitcher for MacInputSwitcher {
    /// Re-reads the enabled sources on every call; `toggle` relies on it
    fn has_supported_pair(&mut self) -> bool {
        self.pair = enabled_pair();
        self.pair.is_complete()
    }

    fn toggle(&mut self, method: SwitchMethod) -> bool {
        if !self.pair.is_complete() {
            return false;
        }
        match method {
            SwitchMethod::CapsLock => post_caps_lock(),
            SwitchMethod::TisToggle => self.select_opposite(),
            SwitchMethod::Shortcut => post_shortcut(),
        }
    }

    fn current_symbol(&self) -> &'static str {
        current_symbol()
    }

    fn accessibility_trusted(&self) -> bool {
        permissions::accessibility_trusted()
    }
}

/// Symbol of the currently selected input source
pub fn current_symbol() -> &'static str {
    symbol_for(current_source_id().as_deref())
}

/// Whether both sides of the English/Korean pair are enabled right now
pub fn switch_available() -> bool {
    enabled_pair().is_complete()
}

fn enabled_pair() -> SourcePair<CFType> {
    let list = unsafe { TISCreateInputSourceList(std::ptr::null(), 0) };
    if list.is_null() {
        warn!("TISCreateInputSourceList returned null");
        return SourcePair::default();
    }
    let list: CFArray<CFType> = unsafe { CFArray::wrap_under_create_rule(list) };

    let pair = SourcePair::collect(list.iter().filter_map(|source| {
        if !source_enabled(&source) {
            return None;
        }
        source_id(&source).map(|id| (id, CFType::clone(&source)))
    }));
    debug!(complete = pair.is_complete(), "input sources refreshed");
    pair
}

fn source_id(source: &CFType) -> Option<String> {
    let value = unsafe { TISGetInputSourceProperty(source.as_CFTypeRef(), kTISPropertyInputSourceID) };
    if value.is_null() {
        return None;
    }
    let id = unsafe { CFString::wrap_under_get_rule(value as CFStringRef) };
    Some(id.to_string())
}

fn source_enabled(source: &CFType) -> bool {
    let value = unsafe {
        TISGetInputSourceProperty(source.as_CFTypeRef(), kTISPropertyInputSourceIsEnabled)
    };
    if value.is_null() {
        return false;
    }
    let flag = unsafe { CFBoolean::wrap_under_get_rule(value as CFBooleanRef) };
    bool::from(flag)
}

fn current_source_id() -> Option<String> {
    let current = unsafe { TISCopyCurrentKeyboardInputSource() };
    if current.is_null() {
        return None;
    }
    let current = unsafe { CFType::wrap_under_create_rule(current) };
    source_id(&current)
}

/// Post one keyboard event tagged as ours so the tap lets it through
fn post_key(keycode: u16, key_down: bool, flags: CGEventFlags) -> bool {
    let Ok(source) = CGEventSource::new(CGEventSourceStateID::HIDSystemState) else {
        warn!("failed to create event source");
        return false;
    };
    let Ok(event) = CGEvent::new_keyboard_event(source, keycode, key_down) else {
        warn!(keycode, "failed to create keyboard event");
        return false;
    };
    event.set_flags(flags);
    event.set_integer_value_field(EventField::EVENT_SOURCE_USER_DATA, SYNTHETIC_EVENT_TAG);
    event.post(CGEventTapLocation::HID);
    true
}

fn post_caps_lock() -> bool {
    post_key(codes::CAPS_LOCK, true, CGEventFlags::empty())
}

/// Option+Space, the default "select previous input source" shortcut
fn post_shortcut() -> bool {
    let option = CGEventFlags::CGEventFlagAlternate;
    post_key(codes::OPTION, true, option)
        && post_key(codes::SPACE, true, option)
        && post_key(codes::SPACE, false, option)
        && post_key(codes::OPTION, false, CGEventFlags::empty())
}
