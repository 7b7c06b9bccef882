//! CGEventTap adapter
//!
//! Translates raw tap callbacks into `TappedEvent` values, routes them
//! through the tap manager and applies the returned verdict.

use std::cell::RefCell;
use std::rc::Weak;

use core_foundation::base::TCFType;
use core_foundation::mach_port::CFMachPortRef;
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop, CFRunLoopSource};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventType, EventField,
};
use core_graphics::sys::CGEventRef;
use foreign_types::ForeignType;
use tracing::{debug, info, warn};

use crate::tap::{EventSink, TapError, TapMode, TapPort, Verdict};

use super::keys::{KeyEvent, SuspendReason, TappedEvent};

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapEnable(tap: CFMachPortRef, enable: bool);
    fn CGEventTapIsEnabled(tap: CFMachPortRef) -> bool;
    fn CGEventGetTimestamp(event: CGEventRef) -> u64;
}

struct ActiveTap {
    tap: CGEventTap<'static>,
    source: CFRunLoopSource,
    run_loop: CFRunLoop,
}

/// `TapPort` backed by a session-level CGEventTap on the current run loop
pub struct MacTapPort {
    sink: Weak<RefCell<dyn EventSink>>,
    active: Option<ActiveTap>,
    /// Released taps whose callback may still be on the stack
    retired: Vec<CGEventTap<'static>>,
}

impl MacTapPort {
    /// Create a port that feeds events to `sink`
    pub fn new(sink: Weak<RefCell<dyn EventSink>>) -> Self {
        Self {
            sink,
            active: None,
            retired: Vec::new(),
        }
    }
}

impl TapPort for MacTapPort {
    fn install(&mut self, mode: TapMode) -> Result<(), TapError> {
        self.release();
        self.retired.clear();

        let options = match mode {
            TapMode::Consume => CGEventTapOptions::Default,
            TapMode::ListenOnly => CGEventTapOptions::ListenOnly,
        };
        let sink = self.sink.clone();

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            options,
            vec![CGEventType::FlagsChanged, CGEventType::KeyDown],
            move |_proxy, event_type, event| dispatch(&sink, event_type, event),
        )
        .map_err(|_| TapError::InstallationFailed)?;

        let source = tap
            .mach_port
            .create_runloop_source(0)
            .map_err(|_| TapError::InstallationFailed)?;
        let run_loop = CFRunLoop::get_current();
        unsafe {
            run_loop.add_source(&source, kCFRunLoopCommonModes);
        }
        tap.enable();

        info!(?mode, "event tap created and enabled");
        self.active = Some(ActiveTap {
            tap,
            source,
            run_loop,
        });
        Ok(())
    }

    fn reenable(&mut self) -> bool {
        let Some(active) = &self.active else {
            return false;
        };
        let port = active.tap.mach_port.as_concrete_TypeRef();
        unsafe {
            CGEventTapEnable(port, true);
            CGEventTapIsEnabled(port)
        }
    }

    fn release(&mut self) {
        let Some(ActiveTap {
            tap,
            source,
            run_loop,
        }) = self.active.take()
        else {
            return;
        };

        let port = tap.mach_port.as_concrete_TypeRef();
        unsafe {
            CGEventTapEnable(port, false);
            run_loop.remove_source(&source, kCFRunLoopCommonModes);
        }
        if unsafe { CGEventTapIsEnabled(port) } {
            warn!("event tap still enabled after release");
        }

        // stop() may run inside this tap's own callback; dropping the tap
        // here would free the closure that is executing.
        self.retired.push(tap);
        debug!("event tap released");
    }
}

impl Drop for MacTapPort {
    fn drop(&mut self) {
        self.release();
    }
}

/// Tap callback body - must be fast and non-blocking
fn dispatch(
    sink: &Weak<RefCell<dyn EventSink>>,
    event_type: CGEventType,
    event: &CGEvent,
) -> Option<CGEvent> {
    let tapped = translate(event_type, event)?;

    let verdict = match sink.upgrade() {
        Some(target) => match target.try_borrow_mut() {
            Ok(mut target) => target.handle_event(tapped),
            Err(_) => {
                warn!("tap callback re-entered, forwarding event");
                Verdict::Forward
            }
        },
        None => Verdict::Forward,
    };

    if verdict == Verdict::Suppress {
        event.set_type(CGEventType::Null);
    }
    None
}

fn translate(event_type: CGEventType, event: &CGEvent) -> Option<TappedEvent> {
    let kind = match event_type {
        CGEventType::TapDisabledByTimeout => {
            return Some(TappedEvent::hardware(KeyEvent::TapDisabled {
                reason: SuspendReason::Timeout,
            }));
        }
        CGEventType::TapDisabledByUserInput => {
            return Some(TappedEvent::hardware(KeyEvent::TapDisabled {
                reason: SuspendReason::UserInput,
            }));
        }
        CGEventType::FlagsChanged => KeyEvent::ModifierChanged {
            key: keycode(event),
            pressed: event.get_flags().contains(CGEventFlags::CGEventFlagShift),
        },
        CGEventType::KeyDown => KeyEvent::key_down(
            keycode(event),
            event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0,
            unsafe { CGEventGetTimestamp(event.as_ptr()) },
        ),
        _ => return None,
    };

    Some(TappedEvent {
        event: kind,
        source_tag: event.get_integer_value_field(EventField::EVENT_SOURCE_USER_DATA),
    })
}

fn keycode(event: &CGEvent) -> u16 {
    event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16
}
