//! The switch action invoked by the chord detector
//!
//! `GatedSwitch` applies the runtime gates (master switch, permissions,
//! secure input, eligible pair) before asking an `InputSwitcher` to change
//! the input source. It runs synchronously on the tap thread, so it never
//! blocks: notifications go out through a non-blocking broadcast send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::chord::Decision;
use crate::config::SettingsHandle;
use crate::events::{Permission, SwitchEvent};

use super::method::SwitchMethod;

/// Something the detector can call when the chord fires
pub trait SwitchAction {
    /// Attempt a switch and report what to do with the keystroke
    fn perform(&mut self) -> Decision;
}

/// Platform access to input sources
pub trait InputSwitcher {
    /// Whether both sides of the English/Korean pair are enabled
    fn has_supported_pair(&mut self) -> bool;

    /// Change the input source; false when nothing was switched
    fn toggle(&mut self, method: SwitchMethod) -> bool;

    /// Symbol of the currently selected input source
    fn current_symbol(&self) -> &'static str;

    /// Whether the process may post synthetic events
    fn accessibility_trusted(&self) -> bool;
}

/// Flags set by other components that gate the switch
///
/// Each flag has a single writer (the secure-input monitor, the permission
/// watcher) and is read by the tap thread without blocking.
#[derive(Debug, Clone, Default)]
pub struct SwitchGate {
    secure_input: Arc<AtomicBool>,
    needs_input_monitoring: Arc<AtomicBool>,
}

impl SwitchGate {
    pub fn set_secure_input(&self, active: bool) {
        self.secure_input.store(active, Ordering::Relaxed);
    }

    pub fn secure_input_active(&self) -> bool {
        self.secure_input.load(Ordering::Relaxed)
    }

    pub fn set_needs_input_monitoring(&self, needed: bool) {
        self.needs_input_monitoring.store(needed, Ordering::Relaxed);
    }

    pub fn needs_input_monitoring(&self) -> bool {
        self.needs_input_monitoring.load(Ordering::Relaxed)
    }
}

/// Switch action guarded by settings, permissions and secure input
pub struct GatedSwitch<S> {
    switcher: S,
    settings: SettingsHandle,
    gate: SwitchGate,
    events: broadcast::Sender<SwitchEvent>,
}

impl<S: InputSwitcher> GatedSwitch<S> {
    pub fn new(
        switcher: S,
        settings: SettingsHandle,
        gate: SwitchGate,
        events: broadcast::Sender<SwitchEvent>,
    ) -> Self {
        Self {
            switcher,
            settings,
            gate,
            events,
        }
    }

    fn publish(&self, event: SwitchEvent) {
        // No receivers just means no front end is attached.
        let _ = self.events.send(event);
    }
}

impl<S: InputSwitcher> SwitchAction for GatedSwitch<S> {
    fn perform(&mut self) -> Decision {
        if !self.settings.is_enabled() {
            return Decision::Ignore;
        }

        // Without Input Monitoring the keystroke must not leak through.
        if self.gate.needs_input_monitoring() {
            self.publish(SwitchEvent::PermissionRequired {
                permission: Permission::InputMonitoring,
            });
            return Decision::ConsumeOnly;
        }

        if !self.switcher.has_supported_pair() {
            debug!("no English/Korean pair enabled, passing through");
            return Decision::Ignore;
        }

        let method = self.settings.method();
        if method.requires_accessibility() && !self.switcher.accessibility_trusted() {
            warn!(%method, "switch method needs Accessibility permission");
            self.publish(SwitchEvent::PermissionRequired {
                permission: Permission::Accessibility,
            });
            return Decision::Ignore;
        }

        if self.gate.secure_input_active() {
            debug!("secure input active, swallowing chord");
            return Decision::ConsumeOnly;
        }

        if !self.switcher.toggle(method) {
            debug!(%method, "input source toggle did nothing");
            return Decision::ConsumeOnly;
        }

        if self.settings.show_mini_hud() {
            self.publish(SwitchEvent::Switched {
                symbol: self.switcher.current_symbol().to_string(),
            });
        }
        Decision::Switched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[derive(Default)]
    struct FakeSwitcher {
        pair: bool,
        trusted: bool,
        toggle_result: bool,
        toggles: Vec<SwitchMethod>,
    }

    impl FakeSwitcher {
        fn ready() -> Self {
            Self {
                pair: true,
                trusted: true,
                toggle_result: true,
                toggles: Vec::new(),
            }
        }
    }

    impl InputSwitcher for FakeSwitcher {
        fn has_supported_pair(&mut self) -> bool {
            self.pair
        }

        fn toggle(&mut self, method: SwitchMethod) -> bool {
            self.toggles.push(method);
            self.toggle_result
        }

        fn current_symbol(&self) -> &'static str {
            "가"
        }

        fn accessibility_trusted(&self) -> bool {
            self.trusted
        }
    }

    fn gated(
        switcher: FakeSwitcher,
        settings: Settings,
    ) -> (
        GatedSwitch<FakeSwitcher>,
        SwitchGate,
        broadcast::Receiver<SwitchEvent>,
    ) {
        let (tx, rx) = broadcast::channel(16);
        let gate = SwitchGate::default();
        let action = GatedSwitch::new(switcher, SettingsHandle::new(&settings), gate.clone(), tx);
        (action, gate, rx)
    }

    #[test]
    fn test_switches_when_all_gates_open() {
        let (mut action, _, mut rx) = gated(FakeSwitcher::ready(), Settings::default());
        assert_eq!(action.perform(), Decision::Switched);
        assert_eq!(action.switcher.toggles, vec![SwitchMethod::TisToggle]);
        // Mini HUD is off by default.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disabled_passes_through() {
        let settings = Settings {
            enabled: false,
            ..Settings::default()
        };
        let (mut action, _, _) = gated(FakeSwitcher::ready(), settings);
        assert_eq!(action.perform(), Decision::Ignore);
        assert!(action.switcher.toggles.is_empty());
    }

    #[test]
    fn test_missing_input_monitoring_consumes() {
        let (mut action, gate, mut rx) = gated(FakeSwitcher::ready(), Settings::default());
        gate.set_needs_input_monitoring(true);
        assert_eq!(action.perform(), Decision::ConsumeOnly);
        assert!(action.switcher.toggles.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Ok(SwitchEvent::PermissionRequired {
                permission: Permission::InputMonitoring
            })
        ));
    }

    #[test]
    fn test_no_pair_passes_through() {
        let switcher = FakeSwitcher {
            pair: false,
            ..FakeSwitcher::ready()
        };
        let (mut action, _, _) = gated(switcher, Settings::default());
        assert_eq!(action.perform(), Decision::Ignore);
    }

    #[test]
    fn test_untrusted_synthetic_method_passes_through() {
        let switcher = FakeSwitcher {
            trusted: false,
            ..FakeSwitcher::ready()
        };
        let settings = Settings {
            method: SwitchMethod::CapsLock,
            ..Settings::default()
        };
        let (mut action, _, mut rx) = gated(switcher, settings);
        assert_eq!(action.perform(), Decision::Ignore);
        assert!(matches!(
            rx.try_recv(),
            Ok(SwitchEvent::PermissionRequired {
                permission: Permission::Accessibility
            })
        ));
    }

    #[test]
    fn test_untrusted_tis_toggle_still_switches() {
        let switcher = FakeSwitcher {
            trusted: false,
            ..FakeSwitcher::ready()
        };
        let (mut action, _, _) = gated(switcher, Settings::default());
        assert_eq!(action.perform(), Decision::Switched);
    }

    #[test]
    fn test_secure_input_consumes_without_switching() {
        let (mut action, gate, _) = gated(FakeSwitcher::ready(), Settings::default());
        gate.set_secure_input(true);
        assert_eq!(action.perform(), Decision::ConsumeOnly);
        assert!(action.switcher.toggles.is_empty());
    }

    #[test]
    fn test_failed_toggle_consumes() {
        let switcher = FakeSwitcher {
            toggle_result: false,
            ..FakeSwitcher::ready()
        };
        let (mut action, _, _) = gated(switcher, Settings::default());
        assert_eq!(action.perform(), Decision::ConsumeOnly);
    }

    #[test]
    fn test_mini_hud_publishes_symbol() {
        let settings = Settings {
            show_mini_hud: true,
            ..Settings::default()
        };
        let (mut action, _, mut rx) = gated(FakeSwitcher::ready(), settings);
        assert_eq!(action.perform(), Decision::Switched);
        match rx.try_recv() {
            Ok(SwitchEvent::Switched { symbol }) => assert_eq!(symbol, "가"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
