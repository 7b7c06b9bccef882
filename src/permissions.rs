//! Input Monitoring and Accessibility permission checks
//!
//! The tap cannot be installed without Input Monitoring; the synthetic
//! switch methods additionally need Accessibility. A revoked grant shows up
//! as a failed tap, after which `PermissionWatcher` waits for the grant to
//! return and restarts the tap.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::SettingsHandle;
use crate::events::{Permission, SwitchEvent};
use crate::hotkey::TapController;
use crate::switch::SwitchGate;

/// How often a missing grant is re-checked
pub const RECHECK_PERIOD: Duration = Duration::from_secs(2);

#[cfg(target_os = "macos")]
mod ffi {
    #[link(name = "ApplicationServices", kind = "framework")]
    extern "C" {
        pub fn AXIsProcessTrusted() -> bool;
        pub fn CGPreflightListenEventAccess() -> bool;
        pub fn CGRequestListenEventAccess() -> bool;
    }
}

/// Whether the process may listen to keyboard events
#[cfg(target_os = "macos")]
pub fn input_monitoring_granted() -> bool {
    unsafe { ffi::CGPreflightListenEventAccess() }
}

/// Ask the OS to show the Input Monitoring prompt
#[cfg(target_os = "macos")]
pub fn request_input_monitoring() -> bool {
    unsafe { ffi::CGRequestListenEventAccess() }
}

/// Whether the process may post synthetic events
#[cfg(target_os = "macos")]
pub fn accessibility_trusted() -> bool {
    unsafe { ffi::AXIsProcessTrusted() }
}

#[cfg(not(target_os = "macos"))]
pub fn input_monitoring_granted() -> bool {
    true
}

#[cfg(not(target_os = "macos"))]
pub fn request_input_monitoring() -> bool {
    true
}

#[cfg(not(target_os = "macos"))]
pub fn accessibility_trusted() -> bool {
    true
}

/// Restarts the tap once a missing Input Monitoring grant comes back
pub struct PermissionWatcher {
    gate: SwitchGate,
    settings: SettingsHandle,
    control: TapController,
}

impl PermissionWatcher {
    pub fn new(gate: SwitchGate, settings: SettingsHandle, control: TapController) -> Self {
        Self {
            gate,
            settings,
            control,
        }
    }

    /// Poll `granted` until the task is dropped
    pub async fn run<F>(&self, granted: F)
    where
        F: Fn() -> bool,
    {
        let mut ticker = interval(RECHECK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.gate.needs_input_monitoring() {
                self.evaluate(granted());
            }
        }
    }

    /// React to a bus event; returns true when the Input Monitoring prompt
    /// should be shown
    pub fn react(&self, event: &SwitchEvent, granted: bool) -> bool {
        match event {
            SwitchEvent::InstallationFailed => {
                warn!("event tap unavailable, waiting for Input Monitoring permission");
                self.gate.set_needs_input_monitoring(true);
                self.control.stop();
                !granted
            }
            SwitchEvent::PermissionRequired {
                permission: Permission::InputMonitoring,
            } => true,
            SwitchEvent::PermissionRequired {
                permission: Permission::Accessibility,
            } => {
                warn!("Accessibility permission required for the selected switch method");
                false
            }
            _ => false,
        }
    }

    /// Apply one permission reading; returns true when the tap was restarted
    pub fn evaluate(&self, granted: bool) -> bool {
        if !granted || !self.gate.needs_input_monitoring() {
            return false;
        }

        info!("Input Monitoring permission granted");
        self.gate.set_needs_input_monitoring(false);
        if !self.settings.is_enabled() {
            return false;
        }
        self.control.start();
        true
    }
}
