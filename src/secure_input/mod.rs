//! Secure input monitor
//!
//! While a password field (or any app) holds secure event input, switching
//! is refused. The check runs on a timer off the tap thread and lands in a
//! flag the switch action reads.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::events::SwitchEvent;
use crate::switch::SwitchGate;

/// How often secure input is polled
pub const POLL_PERIOD: Duration = Duration::from_secs(1);

#[cfg(target_os = "macos")]
mod ffi {
    #[link(name = "Carbon", kind = "framework")]
    extern "C" {
        pub fn IsSecureEventInputEnabled() -> u8;
    }
}

/// Whether some process has secure event input enabled
#[cfg(target_os = "macos")]
pub fn secure_input_enabled() -> bool {
    unsafe { ffi::IsSecureEventInputEnabled() != 0 }
}

#[cfg(not(target_os = "macos"))]
pub fn secure_input_enabled() -> bool {
    false
}

/// Polls secure input and mirrors it into the switch gate
pub struct SecureInputMonitor {
    gate: SwitchGate,
    event_tx: broadcast::Sender<SwitchEvent>,
}

impl SecureInputMonitor {
    pub fn new(gate: SwitchGate, event_tx: broadcast::Sender<SwitchEvent>) -> Self {
        Self { gate, event_tx }
    }

    /// Poll `active` every `POLL_PERIOD` until the task is dropped
    pub async fn run<F>(self, active: F)
    where
        F: Fn() -> bool,
    {
        let mut ticker = interval(POLL_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.evaluate(active());
        }
    }

    /// Record one reading; returns true when the state changed
    pub fn evaluate(&self, active: bool) -> bool {
        if self.gate.secure_input_active() == active {
            return false;
        }

        info!(active, "secure input changed");
        self.gate.set_secure_input(active);
        let _ = self.event_tx.send(SwitchEvent::SecureInputChanged { active });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    fn monitor() -> (SecureInputMonitor, SwitchGate, broadcast::Receiver<SwitchEvent>) {
        let (tx, rx) = broadcast::channel(8);
        let gate = SwitchGate::default();
        (SecureInputMonitor::new(gate.clone(), tx), gate, rx)
    }

    #[test]
    fn test_change_updates_gate_and_publishes() {
        let (monitor, gate, mut rx) = monitor();

        assert!(monitor.evaluate(true));
        assert!(gate.secure_input_active());
        assert_eq!(
            rx.try_recv().unwrap(),
            SwitchEvent::SecureInputChanged { active: true }
        );

        assert!(monitor.evaluate(false));
        assert!(!gate.secure_input_active());
        assert_eq!(
            rx.try_recv().unwrap(),
            SwitchEvent::SecureInputChanged { active: false }
        );
    }

    #[test]
    fn test_unchanged_reading_is_quiet() {
        let (monitor, gate, mut rx) = monitor();

        assert!(!monitor.evaluate(false));
        assert!(!gate.secure_input_active());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_interval() {
        let (monitor, gate, mut rx) = monitor();
        let active = Arc::new(AtomicBool::new(false));
        let reading = {
            let active = Arc::clone(&active);
            move || active.load(Ordering::Relaxed)
        };
        let task = tokio::spawn(monitor.run(reading));

        active.store(true, Ordering::Relaxed);
        tokio::time::sleep(POLL_PERIOD * 2).await;

        assert!(gate.secure_input_active());
        assert_eq!(
            rx.recv().await.unwrap(),
            SwitchEvent::SecureInputChanged { active: true }
        );
        task.abort();
    }
}
