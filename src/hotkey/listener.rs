//! Dedicated tap thread
//!
//! The event tap and everything its callback touches live on one thread with
//! its own CFRunLoop. Other tasks steer it through `TapController`.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SettingsHandle;
use crate::events::SwitchEvent;
use crate::switch::{SwitchAction, SwitchGate};
use crate::tap::{TapListener, TapManager, TapMode, TapPort, TapState};

/// How long one run-loop slice (or idle wait) lasts before commands are polled
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Commands accepted by the tap thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapCommand {
    /// Install the tap, restarting it when already active
    Start,
    /// Release the tap
    Stop,
    /// Release the tap and end the thread
    Shutdown,
}

/// Cloneable handle for steering the tap thread from any task
#[derive(Debug, Clone)]
pub struct TapController {
    command_tx: Sender<TapCommand>,
}

impl TapController {
    pub fn new(command_tx: Sender<TapCommand>) -> Self {
        Self { command_tx }
    }

    /// Ask the tap thread to (re)install the tap
    pub fn start(&self) {
        self.send(TapCommand::Start);
    }

    /// Ask the tap thread to release the tap
    pub fn stop(&self) {
        self.send(TapCommand::Stop);
    }

    fn send(&self, command: TapCommand) {
        if self.command_tx.send(command).is_err() {
            warn!(?command, "tap thread is gone, command dropped");
        }
    }
}

/// Owner of the tap thread
pub struct HotkeyListener {
    settings: SettingsHandle,
    gate: SwitchGate,
    event_tx: broadcast::Sender<SwitchEvent>,
    running: Arc<AtomicBool>,
    control: TapController,
    command_rx: Mutex<Option<Receiver<TapCommand>>>,
}

impl HotkeyListener {
    /// Create a listener; the thread is not started yet
    pub fn new(
        settings: SettingsHandle,
        gate: SwitchGate,
        event_tx: broadcast::Sender<SwitchEvent>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel();
        Self {
            settings,
            gate,
            event_tx,
            running: Arc::new(AtomicBool::new(false)),
            control: TapController::new(command_tx),
            command_rx: Mutex::new(Some(command_rx)),
        }
    }

    /// Handle for sending commands to the tap thread
    pub fn controller(&self) -> TapController {
        self.control.clone()
    }

    /// Spawn the tap thread
    ///
    /// The thread starts with the tap stopped; send `TapCommand::Start`
    /// through the controller to install it. The thread can only be
    /// spawned once per listener.
    pub fn spawn(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let commands = self
            .command_rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .ok_or(HotkeyError::ChannelClosed)?;

        let settings = self.settings.clone();
        let gate = self.gate.clone();
        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");
                run_tap_thread(commands, &running, settings, gate, event_tx);
                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// Release the tap and end the thread
    pub fn stop(&self) {
        self.control.send(TapCommand::Shutdown);
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the thread is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("command channel is no longer available")]
    ChannelClosed,
}

#[cfg(target_os = "macos")]
fn run_tap_thread(
    commands: Receiver<TapCommand>,
    running: &AtomicBool,
    settings: SettingsHandle,
    gate: SwitchGate,
    event_tx: broadcast::Sender<SwitchEvent>,
) {
    use std::rc::{Rc, Weak};

    use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop};

    use super::macos::MacTapPort;
    use crate::events::EventNotifier;
    use crate::switch::{GatedSwitch, MacInputSwitcher};
    use crate::tap::EventSink;

    type MacTapManager = TapManager<MacTapPort, GatedSwitch<MacInputSwitcher>, EventNotifier>;

    let manager: Rc<RefCell<MacTapManager>> = Rc::new_cyclic(|weak| {
        let sink: Weak<RefCell<dyn EventSink>> = weak.clone();
        let action = GatedSwitch::new(
            MacInputSwitcher::new(),
            settings.clone(),
            gate,
            event_tx.clone(),
        );
        RefCell::new(TapManager::new(
            MacTapPort::new(sink),
            action,
            EventNotifier::new(event_tx),
            settings.clone(),
        ))
    });

    drive(&manager, &commands, running, &settings, || unsafe {
        CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, POLL_INTERVAL, true);
    });
}

#[cfg(not(target_os = "macos"))]
fn run_tap_thread(
    commands: Receiver<TapCommand>,
    running: &AtomicBool,
    settings: SettingsHandle,
    _gate: SwitchGate,
    event_tx: broadcast::Sender<SwitchEvent>,
) {
    use crate::events::EventNotifier;

    let manager = RefCell::new(TapManager::new(
        unsupported::UnsupportedPort,
        unsupported::NoSwitch,
        EventNotifier::new(event_tx),
        settings.clone(),
    ));
    drive(&manager, &commands, running, &settings, || {});
}

#[cfg(not(target_os = "macos"))]
mod unsupported {
    use crate::chord::Decision;
    use crate::switch::SwitchAction;
    use crate::tap::{TapError, TapMode, TapPort};

    pub struct UnsupportedPort;

    impl TapPort for UnsupportedPort {
        fn install(&mut self, _mode: TapMode) -> Result<(), TapError> {
            Err(TapError::Unsupported)
        }

        fn reenable(&mut self) -> bool {
            false
        }

        fn release(&mut self) {}
    }

    pub struct NoSwitch;

    impl SwitchAction for NoSwitch {
        fn perform(&mut self) -> Decision {
            Decision::Ignore
        }
    }
}

/// Command loop of the tap thread
///
/// While the tap is active `pump` runs one run-loop slice so tap callbacks
/// are delivered; otherwise the thread just waits for the next command.
/// The tap is always released on exit.
fn drive<P, A, L>(
    manager: &RefCell<TapManager<P, A, L>>,
    commands: &Receiver<TapCommand>,
    running: &AtomicBool,
    settings: &SettingsHandle,
    mut pump: impl FnMut(),
) where
    P: TapPort,
    A: SwitchAction,
    L: TapListener,
{
    while running.load(Ordering::SeqCst) {
        let active = manager.borrow().state() != TapState::Stopped;
        let next = if active {
            pump();
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match commands.recv_timeout(POLL_INTERVAL) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        let Some(command) = next else {
            continue;
        };
        debug!(?command, "tap command received");

        let mut manager = manager.borrow_mut();
        match command {
            TapCommand::Start => {
                let mode = if settings.listen_only() {
                    TapMode::ListenOnly
                } else {
                    TapMode::Consume
                };
                match manager.start(mode) {
                    Ok(()) => info!(mode = ?manager.mode(), "event tap started"),
                    Err(e) => warn!(error = %e, "event tap not started"),
                }
            }
            TapCommand::Stop => {
                debug!(chord = ?manager.chord_state(), "stopping event tap");
                manager.stop();
            }
            TapCommand::Shutdown => break,
        }
    }

    manager.borrow_mut().stop();
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::chord::Decision;
    use crate::config::Settings;
    use crate::tap::TapError;

    #[derive(Default)]
    struct CountingPort {
        installs: Rc<RefCell<Vec<TapMode>>>,
        releases: Rc<RefCell<usize>>,
    }

    impl TapPort for CountingPort {
        fn install(&mut self, mode: TapMode) -> Result<(), TapError> {
            self.installs.borrow_mut().push(mode);
            Ok(())
        }

        fn reenable(&mut self) -> bool {
            true
        }

        fn release(&mut self) {
            *self.releases.borrow_mut() += 1;
        }
    }

    struct Silent;

    impl TapListener for Silent {
        fn tap_state_changed(&self, _enabled: bool) {}
        fn installation_failed(&self) {}
        fn decided(&self, _decision: Decision) {}
    }

    struct Never;

    impl SwitchAction for Never {
        fn perform(&mut self) -> Decision {
            Decision::Ignore
        }
    }

    fn manager(
        settings: &SettingsHandle,
    ) -> (
        RefCell<TapManager<CountingPort, Never, Silent>>,
        Rc<RefCell<Vec<TapMode>>>,
        Rc<RefCell<usize>>,
    ) {
        let port = CountingPort::default();
        let installs = Rc::clone(&port.installs);
        let releases = Rc::clone(&port.releases);
        let manager = RefCell::new(TapManager::new(port, Never, Silent, settings.clone()));
        (manager, installs, releases)
    }

    #[test]
    fn test_listener_creation() {
        let (tx, _rx) = broadcast::channel(32);
        let listener = HotkeyListener::new(
            SettingsHandle::new(&Settings::default()),
            SwitchGate::default(),
            tx,
        );
        assert!(!listener.is_running());
    }

    #[test]
    fn test_controller_sends_commands() {
        let (tx, rx) = mpsc::channel();
        let control = TapController::new(tx);

        control.start();
        control.stop();

        assert_eq!(rx.try_recv().unwrap(), TapCommand::Start);
        assert_eq!(rx.try_recv().unwrap(), TapCommand::Stop);
    }

    #[test]
    fn test_controller_survives_closed_thread() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        TapController::new(tx).start();
    }

    #[test]
    fn test_drive_runs_commands_until_shutdown() {
        let settings = SettingsHandle::new(&Settings::default());
        let (manager, installs, releases) = manager(&settings);
        let (tx, rx) = mpsc::channel();
        tx.send(TapCommand::Start).unwrap();
        tx.send(TapCommand::Shutdown).unwrap();

        let running = AtomicBool::new(true);
        let mut pumped = 0;
        drive(&manager, &rx, &running, &settings, || pumped += 1);

        assert_eq!(*installs.borrow(), vec![TapMode::Consume]);
        assert_eq!(pumped, 1);
        assert_eq!(*releases.borrow(), 1);
        assert_eq!(manager.borrow().state(), TapState::Stopped);
    }

    #[test]
    fn test_drive_honours_listen_only() {
        let settings = SettingsHandle::new(&Settings {
            listen_only: true,
            ..Settings::default()
        });
        let (manager, installs, _) = manager(&settings);
        let (tx, rx) = mpsc::channel();
        tx.send(TapCommand::Start).unwrap();
        drop(tx);

        let running = AtomicBool::new(true);
        drive(&manager, &rx, &running, &settings, || {});

        assert_eq!(*installs.borrow(), vec![TapMode::ListenOnly]);
        assert_eq!(manager.borrow().state(), TapState::Stopped);
    }

    #[test]
    fn test_drive_stop_releases_tap() {
        let settings = SettingsHandle::new(&Settings::default());
        let (manager, _, releases) = manager(&settings);
        let (tx, rx) = mpsc::channel();
        tx.send(TapCommand::Start).unwrap();
        tx.send(TapCommand::Stop).unwrap();
        tx.send(TapCommand::Shutdown).unwrap();

        let running = AtomicBool::new(true);
        drive(&manager, &rx, &running, &settings, || {});

        // The final stop on exit has nothing left to release.
        assert_eq!(*releases.borrow(), 1);
    }
}
