//! shift-space-switcher: background daemon that toggles the input source
//!
//! This daemon runs as a LaunchAgent and provides:
//! - Left Shift + Space chord detection via CGEventTap
//! - English/Korean input source switching
//! - Automatic recovery when the OS suspends the tap
//! - IPC server for a menu bar front end (status, settings, notifications)

mod chord;
mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod permissions;
mod secure_input;
mod switch;
mod tap;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Settings, SettingsHandle};
use crate::events::SwitchEvent;
use crate::hotkey::HotkeyListener;
use crate::ipc::{Server, ServerContext, SystemChecks};
use crate::lifecycle::ShutdownSignal;
use crate::permissions::PermissionWatcher;
use crate::secure_input::SecureInputMonitor;
use crate::switch::SwitchGate;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "shift-space-switcher starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.settings_path, "configuration loaded");

    let mut settings = Settings::load_or_default(&config.settings_path);
    if config.listen_only_override {
        info!("listen-only mode forced from the environment");
        settings.listen_only = true;
    }
    let settings_handle = SettingsHandle::new(&settings);

    let mut shutdown = ShutdownSignal::register().context("failed to register signal handlers")?;

    // Tap thread, switch action and monitors -> IPC server and event handler
    let (event_tx, mut event_rx) = broadcast::channel::<SwitchEvent>(64);
    let gate = SwitchGate::default();

    if !permissions::input_monitoring_granted() {
        warn!("Input Monitoring permission missing, requesting it");
        gate.set_needs_input_monitoring(true);
        permissions::request_input_monitoring();
    }
    if settings.method.requires_accessibility() && !permissions::accessibility_trusted() {
        warn!(method = %settings.method, "selected switch method needs Accessibility permission");
    }

    // The tap thread owns the event tap and its CFRunLoop
    let hotkey_listener = HotkeyListener::new(settings_handle.clone(), gate.clone(), event_tx.clone());
    let control = hotkey_listener.controller();
    hotkey_listener
        .spawn()
        .context("failed to start hotkey listener")?;
    if settings.enabled && !gate.needs_input_monitoring() {
        control.start();
    }

    let server = Server::new(
        &config.socket_path,
        ServerContext {
            settings: settings_handle.clone(),
            settings_path: config.settings_path.clone(),
            listen_only_override: config.listen_only_override,
            gate: gate.clone(),
            control: control.clone(),
            event_tx: event_tx.clone(),
            system: SystemChecks::default(),
        },
    )?;

    let secure_monitor = SecureInputMonitor::new(gate.clone(), event_tx.clone());
    let permission_watcher = PermissionWatcher::new(gate.clone(), settings_handle.clone(), control.clone());

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = secure_monitor.run(secure_input::secure_input_enabled) => {
            info!("secure input monitor exited");
        }

        _ = permission_watcher.run(permissions::input_monitoring_granted) => {
            info!("permission watcher exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Track status and react to tap failures
        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        debug!(%event, "switch event received");
                        server.observe(&event).await;
                        if permission_watcher.react(&event, permissions::input_monitoring_granted()) {
                            permissions::request_input_monitoring();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "switch event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("switch event handler exited");
        }

        // Wait for shutdown signal
        signal = shutdown.wait() => {
            info!(signal, "shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    hotkey_listener.stop();
    server.shutdown().await;

    info!("shift-space-switcher stopped");

    Ok(())
}
