//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! `SwitchEvent`s to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Settings, SettingsError, SettingsHandle};
use crate::events::{Permission, SwitchEvent};
use crate::hotkey::TapController;
use crate::permissions;
use crate::switch::{self, SwitchGate};

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_FRAME_LEN};

/// Everything the server needs to act on requests
pub struct ServerContext {
    pub settings: SettingsHandle,
    pub settings_path: PathBuf,
    /// Listen-only was forced from the environment and must not be persisted
    pub listen_only_override: bool,
    pub gate: SwitchGate,
    pub control: TapController,
    pub event_tx: broadcast::Sender<SwitchEvent>,
    pub system: SystemChecks,
}

/// Live lookups against the OS, read on every status or method request
#[derive(Debug, Clone, Copy)]
pub struct SystemChecks {
    pub current_symbol: fn() -> &'static str,
    pub switch_available: fn() -> bool,
    pub accessibility_trusted: fn() -> bool,
}

impl Default for SystemChecks {
    fn default() -> Self {
        Self {
            current_symbol: switch::current_symbol,
            switch_available: switch::switch_available,
            accessibility_trusted: permissions::accessibility_trusted,
        }
    }
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    start_time: Instant,
    tap_enabled: bool,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, context: ServerContext) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            start_time: Instant::now(),
            tap_enabled: false,
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            context: Arc::new(context),
            shutdown_tx,
        })
    }

    /// Track the tap state, which is only visible as events
    pub async fn observe(&self, event: &SwitchEvent) {
        if let SwitchEvent::TapStateChanged { enabled } = event {
            let mut state = self.state.write().await;
            if state.tap_enabled != *enabled {
                info!(enabled, "IPC server: tap state updated");
            }
            state.tap_enabled = *enabled;
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        context: Arc<ServerContext>,
    ) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(32);
        let writer_task = tokio::spawn(Self::write_frames(writer, frame_rx));
        let mut forwarder: Option<JoinHandle<()>> = None;
        let mut pending: Option<broadcast::Receiver<SwitchEvent>> = None;

        let result = async {
            while let Some(body) = Self::read_frame(&mut reader).await? {
                let response = match serde_json::from_slice::<Request>(&body) {
                    Ok(request) => {
                        debug!(?request, "received request");
                        let (response, subscribe) =
                            Self::process_request(request, &state, &context).await;
                        if subscribe && forwarder.is_none() {
                            debug!("client subscribed to notifications");
                            pending = Some(context.event_tx.subscribe());
                        }
                        response
                    }
                    Err(e) => {
                        warn!(error = %e, "unparseable request");
                        Response::error("invalid_request", e.to_string())
                    }
                };

                if frame_tx.send(encode(&response)?).await.is_err() {
                    break;
                }

                // Forwarding starts only once the `subscribed` reply is queued.
                if let Some(events) = pending.take() {
                    forwarder = Some(tokio::spawn(Self::forward_events(events, frame_tx.clone())));
                }
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Some(task) = forwarder {
            task.abort();
        }
        drop(frame_tx);
        if let Ok(Err(e)) = writer_task.await {
            debug!(?e, "client writer closed");
        }

        result
    }

    /// Read one length-prefixed frame; `None` on clean disconnect
    async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("client disconnected");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            warn!(len, "message too large, disconnecting");
            return Ok(None);
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Ok(Some(body))
    }

    async fn write_frames(mut writer: OwnedWriteHalf, mut frames: mpsc::Receiver<Vec<u8>>) -> Result<()> {
        while let Some(frame) = frames.recv().await {
            writer.write_all(&frame).await?;
        }
        Ok(())
    }

    async fn forward_events(mut events: broadcast::Receiver<SwitchEvent>, frames: mpsc::Sender<Vec<u8>>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let frame = match encode(&Notification { event }) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(?e, "failed to encode notification");
                            continue;
                        }
                    };
                    if frames.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        context: &ServerContext,
    ) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let state = state.read().await;
                let settings = context.settings.snapshot();
                let checks = &context.system;
                let status = DaemonStatus {
                    tap_enabled: state.tap_enabled,
                    secure_input: context.gate.secure_input_active(),
                    needs_input_monitoring: context.gate.needs_input_monitoring(),
                    needs_accessibility: settings.method.requires_accessibility()
                        && !(checks.accessibility_trusted)(),
                    switch_available: (checks.switch_available)(),
                    current_symbol: (checks.current_symbol)().to_string(),
                    settings,
                    uptime_secs: state.start_time.elapsed().as_secs(),
                    ..DaemonStatus::default()
                };
                (Response::Status(status), false)
            }

            Request::SetEnabled { enabled } => {
                let _guard = state.write().await;
                let response = Self::update_settings(context, |s| {
                    s.enabled = enabled;
                    Ok(())
                });
                if enabled {
                    if context.gate.needs_input_monitoring() {
                        let _ = context.event_tx.send(SwitchEvent::PermissionRequired {
                            permission: Permission::InputMonitoring,
                        });
                    } else {
                        context.control.start();
                    }
                } else {
                    context.control.stop();
                }
                info!(enabled, "switching toggled via IPC");
                (response, false)
            }

            Request::SetMultiTap { enabled } => {
                let _guard = state.write().await;
                let response = Self::update_settings(context, |s| {
                    s.multi_tap_enabled = enabled;
                    Ok(())
                });
                (response, false)
            }

            Request::SetMethod { method } => {
                let _guard = state.write().await;
                if method.requires_accessibility() && !(context.system.accessibility_trusted)() {
                    warn!(%method, "switch method rejected, Accessibility not granted");
                    let _ = context.event_tx.send(SwitchEvent::PermissionRequired {
                        permission: Permission::Accessibility,
                    });
                    return (
                        Response::error(
                            "accessibility_required",
                            format!("{method} needs the Accessibility permission"),
                        ),
                        false,
                    );
                }
                let response = Self::update_settings(context, |s| s.select_method(method));
                (response, false)
            }

            Request::SetMiniHud { enabled } => {
                let _guard = state.write().await;
                let response = Self::update_settings(context, |s| {
                    s.show_mini_hud = enabled;
                    Ok(())
                });
                (response, false)
            }

            Request::SetDisableAnimation { disable } => {
                let _guard = state.write().await;
                let response = Self::update_settings(context, |s| {
                    s.set_disable_animation(disable);
                    Ok(())
                });
                (response, false)
            }

            Request::RestartTap => {
                if !context.settings.is_enabled() {
                    return (Response::error("disabled", "switching is disabled"), false);
                }
                info!("tap restart requested via IPC");
                context.control.start();
                (Response::Ok, false)
            }

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    /// Apply `change` to the current settings, publish and persist them
    fn update_settings<F>(context: &ServerContext, change: F) -> Response
    where
        F: FnOnce(&mut Settings) -> Result<(), SettingsError>,
    {
        let mut settings = context.settings.snapshot();
        if let Err(e) = change(&mut settings) {
            warn!(error = %e, "settings change rejected");
            return Response::error("rejected", e.to_string());
        }
        context.settings.apply(&settings);

        let mut persisted = settings;
        if context.listen_only_override {
            persisted.listen_only = Settings::load_or_default(&context.settings_path).listen_only;
        }
        if let Err(e) = persisted.save(&context.settings_path) {
            warn!(error = %e, "failed to persist settings");
        }
        Response::Ok
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Length-prefixed JSON frame
fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}
