//! Inter-process communication for daemon control
//!
//! Newline-delimited JSON over a user-scoped Unix domain socket. Each request
//! line gets one response line. A `Subscribe` request turns the connection
//! into a stream of push notifications, one `ShieldEvent` per line, until the
//! client disconnects.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::engine::Engine;
use crate::events::ShieldEvent;
use crate::models::ShieldError;
use crate::monitor::SysinfoSource;
use crate::shield::AuthError;

/// IPC message types for daemon communication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcMessage {
    /// Verify a credential for the current user
    Authenticate { request_id: String, credential: String },
    ActivateShield { request_id: String },
    LockShield { request_id: String },
    GetStatus { request_id: String },
    ListApps { request_id: String },
    AddApp {
        request_id: String,
        display_name: String,
        process_key: String,
        category: String,
    },
    RemoveApp { request_id: String, id: String },
    ListLogs {
        request_id: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    ClearLogs { request_id: String },
    ListPolicies { request_id: String },
    TogglePolicy { request_id: String, id: String },
    GetIdleTimeout { request_id: String },
    SetIdleTimeout { request_id: String, minutes: i64 },
    ResetIdleTimer { request_id: String },
    GetAutostart { request_id: String },
    SetAutostart { request_id: String, enabled: bool },
    ListCandidates { request_id: String },
    CurrentUser { request_id: String },
    /// Stream push notifications on this connection
    Subscribe { request_id: String },
}

impl IpcMessage {
    pub fn request_id(&self) -> &str {
        match self {
            IpcMessage::Authenticate { request_id, .. }
            | IpcMessage::ActivateShield { request_id }
            | IpcMessage::LockShield { request_id }
            | IpcMessage::GetStatus { request_id }
            | IpcMessage::ListApps { request_id }
            | IpcMessage::AddApp { request_id, .. }
            | IpcMessage::RemoveApp { request_id, .. }
            | IpcMessage::ListLogs { request_id, .. }
            | IpcMessage::ClearLogs { request_id }
            | IpcMessage::ListPolicies { request_id }
            | IpcMessage::TogglePolicy { request_id, .. }
            | IpcMessage::GetIdleTimeout { request_id }
            | IpcMessage::SetIdleTimeout { request_id, .. }
            | IpcMessage::ResetIdleTimer { request_id }
            | IpcMessage::GetAutostart { request_id }
            | IpcMessage::SetAutostart { request_id, .. }
            | IpcMessage::ListCandidates { request_id }
            | IpcMessage::CurrentUser { request_id }
            | IpcMessage::Subscribe { request_id } => request_id,
        }
    }
}

/// IPC response types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum IpcResponse {
    /// Successful operation
    Success {
        request_id: String,
        data: Option<serde_json::Value>,
        message: Option<String>,
    },
    /// Operation failed
    Error {
        request_id: String,
        code: u32,
        message: String,
        details: Option<String>,
    },
}

impl IpcResponse {
    fn success<T: Serialize>(request_id: String, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => IpcResponse::Success {
                request_id,
                data: Some(value),
                message: None,
            },
            Err(e) => IpcResponse::Error {
                request_id,
                code: 500,
                message: "Failed to serialize response".to_string(),
                details: Some(e.to_string()),
            },
        }
    }

    fn done(request_id: String, message: &str) -> Self {
        IpcResponse::Success {
            request_id,
            data: None,
            message: Some(message.to_string()),
        }
    }

    fn error(request_id: String, code: u32, message: String) -> Self {
        IpcResponse::Error {
            request_id,
            code,
            message,
            details: None,
        }
    }

    fn shield_error(request_id: String, error: ShieldError) -> Self {
        Self::error(request_id, error.code(), error.to_string())
    }

    fn auth_error(request_id: String, error: AuthError) -> Self {
        let code = match error {
            AuthError::BackendUnavailable | AuthError::Pam(_) => 503,
            AuthError::UnknownUser => 500,
        };
        Self::error(request_id, code, error.to_string())
    }
}

/// Generate unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Apply one request to the engine. Blocking: run off the async workers.
pub fn dispatch(engine: &Arc<Engine>, message: IpcMessage) -> IpcResponse {
    let request_id = message.request_id().to_string();
    match message {
        IpcMessage::Authenticate { credential, .. } => match engine.authenticate(&credential) {
            Ok(verified) => IpcResponse::success(request_id, &verified),
            Err(e) => IpcResponse::auth_error(request_id, e),
        },
        IpcMessage::ActivateShield { .. } => match engine.activate_shield() {
            Ok(()) => IpcResponse::success(request_id, &engine.get_shield_status()),
            Err(e) => IpcResponse::shield_error(request_id, e),
        },
        IpcMessage::LockShield { .. } => {
            engine.lock_shield();
            IpcResponse::success(request_id, &engine.get_shield_status())
        }
        IpcMessage::GetStatus { .. } => IpcResponse::success(request_id, &engine.status_report()),
        IpcMessage::ListApps { .. } => IpcResponse::success(request_id, &engine.list_protected_apps()),
        IpcMessage::AddApp {
            display_name,
            process_key,
            category,
            ..
        } => match engine.add_protected_app(&display_name, &process_key, &category) {
            Ok(app) => IpcResponse::success(request_id, &app),
            Err(e) => IpcResponse::shield_error(request_id, e),
        },
        IpcMessage::RemoveApp { id, .. } => match engine.remove_protected_app(&id) {
            Ok(()) => IpcResponse::done(request_id, "Protected app removed"),
            Err(e) => IpcResponse::shield_error(request_id, e),
        },
        IpcMessage::ListLogs { limit, .. } => match engine.list_security_logs(limit.unwrap_or(100)) {
            Ok(logs) => IpcResponse::success(request_id, &logs),
            Err(e) => IpcResponse::shield_error(request_id, e),
        },
        IpcMessage::ClearLogs { .. } => match engine.clear_security_logs() {
            Ok(removed) => IpcResponse::success(request_id, &removed),
            Err(e) => IpcResponse::shield_error(request_id, e),
        },
        IpcMessage::ListPolicies { .. } => IpcResponse::success(request_id, &engine.list_security_policies()),
        IpcMessage::TogglePolicy { id, .. } => match engine.toggle_security_policy(&id) {
            Ok(policy) => IpcResponse::success(request_id, &policy),
            Err(e) => IpcResponse::shield_error(request_id, e),
        },
        IpcMessage::GetIdleTimeout { .. } => IpcResponse::success(request_id, &engine.get_idle_timeout()),
        IpcMessage::SetIdleTimeout { minutes, .. } => match engine.set_idle_timeout(minutes) {
            Ok(minutes) => IpcResponse::success(request_id, &minutes),
            Err(e) => IpcResponse::shield_error(request_id, e),
        },
        IpcMessage::ResetIdleTimer { .. } => {
            engine.reset_idle_timer();
            IpcResponse::done(request_id, "Idle timer reset")
        }
        IpcMessage::GetAutostart { .. } => match engine.get_autostart_enabled() {
            Ok(enabled) => IpcResponse::success(request_id, &enabled),
            Err(e) => IpcResponse::shield_error(request_id, e),
        },
        IpcMessage::SetAutostart { enabled, .. } => match engine.toggle_autostart(enabled) {
            Ok(enabled) => IpcResponse::success(request_id, &enabled),
            Err(e) => IpcResponse::shield_error(request_id, e),
        },
        IpcMessage::ListCandidates { .. } => {
            let mut source = SysinfoSource::new();
            IpcResponse::success(request_id, &engine.app_candidates(&mut source))
        }
        IpcMessage::CurrentUser { .. } => match engine.current_user() {
            Ok(user) => IpcResponse::success(request_id, &user),
            Err(e) => IpcResponse::auth_error(request_id, e),
        },
        IpcMessage::Subscribe { .. } => IpcResponse::error(
            request_id,
            400,
            "Subscribe must be sent on its own connection".to_string(),
        ),
    }
}

/// IPC server for handling client connections
pub struct IpcServer {
    socket_path: PathBuf,
    engine: Arc<Engine>,
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file when server is dropped
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl IpcServer {
    pub fn new(socket_path: PathBuf, engine: Arc<Engine>) -> Self {
        Self { socket_path, engine }
    }

    fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove existing socket: {}", self.socket_path.display()))?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to socket: {}", self.socket_path.display()))?;

        // Owner only
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict socket permissions: {}", self.socket_path.display()))?;

        Ok(listener)
    }

    /// Accept connections until shutdown is signalled
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = self.bind()?;
        log::info!("IPC server listening on {}", self.socket_path.display());

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let engine = Arc::clone(&self.engine);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(engine, stream, shutdown).await {
                                log::warn!("Error handling IPC connection: {:#}", e);
                            }
                        });
                    }
                    Err(e) => {
                        log::error!("Error accepting IPC connection: {}", e);
                        return Err(e).context("IPC accept failed");
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        Ok(())
    }
}

async fn write_line<T: Serialize>(writer: &mut tokio::net::unix::OwnedWriteHalf, value: &T) -> Result<()> {
    let mut json = serde_json::to_string(value).context("Failed to serialize response")?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await.context("Failed to write response")?;
    Ok(())
}

/// Serve one client connection
async fn handle_connection(engine: Arc<Engine>, stream: UnixStream, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read from client")? {
        if line.trim().is_empty() {
            continue;
        }

        let message: IpcMessage = match serde_json::from_str(line.trim()) {
            Ok(message) => message,
            Err(e) => {
                let response = IpcResponse::Error {
                    request_id: String::new(),
                    code: 400,
                    message: "Failed to parse IPC message".to_string(),
                    details: Some(e.to_string()),
                };
                write_line(&mut writer, &response).await?;
                continue;
            }
        };

        if let IpcMessage::Subscribe { request_id } = message {
            // Attach before acknowledging so nothing published after the ack is missed
            let events = engine.subscribe();
            write_line(&mut writer, &IpcResponse::done(request_id, "Subscribed")).await?;
            return stream_events(events, lines, writer, &mut shutdown).await;
        }

        let handler_engine = Arc::clone(&engine);
        let response = tokio::task::spawn_blocking(move || dispatch(&handler_engine, message))
            .await
            .context("IPC handler panicked")?;
        write_line(&mut writer, &response).await?;
    }

    Ok(())
}

/// Forward push notifications until the client goes away
async fn stream_events(
    mut events: broadcast::Receiver<ShieldEvent>,
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    mut writer: tokio::net::unix::OwnedWriteHalf,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => write_line(&mut writer, &event).await?,
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Subscriber fell behind, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            // Any input or EOF ends the subscription
            _ = lines.next_line() => return Ok(()),
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

// ==================== client ====================

/// Send one request and wait for its response
pub async fn send_request(socket_path: &Path, message: &IpcMessage) -> Result<IpcResponse> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to daemon at {} (is `ficha run` running?)", socket_path.display()))?;
    let (reader, mut writer) = stream.into_split();

    write_line(&mut writer, message).await?;

    let mut lines = BufReader::new(reader).lines();
    let line = lines
        .next_line()
        .await
        .context("Failed to read daemon response")?
        .context("Daemon closed the connection without responding")?;
    serde_json::from_str(&line).context("Failed to parse daemon response")
}

/// Open subscription; the daemon stops streaming once this is dropped
pub struct Subscription {
    lines: Lines<BufReader<OwnedReadHalf>>,
    _writer: tokio::net::unix::OwnedWriteHalf,
}

impl Subscription {
    /// Next raw event line, `None` when the daemon closes the stream
    pub async fn next_event(&mut self) -> Result<Option<String>> {
        self.lines.next_line().await.context("Failed to read event")
    }
}

pub async fn subscribe(socket_path: &Path) -> Result<Subscription> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to daemon at {}", socket_path.display()))?;
    let (reader, mut writer) = stream.into_split();

    write_line(&mut writer, &IpcMessage::Subscribe { request_id: generate_request_id() }).await?;

    let mut lines = BufReader::new(reader).lines();
    let line = lines
        .next_line()
        .await
        .context("Failed to read subscription response")?
        .context("Daemon closed the connection")?;
    match serde_json::from_str::<IpcResponse>(&line).context("Failed to parse subscription response")? {
        IpcResponse::Success { .. } => Ok(Subscription { lines, _writer: writer }),
        IpcResponse::Error { message, .. } => anyhow::bail!("Subscription rejected: {}", message),
    }
}
