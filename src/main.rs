#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use ficha::cli::{self, CliCommand, ClientConfig, ClientRequest};
use ficha::daemon::config::DaemonConfiguration;
use ficha::daemon::ipc::{self, IpcMessage, IpcResponse};
use ficha::daemon::{self, logging};
use ficha::events::ShieldEvent;
use ficha::models::{AppCandidate, ProtectedApp, SecurityLog, SecurityPolicy, ShieldStatus, StatusReport};
use ficha::output;

#[tokio::main]
async fn main() -> Result<()> {
    let command = cli::parse_args()?;

    match command {
        CliCommand::Run { config } => {
            logging::init_logging("info");
            daemon::run_daemon(config).await
        }
        CliCommand::CheckConfig { config, json } => {
            logging::init_logging("warn");
            check_config(config, json)
        }
        CliCommand::Client(client) => {
            logging::init_logging("warn");
            run_client(client).await
        }
    }
}

fn check_config(path: Option<PathBuf>, json: bool) -> Result<()> {
    let (config, loaded_from) =
        DaemonConfiguration::load(path.as_deref()).context("Invalid configuration")?;

    if json {
        println!("{}", output::format_json(&config)?);
        return Ok(());
    }

    match loaded_from {
        Some(path) => println!("Configuration OK: {}", path.display()),
        None => println!("No configuration file found, using defaults"),
    }
    println!("  Scan interval: {} ms", config.daemon.scan_interval_ms);
    println!("  Threat dwell: {} s", config.daemon.threat_dwell_secs);
    println!("  Audit retention: {} days", config.audit.retention_days);
    println!("  Database: {}", config.database_path()?.display());
    println!("  Socket: {}", config.socket_path()?.display());
    Ok(())
}

fn resolve_socket(client: &ClientConfig) -> Result<PathBuf> {
    if let Some(socket) = &client.socket {
        return Ok(socket.clone());
    }
    let (config, _) = DaemonConfiguration::load(client.config.as_deref()).context("Invalid configuration")?;
    Ok(config.socket_path()?)
}

/// Unwrap a daemon response into its typed payload
fn into_data<T: DeserializeOwned>(response: IpcResponse) -> Result<T> {
    match response {
        IpcResponse::Success { data, .. } => {
            let value = data.unwrap_or(serde_json::Value::Null);
            serde_json::from_value(value).context("Unexpected response payload from daemon")
        }
        IpcResponse::Error {
            code,
            message,
            details,
            ..
        } => match details {
            Some(details) => bail!("{} (code {}): {}", message, code, details),
            None => bail!("{} (code {})", message, code),
        },
    }
}

async fn request<T: DeserializeOwned>(socket: &Path, message: IpcMessage) -> Result<T> {
    let response = ipc::send_request(socket, &message).await?;
    into_data(response)
}

fn print_value<T, F>(value: &T, json: bool, human: F) -> Result<()>
where
    T: serde::Serialize,
    F: FnOnce(&T) -> String,
{
    if json {
        println!("{}", output::format_json(value)?);
    } else {
        println!("{}", human(value));
    }
    Ok(())
}

fn read_credential() -> Result<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        eprint!("Credential: ");
        std::io::stderr().flush()?;
    }
    let mut line = String::new();
    stdin.lock().read_line(&mut line).context("Failed to read credential from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn unlock(socket: &Path, json: bool) -> Result<()> {
    let credential = read_credential()?;
    let verified: bool = request(
        socket,
        IpcMessage::Authenticate {
            request_id: ipc::generate_request_id(),
            credential,
        },
    )
    .await?;
    if !verified {
        bail!("Authentication failed");
    }

    let status: ShieldStatus = request(
        socket,
        IpcMessage::ActivateShield {
            request_id: ipc::generate_request_id(),
        },
    )
    .await?;
    print_value(&status, json, |s| format!("Shield {}", s))
}

async fn watch(socket: &Path, json: bool) -> Result<()> {
    let mut subscription = ipc::subscribe(socket).await?;
    while let Some(line) = subscription.next_event().await? {
        if json {
            println!("{}", line);
            continue;
        }
        match serde_json::from_str::<ShieldEvent>(&line) {
            Ok(event) => println!("{}", output::format_event(&event)),
            Err(e) => log::warn!("Skipping unrecognized event: {}", e),
        }
    }
    Ok(())
}

async fn run_client(client: ClientConfig) -> Result<()> {
    let socket = resolve_socket(&client)?;
    let json = client.json;

    match &client.request {
        ClientRequest::Unlock => return unlock(&socket, json).await,
        ClientRequest::Watch => return watch(&socket, json).await,
        _ => {}
    }

    let Some(message) = client.request.to_message(ipc::generate_request_id()) else {
        bail!("Unsupported request");
    };

    match client.request {
        ClientRequest::Status => {
            let report: StatusReport = request(&socket, message).await?;
            print_value(&report, json, output::format_status)
        }
        ClientRequest::Lock => {
            let status: ShieldStatus = request(&socket, message).await?;
            print_value(&status, json, |s| format!("Shield {}", s))
        }
        ClientRequest::ListApps => {
            let apps: Vec<ProtectedApp> = request(&socket, message).await?;
            print_value(&apps, json, |a| output::format_apps(a))
        }
        ClientRequest::AddApp { .. } => {
            let app: ProtectedApp = request(&socket, message).await?;
            print_value(&app, json, |a| format!("Protecting {} ({}), id {}", a.display_name, a.process_key, a.id))
        }
        ClientRequest::RemoveApp { ref id } => {
            let _: serde_json::Value = request(&socket, message).await?;
            print_value(id, json, |id| format!("Removed {}", id))
        }
        ClientRequest::Logs { .. } => {
            let logs: Vec<SecurityLog> = request(&socket, message).await?;
            print_value(&logs, json, |l| output::format_logs(l))
        }
        ClientRequest::ClearLogs => {
            let removed: usize = request(&socket, message).await?;
            print_value(&removed, json, |n| format!("Cleared {} entries", n))
        }
        ClientRequest::ListPolicies => {
            let policies: Vec<SecurityPolicy> = request(&socket, message).await?;
            print_value(&policies, json, |p| output::format_policies(p))
        }
        ClientRequest::TogglePolicy { .. } => {
            let policy: SecurityPolicy = request(&socket, message).await?;
            print_value(&policy, json, |p| {
                format!("{} {}", p.title, if p.enabled { "enabled" } else { "disabled" })
            })
        }
        ClientRequest::ShowIdle | ClientRequest::SetIdle { .. } => {
            let minutes: u32 = request(&socket, message).await?;
            print_value(&minutes, json, |m| format!("Idle timeout: {} min", m))
        }
        ClientRequest::ResetIdle => {
            let _: serde_json::Value = request(&socket, message).await?;
            print_value(&"reset", json, |_| "Idle timer reset".to_string())
        }
        ClientRequest::AutostartStatus | ClientRequest::SetAutostart { .. } => {
            let enabled: bool = request(&socket, message).await?;
            print_value(&enabled, json, |e| {
                format!("Autostart {}", if *e { "enabled" } else { "disabled" })
            })
        }
        ClientRequest::Candidates => {
            let candidates: Vec<AppCandidate> = request(&socket, message).await?;
            print_value(&candidates, json, |c| output::format_candidates(c))
        }
        ClientRequest::WhoAmI => {
            let user: String = request(&socket, message).await?;
            print_value(&user, json, |u| u.clone())
        }
        ClientRequest::Unlock | ClientRequest::Watch => Ok(()),
    }
}
