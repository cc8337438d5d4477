//! CLI argument parsing
//!
//! Handles the command-line interface using clap:
//! - `run` starts the daemon in the foreground
//! - `check-config` validates a configuration file
//! - every other subcommand is a request to a running daemon over IPC

use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::constants::{APP_NAME, DAEMON_RUN_SUBCOMMAND};
use crate::daemon::ipc::IpcMessage;

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Run the daemon in the foreground
    Run { config: Option<PathBuf> },
    /// Validate a configuration file and print the effective settings
    CheckConfig { config: Option<PathBuf>, json: bool },
    /// Talk to a running daemon
    Client(ClientConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub request: ClientRequest,
    pub config: Option<PathBuf>,
    /// Overrides the socket path from the configuration
    pub socket: Option<PathBuf>,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Status,
    /// Authenticate (credential read from stdin) then activate
    Unlock,
    Lock,
    ListApps,
    AddApp {
        display_name: String,
        process_key: String,
        category: String,
    },
    RemoveApp { id: String },
    Logs { limit: usize },
    ClearLogs,
    ListPolicies,
    TogglePolicy { id: String },
    ShowIdle,
    SetIdle { minutes: i64 },
    ResetIdle,
    AutostartStatus,
    SetAutostart { enabled: bool },
    Watch,
    Candidates,
    WhoAmI,
}

impl ClientRequest {
    /// IPC message for single-round-trip requests.
    /// `Unlock` and `Watch` are multi-step and return `None`.
    pub fn to_message(&self, request_id: String) -> Option<IpcMessage> {
        let message = match self {
            ClientRequest::Status => IpcMessage::GetStatus { request_id },
            ClientRequest::Lock => IpcMessage::LockShield { request_id },
            ClientRequest::ListApps => IpcMessage::ListApps { request_id },
            ClientRequest::AddApp {
                display_name,
                process_key,
                category,
            } => IpcMessage::AddApp {
                request_id,
                display_name: display_name.clone(),
                process_key: process_key.clone(),
                category: category.clone(),
            },
            ClientRequest::RemoveApp { id } => IpcMessage::RemoveApp {
                request_id,
                id: id.clone(),
            },
            ClientRequest::Logs { limit } => IpcMessage::ListLogs {
                request_id,
                limit: Some(*limit),
            },
            ClientRequest::ClearLogs => IpcMessage::ClearLogs { request_id },
            ClientRequest::ListPolicies => IpcMessage::ListPolicies { request_id },
            ClientRequest::TogglePolicy { id } => IpcMessage::TogglePolicy {
                request_id,
                id: id.clone(),
            },
            ClientRequest::ShowIdle => IpcMessage::GetIdleTimeout { request_id },
            ClientRequest::SetIdle { minutes } => IpcMessage::SetIdleTimeout {
                request_id,
                minutes: *minutes,
            },
            ClientRequest::ResetIdle => IpcMessage::ResetIdleTimer { request_id },
            ClientRequest::AutostartStatus => IpcMessage::GetAutostart { request_id },
            ClientRequest::SetAutostart { enabled } => IpcMessage::SetAutostart {
                request_id,
                enabled: *enabled,
            },
            ClientRequest::Candidates => IpcMessage::ListCandidates { request_id },
            ClientRequest::WhoAmI => IpcMessage::CurrentUser { request_id },
            ClientRequest::Unlock | ClientRequest::Watch => return None,
        };
        Some(message)
    }
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Configuration file (default: ~/.config/ficha/config.toml)")
        .value_parser(value_parser!(PathBuf))
        .global(true)
}

/// Build the command tree
pub fn build_cli() -> Command {
    Command::new(APP_NAME)
        .version(concat!(env!("FICHA_BUILD_VERSION"), " (", env!("GIT_HASH"), ")"))
        .about("Lock applications behind a credential shield")
        .long_about(
            "Ficha watches the process table and terminates watchlisted applications \
             while the shield is locked. Unlock with your account credential to use them.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(config_arg())
        .arg(
            Arg::new("socket")
                .short('s')
                .long("socket")
                .value_name("PATH")
                .help("Daemon socket path (overrides the configuration)")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .help("Output in JSON format")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new(DAEMON_RUN_SUBCOMMAND).about("Run the shield daemon in the foreground"))
        .subcommand(Command::new("check-config").about("Validate the configuration file"))
        .subcommand(Command::new("status").about("Show shield status and engine health"))
        .subcommand(Command::new("unlock").about("Authenticate (credential on stdin) and unlock the shield"))
        .subcommand(Command::new("lock").about("Lock the shield and resume enforcement"))
        .subcommand(
            Command::new("apps")
                .about("Manage protected applications")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List protected applications"))
                .subcommand(
                    Command::new("add")
                        .about("Protect an application")
                        .arg(Arg::new("name").required(true).help("Display name"))
                        .arg(Arg::new("process").required(true).help("Process key to match"))
                        .arg(
                            Arg::new("category")
                                .long("category")
                                .default_value("Other")
                                .help("Category label"),
                        ),
                )
                .subcommand(
                    Command::new("remove")
                        .about("Stop protecting an application")
                        .arg(Arg::new("id").required(true).help("Entry id from `apps list`")),
                ),
        )
        .subcommand(
            Command::new("logs")
                .about("Show the security log, newest first")
                .arg(
                    Arg::new("limit")
                        .short('n')
                        .long("limit")
                        .value_parser(value_parser!(usize))
                        .default_value("50")
                        .help("Number of entries"),
                )
                .arg(
                    Arg::new("clear")
                        .long("clear")
                        .action(ArgAction::SetTrue)
                        .help("Delete all entries"),
                ),
        )
        .subcommand(
            Command::new("policies")
                .about("Manage security policies")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List policies"))
                .subcommand(
                    Command::new("toggle")
                        .about("Enable or disable a policy")
                        .arg(Arg::new("id").required(true).help("Policy id")),
                ),
        )
        .subcommand(
            Command::new("idle")
                .about("Idle auto-lock settings")
                .subcommand_required(true)
                .subcommand(Command::new("show").about("Show the idle timeout"))
                .subcommand(
                    Command::new("set").about("Set the idle timeout").arg(
                        Arg::new("minutes")
                            .required(true)
                            .value_parser(value_parser!(i64))
                            .allow_negative_numbers(true)
                            .help("Minutes of inactivity before locking (1-10)"),
                    ),
                )
                .subcommand(Command::new("reset").about("Reset the idle timer")),
        )
        .subcommand(
            Command::new("autostart")
                .about("Start the daemon at login")
                .subcommand_required(true)
                .subcommand(Command::new("status").about("Show whether autostart is enabled"))
                .subcommand(Command::new("enable").about("Enable autostart"))
                .subcommand(Command::new("disable").about("Disable autostart")),
        )
        .subcommand(Command::new("watch").about("Stream live shield events"))
        .subcommand(Command::new("candidates").about("Suggest applications to protect"))
        .subcommand(Command::new("whoami").about("Show the account unlock credentials are checked against"))
}

fn required_string(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow!("Missing argument: {}", name))
}

fn nested_name(matches: &ArgMatches, parent: &str) -> Result<(String, ArgMatches)> {
    matches
        .subcommand()
        .map(|(name, sub)| (name.to_string(), sub.clone()))
        .ok_or_else(|| anyhow!("Missing {} subcommand", parent))
}

fn client_request(name: &str, sub: &ArgMatches) -> Result<ClientRequest> {
    let request = match name {
        "status" => ClientRequest::Status,
        "unlock" => ClientRequest::Unlock,
        "lock" => ClientRequest::Lock,
        "watch" => ClientRequest::Watch,
        "candidates" => ClientRequest::Candidates,
        "whoami" => ClientRequest::WhoAmI,
        "logs" => {
            if sub.get_flag("clear") {
                ClientRequest::ClearLogs
            } else {
                ClientRequest::Logs {
                    limit: sub.get_one::<usize>("limit").copied().unwrap_or(50),
                }
            }
        }
        "apps" => match nested_name(sub, "apps")? {
            (n, _) if n == "list" => ClientRequest::ListApps,
            (n, args) if n == "add" => ClientRequest::AddApp {
                display_name: required_string(&args, "name")?,
                process_key: required_string(&args, "process")?,
                category: required_string(&args, "category")?,
            },
            (n, args) if n == "remove" => ClientRequest::RemoveApp {
                id: required_string(&args, "id")?,
            },
            (n, _) => return Err(anyhow!("Unknown apps subcommand: {}", n)),
        },
        "policies" => match nested_name(sub, "policies")? {
            (n, _) if n == "list" => ClientRequest::ListPolicies,
            (n, args) if n == "toggle" => ClientRequest::TogglePolicy {
                id: required_string(&args, "id")?,
            },
            (n, _) => return Err(anyhow!("Unknown policies subcommand: {}", n)),
        },
        "idle" => match nested_name(sub, "idle")? {
            (n, _) if n == "show" => ClientRequest::ShowIdle,
            (n, args) if n == "set" => ClientRequest::SetIdle {
                minutes: args
                    .get_one::<i64>("minutes")
                    .copied()
                    .ok_or_else(|| anyhow!("Missing argument: minutes"))?,
            },
            (n, _) if n == "reset" => ClientRequest::ResetIdle,
            (n, _) => return Err(anyhow!("Unknown idle subcommand: {}", n)),
        },
        "autostart" => match nested_name(sub, "autostart")? {
            (n, _) if n == "status" => ClientRequest::AutostartStatus,
            (n, _) if n == "enable" => ClientRequest::SetAutostart { enabled: true },
            (n, _) if n == "disable" => ClientRequest::SetAutostart { enabled: false },
            (n, _) => return Err(anyhow!("Unknown autostart subcommand: {}", n)),
        },
        other => return Err(anyhow!("Unknown command: {}", other)),
    };
    Ok(request)
}

/// Parse an explicit argument list
pub fn parse_from<I, T>(args: I) -> Result<CliCommand>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_cli().try_get_matches_from(args)?;
    command_from_matches(&matches)
}

/// Parse the process arguments; exits on --help, --version and usage errors
pub fn parse_args() -> Result<CliCommand> {
    let matches = build_cli().get_matches();
    command_from_matches(&matches)
}

fn command_from_matches(matches: &ArgMatches) -> Result<CliCommand> {
    let (name, sub) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("No command given"))?;

    // Global args are propagated to the subcommand matches
    let config = sub.get_one::<PathBuf>("config").cloned();
    let json = sub.get_flag("json");

    match name {
        DAEMON_RUN_SUBCOMMAND => Ok(CliCommand::Run { config }),
        "check-config" => Ok(CliCommand::CheckConfig { config, json }),
        _ => Ok(CliCommand::Client(ClientConfig {
            request: client_request(name, sub)?,
            config,
            socket: sub.get_one::<PathBuf>("socket").cloned(),
            json,
        })),
    }
}
