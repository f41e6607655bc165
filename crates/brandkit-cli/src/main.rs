//! brandkit - sign in to the brand panel API and keep the session alive.
//!
//! Usage:
//!   brandkit [--log-file] login [--email EMAIL] [--remember]
//!   brandkit [--log-file] logout
//!   brandkit [--log-file] status
//!   brandkit [--log-file] get <PATH>
//!   brandkit [--log-file] keepalive

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use brandkit_core::{AuthManager, Config, LoginCredentials, PasswordVault};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long `logout` waits for the remote revocation before giving up
const REMOTE_LOGOUT_TIMEOUT_SECS: u64 = 5;

const USAGE: &str = "\
Usage: brandkit [--log-file] <command>

Commands:
  login [--email EMAIL] [--remember]   Sign in (optionally remember the password)
  logout                               Sign out and revoke the session
  status                               Show the current session
  get <PATH>                           GET an API path and print the JSON response
  keepalive                            Keep the session renewed until Ctrl-C";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login { email: Option<String>, remember: bool },
    Logout,
    Status,
    Get { path: String },
    Keepalive,
    Help,
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    log_file: bool,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut log_file = false;
    let mut rest = args.iter().map(String::as_str).peekable();
    while rest.peek() == Some(&"--log-file") {
        log_file = true;
        rest.next();
    }

    let command = match rest.next() {
        None | Some("help") | Some("--help") | Some("-h") => Command::Help,
        Some("login") => {
            let mut email = None;
            let mut remember = false;
            while let Some(arg) = rest.next() {
                match arg {
                    "--email" => {
                        let value = rest.next().context("--email needs a value")?;
                        email = Some(value.to_string());
                    }
                    "--remember" => remember = true,
                    other => bail!("Unknown login option: {}", other),
                }
            }
            Command::Login { email, remember }
        }
        Some("logout") => Command::Logout,
        Some("status") => Command::Status,
        Some("get") => {
            let path = rest.next().context("get needs an API path, e.g. /brands")?;
            let path = if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{}", path)
            };
            Command::Get { path }
        }
        Some("keepalive") => Command::Keepalive,
        Some(other) => bail!("Unknown command: {}\n\n{}", other, USAGE),
    };

    if let Some(extra) = rest.next() {
        bail!("Unexpected argument: {}", extra);
    }
    Ok(Cli { log_file, command })
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=brandkit_core=debug).
/// With a log directory, output is also written to a daily log file there;
/// keep the returned guard alive so buffered lines get flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "brandkit.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let mut config = Config::load()?;
    config.apply_env();

    let log_dir = if cli.log_file {
        let dir = config.cache_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Some(dir)
    } else {
        None
    };
    let _log_guard = init_tracing(log_dir.as_deref());
    info!(command = ?cli.command, api = %config.api_base_url, "brandkit starting");

    match cli.command {
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        Command::Login { email, remember } => login(config, email, remember).await,
        Command::Logout => logout(config).await,
        Command::Status => status(config),
        Command::Get { path } => get(config, &path).await,
        Command::Keepalive => keepalive(config).await,
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn prompt_email(last_email: Option<&str>) -> Result<String> {
    let email = match last_email {
        Some(last) => {
            let input = prompt(&format!("Email [{}]: ", last))?;
            if input.is_empty() {
                last.to_string()
            } else {
                input
            }
        }
        None => prompt("Email: ")?,
    };
    if email.is_empty() {
        bail!("Email is required");
    }
    Ok(email)
}

fn prompt_password(email: &str) -> Result<String> {
    if PasswordVault::has_credentials(email) {
        let answer = prompt("Use stored password? [Y/n]: ")?;
        if answer.to_lowercase() != "n" {
            return PasswordVault::get_password(email);
        }
    }
    Ok(rpassword::prompt_password("Password: ")?)
}

async fn login(mut config: Config, email: Option<String>, remember: bool) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    let password = prompt_password(&email)?;

    let manager = AuthManager::from_config(config.clone())?;
    println!("Authenticating...");
    let session = manager
        .login(&LoginCredentials::new(email.clone(), password.clone()))
        .await?;

    if remember {
        if let Err(e) = PasswordVault::store(&email, &password) {
            warn!(error = %e, "Failed to store password in keychain");
        }
    }
    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!(
        "Signed in as {} (token valid for {} minutes)",
        session.user.display_name(),
        session.minutes_until_expiry(chrono::Utc::now())
    );
    Ok(())
}

async fn logout(config: Config) -> Result<()> {
    let manager = AuthManager::from_config(config)?;
    if manager.restore().is_none() {
        println!("Not signed in");
        return Ok(());
    }

    if let Some(remote) = manager.logout() {
        let timeout = Duration::from_secs(REMOTE_LOGOUT_TIMEOUT_SECS);
        if tokio::time::timeout(timeout, remote).await.is_err() {
            warn!("Remote logout did not finish in time");
        }
    }
    println!("Signed out");
    Ok(())
}

fn status(config: Config) -> Result<()> {
    // The store only reads the session file; no renewal is started here
    let backend = brandkit_core::FileBackend::new(config.cache_dir()?);
    let store = brandkit_core::CredentialStore::new(Arc::new(backend));
    match store.load() {
        Some(session) => {
            let now = chrono::Utc::now();
            println!("Signed in as {}", session.user.display_name());
            if session.is_expired_at(now) {
                println!("Access token expired at {}", session.expires_at);
            } else {
                println!(
                    "Access token expires at {} ({} minutes)",
                    session.expires_at,
                    session.minutes_until_expiry(now)
                );
            }
            if !session.has_refresh_token() {
                println!("No refresh token: sign in again when it expires");
            }
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

async fn get(config: Config, path: &str) -> Result<()> {
    let manager = AuthManager::from_config(config)?;
    if manager.restore().is_none() {
        bail!("Not signed in. Run `brandkit login` first.");
    }

    match manager.gateway().get_json::<serde_json::Value>(path).await {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Err(e) if e.is_session_invalid() => {
            bail!("Session expired. Run `brandkit login` to sign in again.")
        }
        Err(e) => Err(e.into()),
    }
}

async fn keepalive(config: Config) -> Result<()> {
    let manager = AuthManager::from_config(config)?;
    let Some(session) = manager.restore() else {
        bail!("Not signed in. Run `brandkit login` first.");
    };
    println!(
        "Keeping session for {} alive (Ctrl-C to stop)",
        session.user.display_name()
    );

    let ended = Arc::new(Notify::new());
    let signal = ended.clone();
    let _changes = manager.store().on_change(move |change| match change.session.as_deref() {
        Some(session) => println!("Session renewed; expires at {}", session.expires_at),
        None => signal.notify_one(),
    });
    manager.spawn_storage_watcher();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted; leaving session in place");
            Ok(())
        }
        _ = ended.notified() => {
            bail!("Session ended. Run `brandkit login` to sign in again.")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_login_options() {
        let cli = parse_args(&args(&["login", "--email", "a@example.com", "--remember"])).unwrap();
        assert!(!cli.log_file);
        assert_eq!(
            cli.command,
            Command::Login {
                email: Some("a@example.com".to_string()),
                remember: true
            }
        );
    }

    #[test]
    fn test_parse_get_normalizes_path() {
        let cli = parse_args(&args(&["--log-file", "get", "brands"])).unwrap();
        assert!(cli.log_file);
        assert_eq!(
            cli.command,
            Command::Get {
                path: "/brands".to_string()
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&["get"])).is_err());
        assert!(parse_args(&args(&["login", "--email"])).is_err());
        assert!(parse_args(&args(&["status", "extra"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
    }

    #[test]
    fn test_no_command_shows_help() {
        assert_eq!(parse_args(&[]).unwrap().command, Command::Help);
    }
}
