//! Storefront command-line client
//!
//! Thin front end over `AuthClient`:
//! 1. Loads configuration and restores the persisted session
//! 2. Runs one command through the authenticated pipeline
//! 3. Prints the response body to stdout, or the failure to stderr

mod config;
mod metrics;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use auth_client::{AuthClient, Notice, SessionEvents};
use storefront_session::SessionStore;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{ApiResponse, HttpTransport};

use crate::config::Config;

const USAGE: &str = "usage: storefront [--config PATH] [--metrics] <command>

commands:
  login <username>     log in (password from STOREFRONT_PASSWORD or password_file)
  logout               end the session
  whoami               show the current session
  get <path>
  post <path> <json>
  put <path> <json>
  delete <path>";

#[derive(Debug, PartialEq)]
enum Command {
    Login { username: String },
    Logout,
    Whoami,
    Get { path: String },
    Post { path: String, body: serde_json::Value },
    Put { path: String, body: serde_json::Value },
    Delete { path: String },
}

#[derive(Debug, PartialEq)]
struct Cli {
    config: Option<String>,
    metrics: bool,
    command: Command,
}

/// Parse arguments (without the program name).
fn parse_args(args: &[String]) -> Result<Cli> {
    let mut config = None;
    let mut metrics = false;
    let mut words = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => config = Some(iter.next().context("--config needs a path")?.clone()),
            "--metrics" => metrics = true,
            "-h" | "--help" => bail!("{USAGE}"),
            _ => words.push(arg.as_str()),
        }
    }

    let command = match words.as_slice() {
        ["login", username] => Command::Login {
            username: username.to_string(),
        },
        ["logout"] => Command::Logout,
        ["whoami"] => Command::Whoami,
        ["get", path] => Command::Get {
            path: path.to_string(),
        },
        ["post", path, body] => Command::Post {
            path: path.to_string(),
            body: parse_body(body)?,
        },
        ["put", path, body] => Command::Put {
            path: path.to_string(),
            body: parse_body(body)?,
        },
        ["delete", path] => Command::Delete {
            path: path.to_string(),
        },
        [] => bail!("missing command\n\n{USAGE}"),
        other => bail!("unrecognized command: {}\n\n{USAGE}", other.join(" ")),
    };

    Ok(Cli {
        config,
        metrics,
        command,
    })
}

fn parse_body(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).context("request body is not valid JSON")
}

/// Session notices go to stderr so stdout stays pipeable.
struct TerminalEvents;

impl SessionEvents for TerminalEvents {
    fn notify(&self, notice: Notice) {
        eprintln!("{}", notice.message());
    }

    fn redirect_to_login(&self) {
        eprintln!("Session ended. Run `storefront login <username>` to sign in.");
    }
}

fn user_error(e: auth_client::Error) -> anyhow::Error {
    anyhow!(e.user_message())
}

/// Pretty-print JSON bodies, pass anything else through.
fn print_response(out: &mut dyn Write, response: &ApiResponse) -> Result<()> {
    if response.body.is_empty() {
        return Ok(());
    }
    match response.json::<serde_json::Value>() {
        Ok(value) => writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?,
        Err(_) => writeln!(out, "{}", response.text())?,
    }
    Ok(())
}

async fn execute(
    client: &AuthClient,
    command: Command,
    password: Option<&str>,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        Command::Login { username } => {
            let password = password.context(
                "no password configured: set STOREFRONT_PASSWORD or [api] password_file",
            )?;
            let session = client
                .login(&username, password)
                .await
                .map_err(user_error)?;
            writeln!(
                out,
                "logged in as {}",
                session.display_name().unwrap_or(&username)
            )?;
        }
        Command::Logout => {
            client.logout().await;
            writeln!(out, "logged out")?;
        }
        Command::Whoami => {
            let session = client.session().await;
            if session.is_authenticated() {
                writeln!(out, "user: {}", session.display_name().unwrap_or("-"))?;
                writeln!(out, "id:   {}", session.user_id().unwrap_or("-"))?;
                writeln!(out, "role: {}", session.role().unwrap_or("-"))?;
            } else {
                writeln!(out, "not logged in")?;
            }
        }
        Command::Get { path } => {
            print_response(out, &client.get(&path).await.map_err(user_error)?)?;
        }
        Command::Post { path, body } => {
            print_response(out, &client.post_json(&path, &body).await.map_err(user_error)?)?;
        }
        Command::Put { path, body } => {
            print_response(out, &client.put_json(&path, &body).await.map_err(user_error)?)?;
        }
        Command::Delete { path } => {
            print_response(out, &client.delete(&path).await.map_err(user_error)?)?;
        }
    }
    Ok(())
}

async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    // Install before any client code emits metrics
    let prometheus = metrics::install_recorder()?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.api.base_url,
        session = %config.session.path.display(),
        "configuration loaded"
    );

    let transport = HttpTransport::new(
        config.api.base_url.clone(),
        Duration::from_secs(config.api.timeout_secs),
    )
    .context("failed to build HTTP transport")?;
    let store = SessionStore::load(config.session.path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to restore session from {}",
                config.session.path.display()
            )
        })?;

    let client = AuthClient::new(
        Arc::new(transport),
        Arc::new(store),
        Arc::new(TerminalEvents),
        config.endpoints.clone(),
    );

    let password = config.api.password.as_deref().map(String::as_str);
    let result = execute(&client, cli.command, password, &mut std::io::stdout()).await;

    if cli.metrics {
        eprint!("{}", prometheus.render());
    }
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    // JSON logs on stderr, LOG_LEVEL / RUST_LOG filter
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
