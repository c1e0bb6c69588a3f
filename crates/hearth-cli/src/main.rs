//! Hearth terminal client.
//!
//! # Usage
//!
//! ```bash
//! hearth --endpoint 127.0.0.1:4433 --room general --user ada --name Ada --token "$TOKEN"
//! ```
//!
//! Each line typed is sent as a message; `/help` lists the commands. Logs go
//! to stderr so they can be redirected away from the transcript.

mod input;
mod output;

use std::io::Write;

use clap::Parser;
use hearth_app::{ChatHandle, QuicDriver, Runtime, SessionView, SystemEnv};
use hearth_client::{DEFAULT_ENDPOINT, DeliveryState, SessionConfig, SessionIdentity};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::input::{HELP, Input};

/// Hearth chat client
#[derive(Parser, Debug)]
#[command(name = "hearth")]
#[command(about = "Terminal client for a Hearth chat room")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Room to join
    #[arg(short, long)]
    room: String,

    /// Your user id
    #[arg(short, long)]
    user: String,

    /// Display name shown to others (defaults to the user id)
    #[arg(short, long)]
    name: Option<String>,

    /// Bearer token
    #[arg(short, long, env = "HEARTH_TOKEN")]
    token: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let identity = SessionIdentity {
        room_id: args.room,
        display_name: args.name.unwrap_or_else(|| args.user.clone()),
        user_id: args.user,
    };
    let config = SessionConfig { endpoint: args.endpoint, ..SessionConfig::default() };

    tracing::info!(endpoint = %config.endpoint, room = %identity.room_id, "joining");

    let (runtime, handle) =
        Runtime::new(QuicDriver::new(), SystemEnv::new(), config, identity, args.token, true);
    let runtime = tokio::spawn(runtime.run());
    let printer = tokio::spawn(print_changes(handle.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !dispatch(&handle, Input::parse(&line)).await? {
            break;
        }
    }

    handle.dispose().await;
    runtime.await?;
    printer.await??;
    Ok(())
}

/// Apply one line of input. Returns `false` once the user wants to leave.
async fn dispatch(handle: &ChatHandle, input: Input) -> std::io::Result<bool> {
    let result = match input {
        Input::Quit => return Ok(false),
        Input::Empty => Ok(()),
        Input::Help => {
            writeln!(std::io::stdout().lock(), "{HELP}")?;
            Ok(())
        },
        Input::Unknown(name) => {
            writeln!(std::io::stdout().lock(), "unknown command /{name}, try /help")?;
            Ok(())
        },
        Input::Message(text) => handle.send_message(text).await.map(|_| ()),
        Input::Older => handle.load_older_messages().await,
        Input::Typing => handle.start_typing().await,
        Input::Reconnect(token) => handle.reconnect(token).await,
        Input::Retry => {
            for token in failed(&handle.view()) {
                if let Err(e) = handle.retry_message(token).await {
                    return report(&e).map(|()| false);
                }
            }
            Ok(())
        },
        Input::Discard => {
            for token in failed(&handle.view()) {
                if let Err(e) = handle.discard_message(token).await {
                    return report(&e).map(|()| false);
                }
            }
            Ok(())
        },
    };

    match result {
        Ok(()) => Ok(true),
        Err(hearth_app::RuntimeError::Stopped) => Ok(false),
        Err(e) => report(&e).map(|()| true),
    }
}

fn failed(view: &SessionView) -> Vec<hearth_client::CorrelationId> {
    view.messages
        .iter()
        .filter(|m| m.delivery == DeliveryState::Failed)
        .filter_map(|m| m.correlation)
        .collect()
}

fn report(error: &hearth_app::RuntimeError) -> std::io::Result<()> {
    writeln!(std::io::stdout().lock(), "! {error}")
}

/// Print view changes until the runtime stops publishing.
async fn print_changes(mut view: watch::Receiver<SessionView>) -> std::io::Result<()> {
    let mut prev = SessionView::default();
    loop {
        let next = view.borrow_and_update().clone();
        let lines = output::changes(&prev, &next);
        if !lines.is_empty() {
            let mut out = std::io::stdout().lock();
            for line in lines {
                writeln!(out, "{line}")?;
            }
            out.flush()?;
        }
        prev = next;

        if view.changed().await.is_err() {
            return Ok(());
        }
    }
}
