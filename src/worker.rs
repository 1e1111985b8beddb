//! Worker process: one tab's session or history browser behind the bus.
//!
//! The socket reader runs as its own task so `/cancel` and `shutdown` take
//! effect while a turn is still streaming. Everything the handler produces is
//! written by a single writer task, in emission order.

use std::future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agent_protocol::TabId;
use agent_session::{
    parse_slash_command, update_channel, SessionDriver, SessionOptions, SessionUpdate,
    SlashCommand, UpdateReceiver,
};
use anyhow::Context;
use stream_api::{ApiClient, CancellationSignal};
use tab_bus::{BusConnection, BusMessage, BusReader, BusWriter, TabMode};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::config::RuntimeConfig;
use crate::history::{BrowserOutput, HistoryBrowser};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    pub tab_id: TabId,
    pub mode: TabMode,
    pub root: PathBuf,
}

/// Connects to the supervisor's socket and serves the tab until `shutdown`
/// or until the supervisor goes away.
pub async fn run_worker(
    socket: &Path,
    options: WorkerOptions,
    config: &RuntimeConfig,
) -> anyhow::Result<()> {
    let connection = BusConnection::connect(socket)
        .await
        .with_context(|| format!("tab {} could not reach the supervisor", options.tab_id))?;
    serve(connection, options, config).await
}

pub async fn serve(
    connection: BusConnection,
    options: WorkerOptions,
    config: &RuntimeConfig,
) -> anyhow::Result<()> {
    let (reader, mut writer) = connection.into_split();
    writer
        .send(&BusMessage::Register {
            tab_id: options.tab_id,
            mode: options.mode,
        })
        .await
        .context("failed to register with the supervisor")?;
    tracing::info!(tab_id = options.tab_id, mode = %options.mode, "worker registered");

    let (outbox, outbox_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_outbox(writer, outbox_rx));

    let result = match options.mode {
        TabMode::Chat => run_chat(reader, outbox, &options, config).await,
        TabMode::History => run_history(reader, outbox, &options).await,
    };

    if let Err(error) = writer_task.await {
        tracing::warn!(tab_id = options.tab_id, error = %error, "bus writer task failed");
    }
    tracing::info!(tab_id = options.tab_id, "worker stopped");
    result
}

/// Lets the reader cancel the turn in flight.
struct TurnControl {
    in_flight: Arc<AtomicBool>,
    cancel: CancellationSignal,
}

async fn run_chat(
    reader: BusReader,
    outbox: UnboundedSender<BusMessage>,
    options: &WorkerOptions,
    config: &RuntimeConfig,
) -> anyhow::Result<()> {
    let tab_id = options.tab_id;
    let api = ApiClient::new(config.api_config()).context("failed to build the API client")?;
    let (updates, update_rx) = update_channel();
    let session_options = SessionOptions::new(tab_id)
        .with_max_tool_depth(config.max_tool_depth)
        .with_history(config.history);
    let mut driver = SessionDriver::for_workspace(api, &options.root, session_options, updates)
        .with_context(|| format!("failed to open workspace {}", options.root.display()))?;

    let relay = tokio::spawn(relay_updates(tab_id, update_rx, outbox));
    let in_flight = Arc::new(AtomicBool::new(false));
    let (input_tx, mut inputs) = mpsc::unbounded_channel();
    let control = TurnControl {
        in_flight: Arc::clone(&in_flight),
        cancel: driver.cancel_handle(),
    };
    let reader_task = tokio::spawn(read_inputs(reader, tab_id, input_tx, Some(control)));

    driver.publish_state();
    loop {
        tokio::select! {
            input = inputs.recv() => {
                let Some(text) = input else { break };
                in_flight.store(true, Ordering::SeqCst);
                driver.handle_input(&text).await;
                in_flight.store(false, Ordering::SeqCst);
            }
            () = wait_until(driver.next_poll()) => driver.poll_login(false).await,
        }
    }

    drop(driver);
    reader_task.abort();
    if let Err(error) = relay.await {
        tracing::warn!(tab_id, error = %error, "update relay failed");
    }
    Ok(())
}

async fn run_history(
    reader: BusReader,
    outbox: UnboundedSender<BusMessage>,
    options: &WorkerOptions,
) -> anyhow::Result<()> {
    let tab_id = options.tab_id;
    let mut browser = HistoryBrowser::open(&options.root);
    let (input_tx, mut inputs) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(read_inputs(reader, tab_id, input_tx, None));

    send_browser_output(tab_id, &outbox, browser.startup());
    while let Some(text) = inputs.recv().await {
        send_browser_output(tab_id, &outbox, browser.handle_input(&text));
    }

    reader_task.abort();
    Ok(())
}

/// Forwards this tab's `input` messages until `shutdown` or end of stream.
async fn read_inputs(
    mut reader: BusReader,
    tab_id: TabId,
    inputs: UnboundedSender<String>,
    control: Option<TurnControl>,
) {
    loop {
        let message = match reader.recv().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!(tab_id, "supervisor closed the bus");
                break;
            }
            Err(error) => {
                tracing::warn!(tab_id, error = %error, "bus read failed");
                break;
            }
        };

        match message {
            BusMessage::Input { tab_id: target, text } if target == tab_id => {
                if let Some(control) = &control {
                    let cancel_requested =
                        matches!(parse_slash_command(&text), Some(SlashCommand::Cancel));
                    if cancel_requested && control.in_flight.load(Ordering::SeqCst) {
                        tracing::info!(tab_id, "cancelling turn");
                        control.cancel.store(true, Ordering::SeqCst);
                        continue;
                    }
                }
                if inputs.send(text).is_err() {
                    break;
                }
            }
            BusMessage::Shutdown { tab_id: target } if target == tab_id => {
                tracing::info!(tab_id, "shutdown requested");
                break;
            }
            other => {
                tracing::debug!(tab_id, kind = other.kind(), target = other.tab_id(), "ignoring bus message");
            }
        }
    }

    if let Some(control) = &control {
        if control.in_flight.load(Ordering::SeqCst) {
            control.cancel.store(true, Ordering::SeqCst);
        }
    }
}

async fn relay_updates(
    tab_id: TabId,
    mut updates: UpdateReceiver,
    outbox: UnboundedSender<BusMessage>,
) {
    while let Some(update) = updates.recv().await {
        let message = match update {
            SessionUpdate::Line(text) => BusMessage::Line { tab_id, text },
            SessionUpdate::Stream(text) => BusMessage::Stream { tab_id, text },
            SessionUpdate::State(footer_state) => BusMessage::State {
                tab_id,
                footer_state,
            },
        };
        if outbox.send(message).is_err() {
            break;
        }
    }
}

fn send_browser_output(
    tab_id: TabId,
    outbox: &UnboundedSender<BusMessage>,
    output: Vec<BrowserOutput>,
) {
    for item in output {
        let message = match item {
            BrowserOutput::Line(text) => BusMessage::Line { tab_id, text },
            BrowserOutput::Rows(rows) => BusMessage::History { tab_id, rows },
        };
        let _ = outbox.send(message);
    }
}

async fn write_outbox(mut writer: BusWriter, mut outbox: UnboundedReceiver<BusMessage>) {
    while let Some(message) = outbox.recv().await {
        if let Err(error) = writer.send(&message).await {
            tracing::warn!(error = %error, "bus write failed; dropping remaining updates");
            return;
        }
    }
    if let Err(error) = writer.close().await {
        tracing::debug!(error = %error, "bus close failed");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
