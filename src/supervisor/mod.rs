//! Tab supervisor.
//!
//! Owns the terminal and the bus listener, spawns one worker per tab, routes
//! typed input to the active tab and renders what workers report. A worker
//! crash is seen as socket closure, or as process exit for a worker that never
//! registered; either way the tab turns inert.

mod launch;
mod meta;
mod tab;

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use agent_protocol::{FooterState, TabId};
use anyhow::Context;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGWINCH};
use signal_hook::iterator::Signals;
use tab_bus::{BusConnection, BusListener, BusMessage, TabMode};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;

use crate::history::format_row;
use crate::render::Renderer;

pub use launch::{ProcessLauncher, TabHandle, TabLauncher, CLOSE_GRACE};
pub use meta::{parse_meta_command, unescape_input, MetaCommand, META_HELP, META_PREFIX};
pub use tab::{Tab, TabStatus, TabView, QUEUED_INPUT_LIMIT, SCROLLBACK_LIMIT};

/// Lines replayed when switching to a tab.
pub const REPLAY_LINES: usize = 200;

/// How often starting tabs are checked for a worker that already died.
pub const WORKER_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Something from the terminal side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Input(String),
    Resize,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

type ConnId = u64;

enum Inbound {
    Message { conn: ConnId, message: BusMessage },
    Closed { conn: ConnId },
}

/// `$XDG_RUNTIME_DIR/agent-tabs-<pid>.sock`, or the same under the temp dir.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .filter(|dir| dir.is_dir())
        .unwrap_or_else(std::env::temp_dir);
    dir.join(format!("agent-tabs-{}.sock", std::process::id()))
}

pub struct Supervisor<L: TabLauncher, W: Write> {
    launcher: L,
    renderer: Renderer<W>,
    tabs: BTreeMap<TabId, Tab>,
    active: Option<TabId>,
    next_tab_id: TabId,
    /// Accepted sockets that have not sent `register` yet.
    unbound: HashMap<ConnId, UnboundedSender<BusMessage>>,
    bound: HashMap<ConnId, TabId>,
    next_conn: ConnId,
}

impl<L: TabLauncher, W: Write> Supervisor<L, W> {
    pub fn new(launcher: L, renderer: Renderer<W>) -> Self {
        Self {
            launcher,
            renderer,
            tabs: BTreeMap::new(),
            active: None,
            next_tab_id: 1,
            unbound: HashMap::new(),
            bound: HashMap::new(),
            next_conn: 0,
        }
    }

    #[must_use]
    pub fn tab(&self, tab_id: TabId) -> Option<&Tab> {
        self.tabs.get(&tab_id)
    }

    pub fn tabs(&self) -> impl Iterator<Item = &Tab> {
        self.tabs.values()
    }

    #[must_use]
    pub fn active_tab(&self) -> Option<TabId> {
        self.active
    }

    #[must_use]
    pub fn renderer(&self) -> &Renderer<W> {
        &self.renderer
    }

    /// Spawns a worker for a new tab and switches to it.
    pub fn open_tab(&mut self, mode: TabMode) -> anyhow::Result<TabId> {
        let tab_id = self.next_tab_id;
        let handle = self.launcher.launch(tab_id, mode)?;
        self.next_tab_id += 1;
        self.tabs.insert(tab_id, Tab::new(tab_id, mode, handle));
        tracing::info!(tab_id, %mode, "opened tab");
        self.activate(tab_id);
        Ok(tab_id)
    }

    /// Serves the bus and terminal events until `:quit` or the event source
    /// ends, then shuts every tab down. Accept and spawn failures are fatal.
    pub async fn run(
        &mut self,
        listener: &BusListener,
        events: &mut UnboundedReceiver<UiEvent>,
    ) -> anyhow::Result<()> {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let mut worker_check = tokio::time::interval(WORKER_CHECK_INTERVAL);
        worker_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let connection = accepted.context("bus accept failed")?;
                    self.attach_connection(connection, &inbound_tx);
                }
                Some(inbound) = inbound_rx.recv() => match inbound {
                    Inbound::Message { conn, message } => self.handle_message(conn, message),
                    Inbound::Closed { conn } => self.handle_closed(conn),
                },
                event = events.recv() => match event {
                    Some(UiEvent::Input(line)) => {
                        if self.handle_user_line(&line)? == Flow::Quit {
                            break;
                        }
                    }
                    Some(UiEvent::Resize) => self.redraw(),
                    Some(UiEvent::Quit) | None => break,
                },
                _ = worker_check.tick() => self.reap_unregistered_workers(),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Interprets a meta-command or forwards the line to the active tab.
    pub fn handle_user_line(&mut self, line: &str) -> anyhow::Result<Flow> {
        if let Some(command) = parse_meta_command(line) {
            return self.run_meta(command);
        }

        let text = unescape_input(line).trim();
        if text.is_empty() {
            return Ok(Flow::Continue);
        }
        let Some(tab_id) = self.active else {
            self.notice("No open tab. Type :new to open one.");
            return Ok(Flow::Continue);
        };
        let exited = self
            .tabs
            .get(&tab_id)
            .map_or(true, |tab| tab.status == TabStatus::Exited);
        if exited {
            self.notice(&format!("Tab {tab_id} has exited. Type :new to open another."));
        } else if let Some(tab) = self.tabs.get_mut(&tab_id) {
            if !tab.send_input(text.to_string()) {
                self.notice(&format!(
                    "Tab {tab_id} is still starting and has {QUEUED_INPUT_LIMIT} lines queued; input dropped."
                ));
            }
        }
        Ok(Flow::Continue)
    }

    fn run_meta(&mut self, command: MetaCommand) -> anyhow::Result<Flow> {
        match command {
            MetaCommand::New(mode) => {
                self.open_tab(mode)?;
            }
            MetaCommand::Switch(tab_id) => {
                if self.tabs.contains_key(&tab_id) {
                    self.activate(tab_id);
                } else {
                    self.notice(&format!("No tab {tab_id}."));
                }
            }
            MetaCommand::List => self.list_tabs(),
            MetaCommand::History => {
                let existing = self
                    .tabs
                    .values()
                    .find(|tab| tab.mode == TabMode::History && tab.status != TabStatus::Exited)
                    .map(|tab| tab.id);
                match existing {
                    Some(tab_id) => self.activate(tab_id),
                    None => {
                        self.open_tab(TabMode::History)?;
                    }
                }
            }
            MetaCommand::Close(target) => self.close_tab(target),
            MetaCommand::Quit => return Ok(Flow::Quit),
            MetaCommand::Help => self.notice(META_HELP),
            MetaCommand::Usage(usage) => self.notice(&format!("Usage: {usage}")),
            MetaCommand::Unknown(name) => {
                self.notice(&format!("Unknown command :{name}. Type :help for commands."));
            }
        }
        Ok(Flow::Continue)
    }

    fn list_tabs(&mut self) {
        if self.tabs.is_empty() {
            self.notice("No tabs.");
            return;
        }
        let lines: Vec<String> = self
            .tabs
            .values()
            .map(|tab| {
                let marker = if Some(tab.id) == self.active { '*' } else { ' ' };
                format!("{marker} {}", tab.describe())
            })
            .collect();
        self.notice(&lines.join("\n"));
    }

    fn close_tab(&mut self, target: Option<TabId>) {
        let Some(tab_id) = target.or(self.active) else {
            self.notice("No open tab.");
            return;
        };
        let Some(mut tab) = self.tabs.remove(&tab_id) else {
            self.notice(&format!("No tab {tab_id}."));
            return;
        };
        self.bound.retain(|_, bound| *bound != tab_id);
        if let Some(handle) = tab.shut_down() {
            handle.reap_in_background(tab_id);
        }
        tracing::info!(tab_id, "closed tab");

        if self.active == Some(tab_id) {
            self.active = None;
            match self.tabs.keys().next_back().copied() {
                Some(next) => self.activate(next),
                None => self.notice(&format!("Closed tab {tab_id}. Type :new to open one.")),
            }
        } else {
            self.notice(&format!("Closed tab {tab_id}."));
        }
    }

    fn attach_connection(
        &mut self,
        connection: BusConnection,
        inbound: &UnboundedSender<Inbound>,
    ) {
        self.next_conn += 1;
        let conn = self.next_conn;
        let (mut reader, mut writer) = connection.into_split();
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<BusMessage>();

        tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                if let Err(error) = writer.send(&message).await {
                    tracing::debug!(conn, error = %error, "bus write failed");
                    break;
                }
            }
            let _ = writer.close().await;
        });

        let inbound = inbound.clone();
        tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(Some(message)) => {
                        if inbound.send(Inbound::Message { conn, message }).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        tracing::debug!(conn, error = %error, "bus read failed");
                        break;
                    }
                }
            }
            let _ = inbound.send(Inbound::Closed { conn });
        });

        self.unbound.insert(conn, outbox);
    }

    fn handle_message(&mut self, conn: ConnId, message: BusMessage) {
        if let BusMessage::Register { tab_id, mode } = message {
            self.register(conn, tab_id, mode);
            return;
        }

        let Some(&tab_id) = self.bound.get(&conn) else {
            tracing::debug!(conn, kind = message.kind(), "message before register");
            return;
        };
        if message.tab_id() != tab_id {
            tracing::warn!(tab_id, claimed = message.tab_id(), "message for another tab");
            return;
        }
        let is_active = self.active == Some(tab_id);
        let Some(tab) = self.tabs.get_mut(&tab_id) else {
            return;
        };

        match message {
            BusMessage::Line { text, .. } => {
                tab.view.live.clear();
                tab.view.push_line(text.clone());
                if is_active {
                    self.paint(|renderer| renderer.line(&text));
                }
            }
            BusMessage::Stream { text, .. } => {
                tab.view.live.clone_from(&text);
                if is_active {
                    self.paint(|renderer| renderer.live(&text));
                }
            }
            BusMessage::History { rows, .. } => {
                let lines: Vec<String> = rows.iter().map(format_row).collect();
                for line in &lines {
                    tab.view.push_line(line.clone());
                }
                tab.view.history_rows = rows;
                if is_active && !lines.is_empty() {
                    let text = lines.join("\n");
                    self.paint(|renderer| renderer.line(&text));
                }
            }
            BusMessage::State { footer_state, .. } => {
                let changed = tab
                    .view
                    .footer
                    .as_ref()
                    .map_or(true, |previous| !same_apart_from_busy(previous, &footer_state));
                tab.view.footer = Some(footer_state.clone());
                if is_active && changed {
                    let text = format!("[{}]", footer_state.render());
                    self.paint(|renderer| renderer.line(&text));
                }
            }
            other => {
                tracing::debug!(tab_id, kind = other.kind(), "ignoring worker message");
            }
        }
    }

    fn register(&mut self, conn: ConnId, tab_id: TabId, mode: TabMode) {
        let Some(outbox) = self.unbound.remove(&conn) else {
            tracing::warn!(conn, tab_id, "duplicate register");
            return;
        };
        let Some(tab) = self.tabs.get_mut(&tab_id) else {
            tracing::warn!(tab_id, "register for unknown tab");
            let _ = outbox.send(BusMessage::Shutdown { tab_id });
            return;
        };
        if tab.status != TabStatus::Starting || tab.mode != mode {
            tracing::warn!(tab_id, %mode, status = %tab.status, "rejecting register");
            let _ = outbox.send(BusMessage::Shutdown { tab_id });
            return;
        }

        tab.attach(outbox);
        self.bound.insert(conn, tab_id);
        tracing::info!(tab_id, %mode, "worker registered");
    }

    fn handle_closed(&mut self, conn: ConnId) {
        if self.unbound.remove(&conn).is_some() {
            self.reap_unregistered_workers();
            return;
        }
        let Some(tab_id) = self.bound.remove(&conn) else {
            return;
        };
        tracing::warn!(tab_id, "worker disconnected");
        self.mark_exited(tab_id);
    }

    /// Marks starting tabs whose worker is already gone as exited. Such a
    /// worker never opened a socket the supervisor could see close.
    fn reap_unregistered_workers(&mut self) {
        let dead: Vec<TabId> = self
            .tabs
            .values_mut()
            .filter_map(|tab| tab.died_before_register().then_some(tab.id))
            .collect();
        for tab_id in dead {
            tracing::warn!(tab_id, "worker exited before registering");
            self.mark_exited(tab_id);
        }
    }

    fn mark_exited(&mut self, tab_id: TabId) {
        let Some(tab) = self.tabs.get_mut(&tab_id) else {
            return;
        };
        let handle = tab.detach();
        let notice = format!("Tab {tab_id} exited.");
        tab.view.push_line(notice.clone());
        if let Some(handle) = handle {
            handle.reap_in_background(tab_id);
        }
        if self.active == Some(tab_id) {
            self.paint(|renderer| {
                renderer.live("")?;
                renderer.line(&notice)
            });
        }
    }

    fn activate(&mut self, tab_id: TabId) {
        self.active = Some(tab_id);
        self.redraw();
    }

    /// Clears the screen and replays the active tab.
    fn redraw(&mut self) {
        let summary = self.tab_strip();
        let Some(tab) = self.active.and_then(|tab_id| self.tabs.get(&tab_id)) else {
            self.paint(|renderer| {
                renderer.reset()?;
                renderer.line(&summary)
            });
            return;
        };

        let mut text = vec![summary];
        text.extend(tab.view.tail(REPLAY_LINES).cloned());
        if let Some(footer) = &tab.view.footer {
            text.push(format!("[{}]", footer.render()));
        }
        let text = text.join("\n");
        let live = tab.view.live.clone();
        self.paint(|renderer| {
            renderer.reset()?;
            renderer.line(&text)?;
            renderer.live(&live)
        });
    }

    /// `tabs: 1:chat *2:history 3:chat(exited)`
    fn tab_strip(&self) -> String {
        let mut parts = Vec::with_capacity(self.tabs.len());
        for tab in self.tabs.values() {
            let marker = if Some(tab.id) == self.active { "*" } else { "" };
            let exited = if tab.status == TabStatus::Exited {
                "(exited)"
            } else {
                ""
            };
            parts.push(format!("{marker}{}:{}{exited}", tab.id, tab.mode));
        }
        format!("tabs: {}", parts.join(" "))
    }

    /// Supervisor-generated text for the active tab's scrollback.
    fn notice(&mut self, text: &str) {
        if let Some(tab) = self.active.and_then(|tab_id| self.tabs.get_mut(&tab_id)) {
            tab.view.push_line(text);
        }
        self.paint(|renderer| renderer.line(text));
    }

    fn paint(&mut self, draw: impl FnOnce(&mut Renderer<W>) -> std::io::Result<()>) {
        if let Err(error) = draw(&mut self.renderer) {
            tracing::warn!(error = %error, "terminal write failed");
        }
    }

    /// Sends `shutdown` to every tab and waits for their workers.
    pub async fn shutdown(&mut self) {
        let mut handles = Vec::new();
        for tab in self.tabs.values_mut() {
            if let Some(handle) = tab.shut_down() {
                handles.push((tab.id, handle));
            }
        }
        self.unbound.clear();
        self.bound.clear();
        for (tab_id, handle) in handles {
            handle.reap(tab_id).await;
        }
    }
}

fn same_apart_from_busy(previous: &FooterState, next: &FooterState) -> bool {
    let mut previous = previous.clone();
    previous.busy = next.busy;
    previous == *next
}

/// Forwards terminal signals as [`UiEvent`]s from a dedicated thread.
pub fn spawn_signal_thread(
    events: UnboundedSender<UiEvent>,
) -> anyhow::Result<signal_hook::iterator::Handle> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGWINCH])
        .context("failed to register signal handlers")?;
    let handle = signals.handle();

    thread::spawn(move || {
        for signal in signals.forever() {
            let event = if signal == SIGWINCH {
                UiEvent::Resize
            } else {
                tracing::info!(signal, "terminating on signal");
                UiEvent::Quit
            };
            if events.send(event).is_err() {
                break;
            }
        }
    });

    Ok(handle)
}

/// Reads stdin line by line on a dedicated thread; end of input quits.
pub fn spawn_input_thread(events: UnboundedSender<UiEvent>) {
    thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if events.send(UiEvent::Input(line)).is_err() {
                        return;
                    }
                }
                Err(error) => {
                    tracing::warn!(error = %error, "stdin read failed");
                    break;
                }
            }
        }
        let _ = events.send(UiEvent::Quit);
    });
}

/// Binds the bus, opens the first chat tab and runs until quit.
pub async fn run_supervisor(root: &Path, socket: &Path) -> anyhow::Result<()> {
    let listener = BusListener::bind(socket).context("failed to bind the tab bus")?;
    tracing::info!(socket = %socket.display(), root = %root.display(), "supervisor listening");

    let launcher = ProcessLauncher::current_exe(socket, root)?;
    let mut supervisor = Supervisor::new(launcher, Renderer::stdout());
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let signals = spawn_signal_thread(events_tx.clone())?;
    spawn_input_thread(events_tx);

    let result = match supervisor.open_tab(TabMode::Chat) {
        Ok(_) => supervisor.run(&listener, &mut events).await,
        Err(error) => Err(error),
    };

    signals.close();
    listener.remove_socket_file();
    result
}
