use std::collections::VecDeque;
use std::fmt;

use agent_protocol::{FooterState, TabId};
use tab_bus::{BusMessage, HistoryRow, TabMode};
use tokio::sync::mpsc::UnboundedSender;

use super::launch::TabHandle;

/// Scrollback rows kept per tab.
pub const SCROLLBACK_LIMIT: usize = 2_000;

/// Input lines held for a tab that has not registered yet.
pub const QUEUED_INPUT_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabStatus {
    /// Spawned, not registered yet; input is queued.
    Starting,
    Running,
    /// Socket closed. The tab stays visible but inert.
    Exited,
}

impl fmt::Display for TabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Exited => "exited",
        })
    }
}

/// What the supervisor remembers to redraw a tab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabView {
    pub scrollback: VecDeque<String>,
    pub live: String,
    pub footer: Option<FooterState>,
    pub history_rows: Vec<HistoryRow>,
}

impl TabView {
    pub fn push_line(&mut self, text: impl Into<String>) {
        if self.scrollback.len() == SCROLLBACK_LIMIT {
            self.scrollback.pop_front();
        }
        self.scrollback.push_back(text.into());
    }

    /// The newest `count` lines, oldest first.
    pub fn tail(&self, count: usize) -> impl Iterator<Item = &String> {
        self.scrollback
            .iter()
            .skip(self.scrollback.len().saturating_sub(count))
    }

    #[must_use]
    pub fn contains_line(&self, needle: &str) -> bool {
        self.scrollback.iter().any(|line| line.contains(needle))
    }
}

/// One worker process and everything the supervisor tracks for it.
pub struct Tab {
    pub id: TabId,
    pub mode: TabMode,
    pub status: TabStatus,
    pub view: TabView,
    pub(super) handle: Option<TabHandle>,
    pub(super) outbox: Option<UnboundedSender<BusMessage>>,
    pub(super) queued: Vec<String>,
}

impl Tab {
    pub(super) fn new(id: TabId, mode: TabMode, handle: TabHandle) -> Self {
        Self {
            id,
            mode,
            status: TabStatus::Starting,
            view: TabView::default(),
            handle: Some(handle),
            outbox: None,
            queued: Vec::new(),
        }
    }

    #[must_use]
    pub fn queued_inputs(&self) -> &[String] {
        &self.queued
    }

    /// Binds the registered socket and flushes queued input in order.
    pub(super) fn attach(&mut self, outbox: UnboundedSender<BusMessage>) {
        for text in self.queued.drain(..) {
            let _ = outbox.send(BusMessage::Input {
                tab_id: self.id,
                text,
            });
        }
        self.outbox = Some(outbox);
        self.status = TabStatus::Running;
    }

    /// Forwards input, or queues it until the worker registers. Returns
    /// false when the queue is full and the line was dropped.
    pub(super) fn send_input(&mut self, text: String) -> bool {
        match &self.outbox {
            Some(outbox) => {
                let _ = outbox.send(BusMessage::Input {
                    tab_id: self.id,
                    text,
                });
                true
            }
            None if self.queued.len() < QUEUED_INPUT_LIMIT => {
                self.queued.push(text);
                true
            }
            None => false,
        }
    }

    /// Still starting, but its worker is already gone.
    pub(super) fn died_before_register(&mut self) -> bool {
        self.status == TabStatus::Starting
            && self.handle.as_mut().is_some_and(TabHandle::has_exited)
    }

    /// Drops the socket; returns the process handle for reaping.
    pub(super) fn detach(&mut self) -> Option<TabHandle> {
        self.outbox = None;
        self.queued.clear();
        self.status = TabStatus::Exited;
        self.view.live.clear();
        self.handle.take()
    }

    /// `shutdown` then detach.
    pub(super) fn shut_down(&mut self) -> Option<TabHandle> {
        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(BusMessage::Shutdown { tab_id: self.id });
        }
        self.detach()
    }

    #[must_use]
    pub fn describe(&self) -> String {
        let mut text = format!("{}: {} ({})", self.id, self.mode, self.status);
        if let Some(footer) = &self.view.footer {
            text.push(' ');
            text.push_str(&footer.render());
        }
        text
    }
}
