use agent_protocol::FooterState;
use tokio::sync::mpsc;

/// Something the session wants shown in its tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Append one finished line to the scrollback.
    Line(String),
    /// Replace the live (still streaming) buffer; empty clears it.
    Stream(String),
    State(FooterState),
}

pub type UpdateSender = mpsc::UnboundedSender<SessionUpdate>;
pub type UpdateReceiver = mpsc::UnboundedReceiver<SessionUpdate>;

#[must_use]
pub fn update_channel() -> (UpdateSender, UpdateReceiver) {
    mpsc::unbounded_channel()
}
