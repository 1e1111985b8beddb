use agent_protocol::{ChatMode, ExecutionMode};

/// Prefix that marks session commands in chat input.
pub const COMMAND_PREFIX: char = '/';

pub const HELP_TEXT: &str = "Commands: /login, /login status, /logout, /app link <id>, \
/app create <name>, /app clear, /mode general|builder, /exec local|hosted, /init, /clear, \
/status, /cancel, /help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    Show,
    Link(String),
    Create(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Login,
    LoginStatus,
    Logout,
    App(AppCommand),
    /// `None` reports the current mode.
    Mode(Option<ChatMode>),
    Exec(Option<ExecutionMode>),
    Init,
    Clear,
    Status,
    Cancel,
    Help,
    /// Known command with unusable arguments; carries the usage line.
    Usage(&'static str),
    Unknown(String),
}

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with(COMMAND_PREFIX) {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let command = words.next().unwrap_or(trimmed).to_string();
    let rest: Vec<&str> = words.collect();

    let parsed = match (command.as_str(), rest.as_slice()) {
        ("/login", []) => SlashCommand::Login,
        ("/login", ["status"]) => SlashCommand::LoginStatus,
        ("/login", _) => SlashCommand::Usage("/login [status]"),
        ("/logout", _) => SlashCommand::Logout,
        ("/app", []) => SlashCommand::App(AppCommand::Show),
        ("/app", ["link", id]) => SlashCommand::App(AppCommand::Link((*id).to_string())),
        ("/app", ["create", name @ ..]) if !name.is_empty() => {
            SlashCommand::App(AppCommand::Create(name.join(" ")))
        }
        ("/app", ["clear"]) => SlashCommand::App(AppCommand::Clear),
        ("/app", _) => SlashCommand::Usage("/app link <id> | /app create <name> | /app clear"),
        ("/mode", []) => SlashCommand::Mode(None),
        ("/mode", [value]) => match ChatMode::parse(value) {
            Some(mode) => SlashCommand::Mode(Some(mode)),
            None => SlashCommand::Usage("/mode general|builder"),
        },
        ("/mode", _) => SlashCommand::Usage("/mode general|builder"),
        ("/exec", []) => SlashCommand::Exec(None),
        ("/exec", [value]) => match ExecutionMode::parse(value) {
            Some(mode) => SlashCommand::Exec(Some(mode)),
            None => SlashCommand::Usage("/exec local|hosted"),
        },
        ("/exec", _) => SlashCommand::Usage("/exec local|hosted"),
        ("/init", _) => SlashCommand::Init,
        ("/clear", _) => SlashCommand::Clear,
        ("/status", _) => SlashCommand::Status,
        ("/cancel", _) => SlashCommand::Cancel,
        ("/help", _) => SlashCommand::Help,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}
