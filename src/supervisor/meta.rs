use agent_protocol::TabId;
use tab_bus::TabMode;

pub const META_PREFIX: char = ':';

pub const META_HELP: &str = "Tab commands:
  :new [chat|history]  open a tab (chat by default)
  :tab <n>             switch to tab n
  :tabs                list tabs
  :history             switch to the history tab, opening one if needed
  :close [n]           close tab n (the active tab by default)
  :quit                close every tab and exit
  :help                this help
Anything else goes to the active tab.";

/// Supervisor-local commands; they never reach a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    New(TabMode),
    Switch(TabId),
    List,
    History,
    Close(Option<TabId>),
    Quit,
    Help,
    Usage(&'static str),
    Unknown(String),
}

/// Returns `None` for input that should be forwarded to the active tab.
///
/// A doubled prefix (`::text`) escapes it and forwards `:text`.
pub fn parse_meta_command(input: &str) -> Option<MetaCommand> {
    let text = input.trim();
    let rest = text.strip_prefix(META_PREFIX)?;
    if rest.starts_with(META_PREFIX) || rest.is_empty() {
        return None;
    }

    let words: Vec<&str> = rest.split_whitespace().collect();
    let command = match words.as_slice() {
        ["new"] => MetaCommand::New(TabMode::Chat),
        ["new", mode] => match mode.parse::<TabMode>() {
            Ok(mode) => MetaCommand::New(mode),
            Err(_) => MetaCommand::Usage(":new [chat|history]"),
        },
        ["tab", id] => match id.parse() {
            Ok(id) => MetaCommand::Switch(id),
            Err(_) => MetaCommand::Usage(":tab <n>"),
        },
        ["tab", ..] => MetaCommand::Usage(":tab <n>"),
        ["tabs"] => MetaCommand::List,
        ["history"] => MetaCommand::History,
        ["close"] => MetaCommand::Close(None),
        ["close", id] => match id.parse() {
            Ok(id) => MetaCommand::Close(Some(id)),
            Err(_) => MetaCommand::Usage(":close [n]"),
        },
        ["quit" | "q" | "exit"] => MetaCommand::Quit,
        ["help"] => MetaCommand::Help,
        [name, ..] => MetaCommand::Unknown((*name).to_string()),
        [] => return None,
    };
    Some(command)
}

/// Strips the escape from `::text`; other input is returned unchanged.
#[must_use]
pub fn unescape_input(input: &str) -> &str {
    let trimmed = input.trim_start();
    match trimmed.strip_prefix(META_PREFIX) {
        Some(rest) if rest.starts_with(META_PREFIX) => rest,
        _ => input,
    }
}
