//! Per-conversation state machine.
//!
//! A [`SessionDriver`] is owned by exactly one worker and never shared. Input
//! arrives through [`SessionDriver::handle_input`]; everything the tab should
//! display leaves through the [`UpdateSender`] in emission order.

mod login;
mod turn;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use agent_protocol::{
    ChatMode, ConversationItem, ExecutionMode, FooterState, LoginState, TabId, Usage,
};
use session_store::{SessionSettings, SessionStore, SettingsStore};
use stream_api::{ApiClient, CancellationSignal};
use tokio::time::Instant;
use tool_sandbox::ToolSandbox;

use crate::commands::{parse_slash_command, AppCommand, SlashCommand, HELP_TEXT};
use crate::error::SessionError;
use crate::update::{SessionUpdate, UpdateSender};

/// Default bound on tool-result follow-up submissions per user turn.
pub const MAX_TOOL_DEPTH: usize = 25;
pub const LOGIN_POLL_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub tab_id: TabId,
    pub max_tool_depth: usize,
    /// Mirror transcript items into `.agent/sessions/*.jsonl`.
    pub history: bool,
    pub login_poll_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tab_id: 0,
            max_tool_depth: MAX_TOOL_DEPTH,
            history: true,
            login_poll_delay: LOGIN_POLL_DELAY,
        }
    }
}

impl SessionOptions {
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_tool_depth(mut self, max_tool_depth: usize) -> Self {
        self.max_tool_depth = max_tool_depth;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: bool) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_login_poll_delay(mut self, delay: Duration) -> Self {
        self.login_poll_delay = delay;
        self
    }
}

/// Conversation state owned by one driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub conversation_id: Option<String>,
    pub app_id: Option<String>,
    pub mode: ChatMode,
    pub execution_mode: ExecutionMode,
    pub items: Vec<ConversationItem>,
    pub login: LoginState,
}

pub struct SessionDriver {
    tab_id: TabId,
    root: PathBuf,
    api: ApiClient,
    sandbox: ToolSandbox,
    settings: SettingsStore,
    history: Option<SessionStore>,
    history_enabled: bool,
    /// Number of leading items already mirrored to `history`.
    logged: usize,
    updates: UpdateSender,
    cancel: CancellationSignal,
    session: Session,
    busy: bool,
    usage: Option<Usage>,
    next_poll: Option<Instant>,
    max_tool_depth: usize,
    login_poll_delay: Duration,
}

impl SessionDriver {
    /// Restores persisted settings for the sandbox's workspace and prepares a
    /// history log.
    ///
    /// Unreadable settings or an unwritable history directory are logged and
    /// skipped; the session starts fresh instead of failing.
    pub fn new(
        mut api: ApiClient,
        sandbox: ToolSandbox,
        options: SessionOptions,
        updates: UpdateSender,
    ) -> Self {
        let root = sandbox.root().to_path_buf();
        let settings = SettingsStore::for_workspace(&root);
        let saved = settings.load().unwrap_or_else(|error| {
            tracing::warn!(tab_id = options.tab_id, error = %error, "ignoring unreadable session settings");
            SessionSettings::default()
        });

        let login = restore_login(&mut api, &saved);
        let next_poll = matches!(login, LoginState::Pending { .. })
            .then(|| Instant::now() + options.login_poll_delay);

        let mut driver = Self {
            tab_id: options.tab_id,
            root,
            api,
            sandbox,
            settings,
            history: None,
            history_enabled: options.history,
            logged: 0,
            updates,
            cancel: Arc::new(AtomicBool::new(false)),
            session: Session {
                conversation_id: saved.conversation_id,
                app_id: saved.app_id,
                mode: saved.mode,
                execution_mode: saved.execution_mode,
                items: Vec::new(),
                login,
            },
            busy: false,
            usage: None,
            next_poll,
            max_tool_depth: options.max_tool_depth,
            login_poll_delay: options.login_poll_delay,
        };
        driver.open_history();
        driver
    }

    /// Builds the sandbox for `root` and the driver around it.
    pub fn for_workspace(
        api: ApiClient,
        root: &Path,
        options: SessionOptions,
        updates: UpdateSender,
    ) -> Result<Self, SessionError> {
        let sandbox = ToolSandbox::new(root)?;
        Ok(Self::new(api, sandbox, options, updates))
    }

    #[must_use]
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn items(&self) -> &[ConversationItem] {
        &self.session.items
    }

    #[must_use]
    pub fn sandbox(&self) -> &ToolSandbox {
        &self.sandbox
    }

    #[must_use]
    pub fn history_path(&self) -> Option<&Path> {
        self.history.as_ref().map(SessionStore::path)
    }

    /// Flag checked by the in-flight stream; setting it cancels the turn.
    #[must_use]
    pub fn cancel_handle(&self) -> CancellationSignal {
        Arc::clone(&self.cancel)
    }

    #[must_use]
    pub fn footer_state(&self) -> FooterState {
        FooterState {
            mode: self.session.mode,
            execution_mode: self.session.execution_mode,
            login: self.session.login.phase(),
            busy: self.busy,
            conversation_id: self.session.conversation_id.clone(),
            app_id: self.session.app_id.clone(),
            usage: self.usage,
        }
    }

    /// Announces the initial footer; workers call this once after registering.
    pub fn publish_state(&self) {
        self.send(SessionUpdate::State(self.footer_state()));
    }

    /// Dispatches one line of user input to the command table or a turn.
    pub async fn handle_input(&mut self, input: &str) {
        let text = input.trim();
        if text.is_empty() {
            return;
        }

        match parse_slash_command(text) {
            Some(command) => self.run_command(command).await,
            None => self.submit_user_turn(text.to_string()).await,
        }
    }

    async fn run_command(&mut self, command: SlashCommand) {
        tracing::debug!(tab_id = self.tab_id, ?command, "session command");
        match command {
            SlashCommand::Login => self.start_login().await,
            SlashCommand::LoginStatus => self.poll_login(true).await,
            SlashCommand::Logout => self.logout(),
            SlashCommand::App(app) => self.app_command(app).await,
            SlashCommand::Mode(None) => self.line(format!("Mode: {}", self.session.mode)),
            SlashCommand::Mode(Some(mode)) => {
                self.session.mode = mode;
                self.persist();
                self.line(format!("Mode set to {mode}."));
                self.publish_state();
            }
            SlashCommand::Exec(None) => {
                self.line(format!("Execution: {}", self.session.execution_mode));
            }
            SlashCommand::Exec(Some(mode)) => {
                self.session.execution_mode = mode;
                self.persist();
                self.line(format!("Execution set to {mode}."));
                self.publish_state();
            }
            SlashCommand::Init => self.submit_init().await,
            SlashCommand::Clear => self.clear_conversation(),
            SlashCommand::Status => self.report_status(),
            SlashCommand::Cancel => self.line("Nothing to cancel."),
            SlashCommand::Help => self.line(HELP_TEXT),
            SlashCommand::Usage(usage) => self.line(format!("Usage: {usage}")),
            SlashCommand::Unknown(name) => {
                self.line(format!("Unknown command: {name}. Type /help for commands."));
            }
        }
    }

    async fn app_command(&mut self, command: AppCommand) {
        match command {
            AppCommand::Show => match &self.session.app_id {
                Some(app_id) => self.line(format!("Linked app: {app_id}")),
                None => self.line("No app linked."),
            },
            AppCommand::Link(app_id) => {
                self.line(format!("Linked app {app_id}."));
                self.session.app_id = Some(app_id);
                self.persist();
                self.publish_state();
            }
            AppCommand::Create(name) => {
                if !self.ensure_logged_in() {
                    return;
                }
                self.set_busy(true);
                match self.api.create_app(&name).await {
                    Ok(app_id) => {
                        self.line(format!("Created app {name} ({app_id})."));
                        self.session.app_id = Some(app_id);
                        self.persist();
                    }
                    Err(error) => {
                        tracing::warn!(tab_id = self.tab_id, error = %error, "app creation failed");
                        self.line(format!("Could not create app: {error}"));
                    }
                }
                self.set_busy(false);
            }
            AppCommand::Clear => {
                self.session.app_id = None;
                self.persist();
                self.line("App link cleared.");
                self.publish_state();
            }
        }
    }

    fn clear_conversation(&mut self) {
        self.session.items.clear();
        self.session.conversation_id = None;
        self.usage = None;
        self.sandbox.clear_read_set();
        self.persist();
        self.open_history();
        self.line("Conversation cleared.");
        self.publish_state();
    }

    fn report_status(&self) {
        self.line(self.footer_state().render());
        self.line(format!(
            "Conversation: {} ({} items)",
            self.session.conversation_id.as_deref().unwrap_or("new"),
            self.session.items.len()
        ));
        self.line(format!("Workspace: {}", self.root.display()));
    }

    fn ensure_logged_in(&self) -> bool {
        if self.api.has_access_token() {
            return true;
        }
        self.line("Not logged in. Run /login first.");
        false
    }

    fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
        self.publish_state();
    }

    /// Starts a fresh history log; later items are mirrored into it.
    fn open_history(&mut self) {
        self.logged = 0;
        self.history = None;
        if !self.history_enabled {
            return;
        }
        match SessionStore::create_new(&self.root, Some(self.tab_id)) {
            Ok(store) => self.history = Some(store),
            Err(error) => {
                tracing::warn!(tab_id = self.tab_id, error = %error, "history logging disabled");
            }
        }
    }

    /// Appends items not yet mirrored. A failed write disables the log for
    /// the rest of the session.
    fn sync_history(&mut self) {
        let total = self.session.items.len();
        self.logged = self.logged.min(total);
        let Some(store) = self.history.as_mut() else {
            self.logged = total;
            return;
        };

        let mut failed = false;
        for item in &self.session.items[self.logged..] {
            if let Err(error) = store.append(item.clone()) {
                tracing::warn!(tab_id = self.tab_id, error = %error, "history append failed");
                failed = true;
                break;
            }
        }
        if failed {
            self.history = None;
        }
        self.logged = total;
    }

    fn persist(&self) {
        let device_code = match &self.session.login {
            LoginState::Pending { device_code, .. } => Some(device_code.clone()),
            _ => None,
        };
        let snapshot = SessionSettings {
            conversation_id: self.session.conversation_id.clone(),
            app_id: self.session.app_id.clone(),
            mode: self.session.mode,
            execution_mode: self.session.execution_mode,
            access_token: self.session.login.token().map(str::to_string),
            device_code,
        };
        if let Err(error) = self.settings.save(&snapshot) {
            tracing::warn!(tab_id = self.tab_id, error = %error, "failed to persist session settings");
        }
    }

    fn line(&self, text: impl Into<String>) {
        self.send(SessionUpdate::Line(text.into()));
    }

    fn send(&self, update: SessionUpdate) {
        // A closed receiver means the worker is shutting down.
        let _ = self.updates.send(update);
    }
}

fn restore_login(api: &mut ApiClient, saved: &SessionSettings) -> LoginState {
    if let Some(token) = saved.access_token.clone().filter(|token| !token.is_empty()) {
        api.set_access_token(Some(token.clone()));
        return LoginState::Ready { token };
    }
    if let Some(token) = api.config().access_token.clone().filter(|token| !token.is_empty()) {
        return LoginState::Ready { token };
    }
    match saved.device_code.clone() {
        Some(device_code) if !device_code.is_empty() => LoginState::Pending {
            device_code,
            user_code: String::new(),
            verification_url: String::new(),
        },
        _ => LoginState::Idle,
    }
}
