use agent_protocol::LoginState;
use stream_api::DevicePoll;
use tokio::time::Instant;

use super::SessionDriver;

impl SessionDriver {
    /// When the next background login poll is due, if one is scheduled.
    #[must_use]
    pub fn next_poll(&self) -> Option<Instant> {
        self.next_poll
    }

    /// Begins the device-code flow. Any stored token is dropped first.
    pub(super) async fn start_login(&mut self) {
        self.api.set_access_token(None);
        self.session.login = LoginState::Idle;
        self.next_poll = None;
        self.persist();

        match self.api.start_device_login().await {
            Ok(code) => {
                self.line(format!(
                    "To sign in, open {} and enter code {}",
                    code.verification_url, code.user_code
                ));
                self.session.login = LoginState::Pending {
                    device_code: code.device_code,
                    user_code: code.user_code,
                    verification_url: code.verification_url,
                };
                self.next_poll = Some(Instant::now() + self.login_poll_delay);
            }
            Err(error) => {
                tracing::warn!(tab_id = self.tab_id, error = %error, "device login start failed");
                self.line(format!("Login failed: {error}"));
                self.session.login = LoginState::Error {
                    message: error.to_string(),
                };
            }
        }

        self.persist();
        self.publish_state();
    }

    /// Polls the pending device login once.
    ///
    /// `manual` polls come from `/login status` and always report back;
    /// background polls stay silent unless they complete the login.
    pub async fn poll_login(&mut self, manual: bool) {
        let (device_code, user_code, verification_url) = match &self.session.login {
            LoginState::Pending {
                device_code,
                user_code,
                verification_url,
            } => (device_code.clone(), user_code.clone(), verification_url.clone()),
            LoginState::Ready { .. } if manual => return self.line("Logged in."),
            LoginState::Error { message } if manual => {
                return self.line(format!("Login failed: {message}. Run /login to retry."));
            }
            _ => {
                self.next_poll = None;
                if manual {
                    self.line("Not logged in. Run /login first.");
                }
                return;
            }
        };

        self.next_poll = None;
        match self.api.poll_device_login(&device_code).await {
            Ok(DevicePoll::Token(token)) => {
                tracing::info!(tab_id = self.tab_id, "device login completed");
                self.api.set_access_token(Some(token.clone()));
                self.session.login = LoginState::Ready { token };
                self.persist();
                self.line("Logged in.");
                self.publish_state();
            }
            Ok(DevicePoll::Pending) => {
                self.next_poll = Some(Instant::now() + self.login_poll_delay);
                if manual {
                    if user_code.is_empty() {
                        self.line("Login still pending.");
                    } else {
                        self.line(format!(
                            "Login still pending. Enter code {user_code} at {verification_url}."
                        ));
                    }
                }
            }
            Err(error) => {
                tracing::debug!(tab_id = self.tab_id, error = %error, manual, "device login poll failed");
                self.session.login = LoginState::Error {
                    message: error.to_string(),
                };
                self.persist();
                if manual {
                    self.line(format!("Login failed: {error}"));
                }
                self.publish_state();
            }
        }
    }

    pub(super) fn logout(&mut self) {
        self.api.set_access_token(None);
        self.session.login = LoginState::Idle;
        self.next_poll = None;
        self.persist();
        self.line("Logged out.");
        self.publish_state();
    }
}
