use crate::remote::{RemoteService, ServiceError};
use crate::session::{Route, SessionContext, UserId};
use crate::speech::SpeechChannel;
use std::sync::Arc;
use tracing::{info, warn};

pub const LANDING_GREETING: &str = "Welcome to Third Eye. Navigate to top right for login.";
pub const LOGIN_GREETING: &str = "Welcome to Third Eye. Please log in.";
pub const SIGNUP_GREETING: &str = "Welcome. Please sign up to create an account.";
pub const CONTACT_GREETING: &str = "Please add an emergency contact.";

pub const LOGIN_OK: &str = "Login successful.";
pub const LOGIN_FAILED: &str = "Login failed. Please check your credentials.";
pub const SIGNUP_OK: &str = "Registration successful. Redirecting to setup.";
pub const SIGNUP_FAILED: &str = "Registration failed. Please try again.";
pub const CONTACT_OK: &str = "Contact saved. Redirecting to home.";
pub const CONTACT_FAILED: &str = "Error saving contact.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("session could not be stored: {0}")]
    Session(String),
}

#[derive(Clone)]
pub struct AccountFlows {
    remote: Arc<dyn RemoteService>,
    speech: SpeechChannel,
    session: SessionContext,
}

impl AccountFlows {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        speech: SpeechChannel,
        session: SessionContext,
    ) -> Self {
        Self {
            remote,
            speech,
            session,
        }
    }

    pub fn greet(&self, route: Route) {
        let greeting = match route {
            Route::Landing => LANDING_GREETING,
            Route::Login => LOGIN_GREETING,
            Route::Signup => SIGNUP_GREETING,
            Route::ContactSetup => CONTACT_GREETING,
            // The home screen greets from its controller.
            Route::Home => return,
        };
        self.speech.speak(greeting);
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Route, AccountError> {
        let outcome = match require_credentials(username, password) {
            Ok(()) => self.remote.login(username.trim(), password).await,
            Err(err) => Err(err),
        };

        match outcome.map_err(AccountError::from).and_then(|id| self.persist(&id)) {
            Ok(()) => {
                info!(%username, "logged in");
                self.speech.speak(LOGIN_OK);
                Ok(Route::Home)
            }
            Err(err) => {
                warn!(%username, error = %err, "login failed");
                self.speech.speak(LOGIN_FAILED);
                Err(err)
            }
        }
    }

    pub async fn signup(&self, username: &str, password: &str) -> Result<Route, AccountError> {
        let outcome = match require_credentials(username, password) {
            Ok(()) => self.remote.signup(username.trim(), password).await,
            Err(err) => Err(err),
        };

        match outcome.map_err(AccountError::from).and_then(|id| self.persist(&id)) {
            Ok(()) => {
                info!(%username, "account created");
                self.speech.speak(SIGNUP_OK);
                Ok(Route::ContactSetup)
            }
            Err(err) => {
                warn!(%username, error = %err, "signup failed");
                self.speech.speak(SIGNUP_FAILED);
                Err(err)
            }
        }
    }

    pub async fn save_contact(
        &self,
        guardian_name: &str,
        guardian_phone: &str,
    ) -> Result<Route, AccountError> {
        let Some(user_id) = self.session.user_id() else {
            return Ok(Route::Login);
        };

        match self
            .remote
            .save_contact(&user_id, guardian_name.trim(), guardian_phone.trim())
            .await
        {
            Ok(()) => {
                info!(user = %user_id, "emergency contact saved");
                self.speech.speak(CONTACT_OK);
                Ok(Route::Home)
            }
            Err(err) => {
                warn!(user = %user_id, error = %err, "emergency contact not saved");
                self.speech.speak(CONTACT_FAILED);
                Err(err.into())
            }
        }
    }

    fn persist(&self, user_id: &UserId) -> Result<(), AccountError> {
        self.session
            .set_user_id(user_id)
            .map_err(|err| AccountError::Session(format!("{err:#}")))
    }
}

fn require_credentials(username: &str, password: &str) -> Result<(), ServiceError> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(ServiceError::Validation(
            "username and password are required".to_string(),
        ));
    }
    Ok(())
}
