use crate::speech::SpeechChannel;
use crate::store::{KeyValueStore, MemoryStore};
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub const SESSION_KEY: &str = "user_id";
pub const TTS_KEY: &str = "tts_enabled";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub struct SessionContext {
    store: Arc<dyn KeyValueStore>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.store
            .get(SESSION_KEY)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(UserId)
    }

    pub fn set_user_id(&self, user_id: &UserId) -> Result<()> {
        self.store
            .set(SESSION_KEY, user_id.as_str())
            .context("failed to persist session")
    }

    pub fn clear_user_id(&self) -> Result<()> {
        self.store
            .remove(SESSION_KEY)
            .context("failed to clear session")
    }

    /// Absent means enabled; only an explicit `false` silences speech.
    pub fn tts_enabled(&self) -> bool {
        self.store
            .get(TTS_KEY)
            .map(|value| value.trim() != "false")
            .unwrap_or(true)
    }

    pub fn set_tts_enabled(&self, enabled: bool) -> Result<()> {
        self.store
            .set(TTS_KEY, if enabled { "true" } else { "false" })
            .context("failed to persist speech preference")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Landing,
    Login,
    Signup,
    ContactSetup,
    Home,
}

impl Route {
    pub fn requires_session(self) -> bool {
        matches!(self, Route::ContactSetup | Route::Home)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Route::Landing => "landing",
            Route::Login => "login",
            Route::Signup => "signup",
            Route::ContactSetup => "contact-setup",
            Route::Home => "home",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
pub struct SessionGuard {
    session: SessionContext,
    speech: SpeechChannel,
}

impl SessionGuard {
    pub fn new(session: SessionContext, speech: SpeechChannel) -> Self {
        Self { session, speech }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.user_id().is_some()
    }

    pub fn resolve(&self, route: Route) -> Route {
        if route.requires_session() && !self.is_authenticated() {
            info!(requested = %route, "no session, redirecting to login");
            Route::Login
        } else {
            route
        }
    }

    pub fn require(&self) -> std::result::Result<UserId, Route> {
        self.session.user_id().ok_or(Route::Login)
    }

    pub fn logout(&self) -> Result<Route> {
        self.session.clear_user_id()?;
        info!("session cleared");
        self.speech.speak("Logging out.");
        Ok(Route::Landing)
    }
}
