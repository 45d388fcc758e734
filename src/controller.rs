use crate::poller::{DEFAULT_POLL_INTERVAL, PollerHandle, spawn_detection_poller};
use crate::remote::{RemoteService, ServiceResult, SosResponse};
use crate::session::{Route, SessionGuard, UserId};
use crate::speech::SpeechChannel;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const WELCOME_ANNOUNCEMENT: &str = "Welcome to Third Eye Home. Select an option.";
pub const VISION_STARTED_ANNOUNCEMENT: &str = "Camera started. Object detection active.";
pub const VISION_STOPPED_ANNOUNCEMENT: &str = "Camera stopped.";
pub const SOS_ACTIVATING_ANNOUNCEMENT: &str = "Activating SOS";
pub const SOS_CANCELLED_ANNOUNCEMENT: &str = "SOS Cancelled.";
pub const SOS_FAILED_ANNOUNCEMENT: &str = "Failed to trigger SOS. No contact found.";
pub const FEEDBACK_SENT_ANNOUNCEMENT: &str = "Feedback submitted. Thank you.";
pub const FEEDBACK_FAILED_ANNOUNCEMENT: &str = "Error submitting feedback.";

pub const DEFAULT_FEEDBACK_RATING: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Vision,
    Sos,
    Feedback,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Idle => "idle",
            Mode::Vision => "vision",
            Mode::Sos => "sos",
            Mode::Feedback => "feedback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SosContact {
    pub name: String,
    pub phone: String,
}

impl SosContact {
    pub fn placeholder() -> Self {
        Self {
            name: "Contacting...".to_string(),
            phone: "...".to_string(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            name: "Error".to_string(),
            phone: "No Emergency Contact".to_string(),
        }
    }

    pub fn resolved(name: Option<String>, phone: Option<String>) -> Self {
        Self {
            name: name.unwrap_or_else(|| "Guardian".to_string()),
            phone: phone.unwrap_or_else(|| "Unknown".to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        *self == Self::unavailable()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackDraft {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    StartVision,
    StopVision,
    ToggleVision,
    TriggerSos,
    OpenFeedback,
    EditFeedback(String),
    CancelFeedback,
    SubmitFeedback,
    ToggleSpeech,
    Logout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    ModeChanged { from: Mode, to: Mode },
    SosContactUpdated(SosContact),
    FeedbackSubmitted,
    FeedbackFailed { message: String },
    SpeechToggled { enabled: bool },
    LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub mode: Mode,
    pub sos_contact: Option<SosContact>,
    pub feedback_draft: Option<FeedbackDraft>,
    pub feedback_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Navigate(Route),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub poll_interval: Duration,
    pub feedback_rating: u8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            feedback_rating: DEFAULT_FEEDBACK_RATING,
        }
    }
}

#[derive(Debug)]
enum ModeState {
    Idle,
    Vision { poller: PollerHandle },
    Sos { contact: SosContact },
    Feedback { draft: FeedbackDraft, submitting: bool },
}

impl ModeState {
    fn mode(&self) -> Mode {
        match self {
            ModeState::Idle => Mode::Idle,
            ModeState::Vision { .. } => Mode::Vision,
            ModeState::Sos { .. } => Mode::Sos,
            ModeState::Feedback { .. } => Mode::Feedback,
        }
    }
}

#[derive(Debug)]
enum Completion {
    Detection {
        epoch: u64,
        label: String,
    },
    Sos {
        epoch: u64,
        result: ServiceResult<SosResponse>,
    },
    Feedback {
        epoch: u64,
        result: ServiceResult<()>,
    },
}

pub struct ModeController {
    remote: Arc<dyn RemoteService>,
    speech: SpeechChannel,
    guard: SessionGuard,
    user_id: UserId,
    config: ControllerConfig,
    state: ModeState,
    epoch: u64,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    event_tx: Option<mpsc::UnboundedSender<ControllerEvent>>,
}

impl ModeController {
    pub fn mount(
        guard: SessionGuard,
        remote: Arc<dyn RemoteService>,
        speech: SpeechChannel,
        config: ControllerConfig,
        event_tx: Option<mpsc::UnboundedSender<ControllerEvent>>,
    ) -> Result<Self, Route> {
        let user_id = guard.require()?;
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        info!(user = %user_id, "home screen mounted");
        speech.speak(WELCOME_ANNOUNCEMENT);

        Ok(Self {
            remote,
            speech,
            guard,
            user_id,
            config,
            state: ModeState::Idle,
            epoch: 0,
            completion_tx,
            completion_rx,
            event_tx,
        })
    }

    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let (sos_contact, feedback_draft, feedback_pending) = match &self.state {
            ModeState::Sos { contact } => (Some(contact.clone()), None, false),
            ModeState::Feedback { draft, submitting } => (None, Some(draft.clone()), *submitting),
            ModeState::Idle | ModeState::Vision { .. } => (None, None, false),
        };
        ControllerSnapshot {
            mode: self.mode(),
            sos_contact,
            feedback_draft,
            feedback_pending,
        }
    }

    /// Applies one user action. Must be called from within a tokio runtime.
    pub fn handle(&mut self, action: UserAction) -> Flow {
        debug!(?action, mode = %self.mode(), "user action");

        match action {
            UserAction::StartVision => {
                if self.mode() != Mode::Vision {
                    self.enter_vision();
                }
            }
            UserAction::StopVision => {
                if self.mode() == Mode::Vision {
                    self.return_to_idle();
                    self.speech.speak(VISION_STOPPED_ANNOUNCEMENT);
                }
            }
            UserAction::ToggleVision => {
                let next = if self.mode() == Mode::Vision {
                    UserAction::StopVision
                } else {
                    UserAction::StartVision
                };
                return self.handle(next);
            }
            UserAction::TriggerSos => {
                if self.mode() == Mode::Sos {
                    self.return_to_idle();
                    self.speech.speak(SOS_CANCELLED_ANNOUNCEMENT);
                } else {
                    self.enter_sos();
                }
            }
            UserAction::OpenFeedback => {
                if self.mode() == Mode::Feedback {
                    self.return_to_idle();
                } else {
                    let from = self.leave_current();
                    self.settle(
                        from,
                        ModeState::Feedback {
                            draft: FeedbackDraft::default(),
                            submitting: false,
                        },
                    );
                }
            }
            UserAction::EditFeedback(text) => {
                if let ModeState::Feedback { draft, .. } = &mut self.state {
                    draft.text = text;
                }
            }
            UserAction::CancelFeedback => {
                if self.mode() == Mode::Feedback {
                    self.return_to_idle();
                }
            }
            UserAction::SubmitFeedback => self.submit_feedback(),
            UserAction::ToggleSpeech => {
                let enabled = self.speech.toggle();
                info!(enabled, "speech preference toggled");
                self.emit(ControllerEvent::SpeechToggled { enabled });
            }
            UserAction::Logout => return self.logout(),
        }

        Flow::Continue
    }

    pub async fn step(&mut self) {
        if let Some(completion) = self.completion_rx.recv().await {
            self.apply(completion);
        }
    }

    pub async fn run(mut self, mut actions: mpsc::UnboundedReceiver<UserAction>) -> Option<Route> {
        loop {
            tokio::select! {
                action = actions.recv() => match action {
                    Some(action) => {
                        if let Flow::Navigate(route) = self.handle(action) {
                            return Some(route);
                        }
                    }
                    None => {
                        self.return_to_idle();
                        return None;
                    }
                },
                Some(completion) = self.completion_rx.recv() => self.apply(completion),
            }
        }
    }

    fn enter_vision(&mut self) {
        let from = self.leave_current();
        let epoch = self.epoch;
        let completion_tx = self.completion_tx.clone();
        let poller = spawn_detection_poller(
            self.remote.clone(),
            self.config.poll_interval,
            move |label| {
                let _ = completion_tx.send(Completion::Detection { epoch, label });
            },
        );
        self.settle(from, ModeState::Vision { poller });
        self.speech.speak(VISION_STARTED_ANNOUNCEMENT);
    }

    fn enter_sos(&mut self) {
        let from = self.leave_current();
        let epoch = self.epoch;
        let contact = SosContact::placeholder();
        self.settle(
            from,
            ModeState::Sos {
                contact: contact.clone(),
            },
        );
        self.emit(ControllerEvent::SosContactUpdated(contact));
        self.speech.speak(SOS_ACTIVATING_ANNOUNCEMENT);

        let remote = self.remote.clone();
        let user_id = self.user_id.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = remote.trigger_sos(&user_id).await;
            let _ = completion_tx.send(Completion::Sos { epoch, result });
        });
    }

    fn submit_feedback(&mut self) {
        let ModeState::Feedback { draft, submitting } = &mut self.state else {
            return;
        };
        if *submitting {
            debug!("feedback submission already in flight");
            return;
        }
        *submitting = true;

        let message = draft.text.clone();
        let rating = self.config.feedback_rating;
        let epoch = self.epoch;
        let remote = self.remote.clone();
        let user_id = self.user_id.clone();
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = remote.submit_feedback(&user_id, &message, rating).await;
            let _ = completion_tx.send(Completion::Feedback { epoch, result });
        });
    }

    fn logout(&mut self) -> Flow {
        self.return_to_idle();
        match self.guard.logout() {
            Ok(route) => {
                self.emit(ControllerEvent::LoggedOut);
                Flow::Navigate(route)
            }
            Err(err) => {
                warn!(error = %err, "logout failed, session kept");
                Flow::Continue
            }
        }
    }

    fn apply(&mut self, completion: Completion) {
        match completion {
            Completion::Detection { epoch, label } => {
                if epoch != self.epoch || self.mode() != Mode::Vision {
                    debug!(%label, "stale detection discarded");
                    return;
                }
                self.speech.speak(&format!("{label} ahead"));
            }
            Completion::Sos { epoch, result } => {
                if epoch != self.epoch {
                    debug!("stale SOS result discarded");
                    return;
                }
                let ModeState::Sos { contact } = &mut self.state else {
                    return;
                };
                let announcement = match result {
                    Ok(response) => {
                        *contact = SosContact::resolved(response.name, response.phone);
                        info!(name = %contact.name, "SOS delivered");
                        response.message
                    }
                    Err(err) => {
                        *contact = SosContact::unavailable();
                        warn!(error = %err, "SOS request failed");
                        SOS_FAILED_ANNOUNCEMENT.to_string()
                    }
                };
                let updated = contact.clone();
                self.emit(ControllerEvent::SosContactUpdated(updated));
                self.speech.speak(&announcement);
            }
            Completion::Feedback { epoch, result } => {
                if epoch != self.epoch {
                    debug!("stale feedback result discarded");
                    return;
                }
                let ModeState::Feedback { submitting, .. } = &mut self.state else {
                    return;
                };
                match result {
                    Ok(()) => {
                        info!("feedback submitted");
                        self.return_to_idle();
                        self.emit(ControllerEvent::FeedbackSubmitted);
                        self.speech.speak(FEEDBACK_SENT_ANNOUNCEMENT);
                    }
                    Err(err) => {
                        *submitting = false;
                        warn!(error = %err, "feedback submission failed");
                        self.emit(ControllerEvent::FeedbackFailed {
                            message: err.to_string(),
                        });
                        self.speech.speak(FEEDBACK_FAILED_ANNOUNCEMENT);
                    }
                }
            }
        }
    }

    fn return_to_idle(&mut self) {
        let from = self.leave_current();
        self.settle(from, ModeState::Idle);
    }

    fn leave_current(&mut self) -> Mode {
        let previous = std::mem::replace(&mut self.state, ModeState::Idle);
        let from = previous.mode();
        match previous {
            ModeState::Vision { poller } => poller.stop(),
            ModeState::Feedback { draft, .. } if !draft.text.is_empty() => {
                debug!("feedback draft cleared");
            }
            _ => {}
        }
        self.epoch += 1;
        from
    }

    fn settle(&mut self, from: Mode, next: ModeState) {
        self.state = next;
        let to = self.state.mode();
        if from != to {
            info!(%from, %to, "mode changed");
            self.emit(ControllerEvent::ModeChanged { from, to });
        }
    }

    fn emit(&self, event: ControllerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    #[cfg(test)]
    fn poller_running(&self) -> bool {
        matches!(&self.state, ModeState::Vision { poller } if poller.is_running())
    }
}
