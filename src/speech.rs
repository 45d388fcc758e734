use crate::session::SessionContext;
use anyhow::{Context, Result};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

pub const VOICE_ENABLED_ANNOUNCEMENT: &str = "Voice feedback enabled.";

/// A synthesis backend. `speak` must return as soon as playback has started.
pub trait SpeechEngine: Send + Sync {
    fn speak(&self, text: &str) -> Result<()>;
    fn cancel(&self);
}

#[derive(Clone)]
pub struct SpeechChannel {
    engine: Arc<dyn SpeechEngine>,
    session: SessionContext,
    slot: Arc<Mutex<Option<String>>>,
    // Holds the toggled value when the store refused to persist it.
    unsaved: Arc<Mutex<Option<bool>>>,
}

impl SpeechChannel {
    pub fn new(engine: Arc<dyn SpeechEngine>, session: SessionContext) -> Self {
        Self {
            engine,
            session,
            slot: Arc::new(Mutex::new(None)),
            unsaved: Arc::new(Mutex::new(None)),
        }
    }

    pub fn speak(&self, text: &str) {
        if !self.status() {
            return;
        }

        let mut slot = self.slot.lock().expect("speech slot mutex poisoned");
        self.engine.cancel();
        match self.engine.speak(text) {
            Ok(()) => *slot = Some(text.to_string()),
            Err(err) => {
                debug!(error = %err, "speech engine unavailable");
                *slot = None;
            }
        }
    }

    pub fn toggle(&self) -> bool {
        let enabled = !self.status();
        {
            let mut unsaved = self.unsaved.lock().expect("speech preference mutex poisoned");
            match self.session.set_tts_enabled(enabled) {
                Ok(()) => *unsaved = None,
                Err(err) => {
                    warn!(error = %err, "speech preference not persisted, keeping it for this session");
                    *unsaved = Some(enabled);
                }
            }
        }

        if enabled {
            self.speak(VOICE_ENABLED_ANNOUNCEMENT);
        } else {
            let mut slot = self.slot.lock().expect("speech slot mutex poisoned");
            self.engine.cancel();
            *slot = None;
        }
        enabled
    }

    pub fn status(&self) -> bool {
        self.unsaved
            .lock()
            .expect("speech preference mutex poisoned")
            .unwrap_or_else(|| self.session.tts_enabled())
    }

    pub fn current(&self) -> Option<String> {
        self.slot.lock().expect("speech slot mutex poisoned").clone()
    }
}

#[derive(Debug)]
pub struct CommandSpeechEngine {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl CommandSpeechEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
        }
    }

    pub fn system_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("say", Vec::new())
        } else {
            Self::new("espeak-ng", Vec::new())
        }
    }

    // Never waits: a killed child is reaped by tokio once dropped.
    fn stop_child(slot: &mut Option<Child>) {
        if let Some(mut child) = slot.take()
            && matches!(child.try_wait(), Ok(None))
        {
            let _ = child.start_kill();
        }
    }
}

impl SpeechEngine for CommandSpeechEngine {
    fn speak(&self, text: &str) -> Result<()> {
        let mut slot = self.child.lock().expect("speech child mutex poisoned");
        Self::stop_child(&mut slot);

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn speech command {}", self.program))?;
        *slot = Some(child);
        Ok(())
    }

    fn cancel(&self) {
        let mut slot = self.child.lock().expect("speech child mutex poisoned");
        Self::stop_child(&mut slot);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSpeechEngine;

impl SpeechEngine for ConsoleSpeechEngine {
    fn speak(&self, text: &str) -> Result<()> {
        println!("[voice] {text}");
        Ok(())
    }

    fn cancel(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeechEngine;

impl SpeechEngine for SilentSpeechEngine {
    fn speak(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn cancel(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechRecord {
    Spoke(String),
    Cancelled,
}

#[derive(Debug, Default)]
pub struct RecordingSpeechEngine {
    records: Mutex<Vec<SpeechRecord>>,
}

impl RecordingSpeechEngine {
    pub fn records(&self) -> Vec<SpeechRecord> {
        self.records
            .lock()
            .expect("recording engine mutex poisoned")
            .clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                SpeechRecord::Spoke(text) => Some(text),
                SpeechRecord::Cancelled => None,
            })
            .collect()
    }

    pub fn last_spoken(&self) -> Option<String> {
        self.spoken().pop()
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .expect("recording engine mutex poisoned")
            .clear();
    }
}

impl SpeechEngine for RecordingSpeechEngine {
    fn speak(&self, text: &str) -> Result<()> {
        self.records
            .lock()
            .expect("recording engine mutex poisoned")
            .push(SpeechRecord::Spoke(text.to_string()));
        Ok(())
    }

    fn cancel(&self) {
        self.records
            .lock()
            .expect("recording engine mutex poisoned")
            .push(SpeechRecord::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CommandSpeechEngine, RecordingSpeechEngine, SpeechChannel, SpeechEngine, SpeechRecord,
        VOICE_ENABLED_ANNOUNCEMENT,
    };
    use crate::session::SessionContext;
    use crate::store::KeyValueStore;
    use std::sync::Arc;
    use std::time::Duration;

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Option<String> {
            None
        }

        fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            anyhow::bail!("read-only file system")
        }

        fn remove(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("read-only file system")
        }
    }

    fn channel() -> (SpeechChannel, Arc<RecordingSpeechEngine>, SessionContext) {
        let session = SessionContext::in_memory();
        let engine = Arc::new(RecordingSpeechEngine::default());
        (
            SpeechChannel::new(engine.clone(), session.clone()),
            engine,
            session,
        )
    }

    #[test]
    fn speak_cancels_previous_utterance_first() {
        let (speech, engine, _) = channel();
        speech.speak("one");
        speech.speak("two");

        assert_eq!(
            engine.records(),
            vec![
                SpeechRecord::Cancelled,
                SpeechRecord::Spoke("one".to_string()),
                SpeechRecord::Cancelled,
                SpeechRecord::Spoke("two".to_string()),
            ]
        );
        assert_eq!(speech.current().as_deref(), Some("two"));
    }

    #[test]
    fn disabling_cancels_and_suppresses_until_reenabled() {
        let (speech, engine, session) = channel();
        speech.speak("chair ahead");
        engine.clear();

        assert!(!speech.toggle());
        assert!(!session.tts_enabled());
        assert_eq!(engine.records(), vec![SpeechRecord::Cancelled]);
        assert!(speech.current().is_none());

        speech.speak("table ahead");
        assert!(engine.spoken().is_empty());

        assert!(speech.toggle());
        assert_eq!(
            engine.last_spoken().as_deref(),
            Some(VOICE_ENABLED_ANNOUNCEMENT)
        );
        speech.speak("door ahead");
        assert_eq!(engine.last_spoken().as_deref(), Some("door ahead"));
    }

    #[test]
    fn status_reads_persisted_preference() {
        let (speech, _, session) = channel();
        assert!(speech.status());
        session.set_tts_enabled(false).expect("disable");
        assert!(!speech.status());
    }

    #[tokio::test]
    async fn missing_synthesiser_is_swallowed() {
        let session = SessionContext::in_memory();
        let engine = Arc::new(CommandSpeechEngine::new(
            "thirdeye-no-such-synthesiser",
            Vec::new(),
        ));
        assert!(engine.speak("hello").is_err());

        let speech = SpeechChannel::new(engine, session);
        speech.speak("hello");
        assert!(speech.current().is_none());
    }

    #[test]
    fn toggle_takes_effect_when_preference_cannot_be_saved() {
        let engine = Arc::new(RecordingSpeechEngine::default());
        let speech = SpeechChannel::new(
            engine.clone(),
            SessionContext::new(Arc::new(ReadOnlyStore)),
        );

        assert!(!speech.toggle());
        assert!(!speech.status());
        speech.speak("chair ahead");
        assert!(engine.spoken().is_empty());

        assert!(speech.toggle());
        assert!(speech.status());
        assert_eq!(
            engine.last_spoken().as_deref(),
            Some(VOICE_ENABLED_ANNOUNCEMENT)
        );
    }

    #[tokio::test]
    async fn cancel_returns_without_waiting_for_the_synthesiser() {
        let engine = CommandSpeechEngine::new("sleep", Vec::new());
        if engine.speak("30").is_err() {
            return;
        }

        let started = std::time::Instant::now();
        engine.cancel();
        engine.cancel();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
