use crate::controller::{ControllerConfig, DEFAULT_FEEDBACK_RATING};
use crate::poller::DEFAULT_POLL_INTERVAL;
use crate::remote::DEFAULT_BASE_URL;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub vision: VisionSection,
    #[serde(default)]
    pub feedback: FeedbackSection,
    #[serde(default)]
    pub speech: SpeechSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionSection {
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackSection {
    #[serde(default = "default_rating")]
    pub rating: u8,
}

impl Default for FeedbackSection {
    fn default() -> Self {
        Self {
            rating: DEFAULT_FEEDBACK_RATING,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechBackend {
    #[default]
    System,
    Console,
    Silent,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SpeechSection {
    #[serde(default)]
    pub backend: SpeechBackend,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingSection {
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_rating() -> u8 {
    DEFAULT_FEEDBACK_RATING
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let text = std::str::from_utf8(&bytes)
            .with_context(|| format!("config {} is not valid UTF-8", path.display()))?;
        let config: AppConfig = toml::from_str(text).with_context(|| {
            format!("failed to parse config {} (expected TOML)", path.display())
        })?;

        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        let base_url = self.service.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(format!(
                "service.base_url must start with http:// or https:// (got {base_url:?})"
            ));
        }
        if self.service.request_timeout.is_zero() {
            return Err("service.request_timeout must be greater than 0".to_string());
        }
        if self.vision.poll_interval.is_zero() {
            return Err("vision.poll_interval must be greater than 0".to_string());
        }
        if !(1..=5).contains(&self.feedback.rating) {
            return Err("feedback.rating must be between 1 and 5".to_string());
        }
        if self
            .speech
            .command
            .as_deref()
            .is_some_and(|command| command.trim().is_empty())
        {
            return Err("speech.command must not be empty when set".to_string());
        }
        Ok(())
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            poll_interval: self.vision.poll_interval,
            feedback_rating: self.feedback.rating,
        }
    }
}

pub fn ensure_sample_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("failed to create config parent directory {}", parent.display())
        })?;
    }

    let sample = r#"# Third Eye client configuration (TOML)

[service]
# Detection / account service.
base_url = "http://localhost:5000"
request_timeout = "10s"

[vision]
# How often the current object is requested while vision mode is on.
poll_interval = "3s"

[feedback]
# Satisfaction rating sent with every feedback message (1-5).
rating = 5

[speech]
# "system" (say / espeak-ng), "console" (print), or "silent".
backend = "system"
# command = "spd-say"
# args = ["-r", "10"]

[logging]
# filter = "thirdeye=debug"
"#;

    std::fs::write(path, sample)
        .with_context(|| format!("failed to write sample config {}", path.display()))?;
    Ok(())
}
