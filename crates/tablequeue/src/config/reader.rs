//! Queue configuration files
//!
//! Keys follow `<prefix>.<queue id>.<setting>=value`:
//!
//! ```text
//! tablequeue.emails.table=queue_tasks
//! tablequeue.emails.thread-count=4
//! tablequeue.emails.no-task-timeout=PT5S
//! tablequeue.emails.reenqueue-retry-type=sequential
//! tablequeue.emails.reenqueue-retry-plan=PT1S,PT10S,PT1M
//! tablequeue.emails.additional-settings.sender=noreply@example.com
//! ```
//!
//! Files are layered in order; a later file overrides earlier ones key by
//! key. Every problem across every queue is collected into one
//! [`ConfigError::Invalid`] so nothing is applied partially.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use super::duration::{parse_duration, parse_duration_list};
use crate::settings::{
    ExtSettings, FailureRetryType, FailureSettings, PollSettings, ProcessingMode,
    ProcessingSettings, QueueConfig, QueueId, QueueLocation, QueueSettings, ReenqueueRetryType,
    ReenqueueSettings,
};

/// Default key prefix
pub const DEFAULT_PREFIX: &str = "tablequeue";

const ADDITIONAL_SETTINGS: &str = "additional-settings.";

const KNOWN_SETTINGS: &[&str] = &[
    "table",
    "id-sequence",
    "between-task-timeout",
    "no-task-timeout",
    "fatal-crash-timeout",
    "thread-count",
    "processing-mode",
    "retry-type",
    "retry-interval",
    "reenqueue-retry-type",
    "reenqueue-retry-delay",
    "reenqueue-retry-plan",
    "reenqueue-retry-initial-delay",
    "reenqueue-retry-step",
    "reenqueue-retry-ratio",
];

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse queue configs:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}

/// Parse `.properties`-style text: `key=value` (or `key: value`) lines,
/// `#` and `!` comments, blank lines ignored. Later keys win.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(['=', ':'])?;
            let key = line[..split].trim();
            let value = line[split + 1..].trim();
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Reads queue configs from layered property files
#[derive(Debug, Clone)]
pub struct QueueConfigsReader {
    files: Vec<PathBuf>,
    prefix: String,
}

impl QueueConfigsReader {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Use another key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Read and parse every file
    pub fn read(&self) -> Result<Vec<QueueConfig>, ConfigError> {
        let mut properties = BTreeMap::new();
        for path in &self.files {
            properties.extend(read_file(path)?);
        }
        self.parse(&properties)
    }

    /// Build queue configs from already merged properties
    pub fn parse(
        &self,
        properties: &BTreeMap<String, String>,
    ) -> Result<Vec<QueueConfig>, ConfigError> {
        let mut errors = Vec::new();
        let mut queues: BTreeMap<&str, BTreeMap<&str, &str>> = BTreeMap::new();

        let key_prefix = format!("{}.", self.prefix);
        for (key, value) in properties {
            let Some(rest) = key.strip_prefix(&key_prefix) else {
                continue;
            };
            match rest.split_once('.') {
                Some((queue_id, setting)) if !queue_id.is_empty() && !setting.is_empty() => {
                    queues
                        .entry(queue_id)
                        .or_default()
                        .insert(setting, value.as_str());
                }
                _ => errors.push(format!(
                    "{key}: expected {}.<queue id>.<setting>",
                    self.prefix
                )),
            }
        }

        let mut configs = Vec::with_capacity(queues.len());
        for (queue_id, settings) in &queues {
            let mut queue = QueueSettingsParser {
                prefix: &self.prefix,
                queue_id,
                settings,
                errors: &mut errors,
            };
            if let Some(config) = queue.parse() {
                configs.push(config);
            }
        }

        if errors.is_empty() {
            debug!(queues = configs.len(), "Queue configs parsed");
            Ok(configs)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn read_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_properties(&text))
}

struct QueueSettingsParser<'a> {
    prefix: &'a str,
    queue_id: &'a str,
    settings: &'a BTreeMap<&'a str, &'a str>,
    errors: &'a mut Vec<String>,
}

impl<'a> QueueSettingsParser<'a> {
    fn parse(&mut self) -> Option<QueueConfig> {
        let before = self.errors.len();
        let settings = self.settings;

        for setting in settings.keys() {
            if !KNOWN_SETTINGS.contains(setting) && !setting.starts_with(ADDITIONAL_SETTINGS) {
                self.error(setting, "unknown setting");
            }
        }

        let table = self.raw("table");
        if table.is_none() {
            self.error("table", "setting is required");
        }

        let poll_defaults = PollSettings::default();
        let poll = PollSettings {
            between_task_timeout: self
                .duration("between-task-timeout")
                .unwrap_or(poll_defaults.between_task_timeout),
            no_task_timeout: self
                .duration("no-task-timeout")
                .unwrap_or(poll_defaults.no_task_timeout),
            fatal_crash_timeout: self
                .duration("fatal-crash-timeout")
                .unwrap_or(poll_defaults.fatal_crash_timeout),
        };

        let processing_defaults = ProcessingSettings::default();
        let processing = ProcessingSettings {
            thread_count: self
                .value("thread-count")
                .unwrap_or(processing_defaults.thread_count),
            processing_mode: self
                .value::<ProcessingMode>("processing-mode")
                .unwrap_or(processing_defaults.processing_mode),
        };

        let failure_defaults = FailureSettings::default();
        let failure = FailureSettings {
            retry_type: self
                .value::<FailureRetryType>("retry-type")
                .unwrap_or(failure_defaults.retry_type),
            retry_interval: self
                .duration("retry-interval")
                .unwrap_or(failure_defaults.retry_interval),
        };

        let reenqueue = self.reenqueue();

        let ext = ExtSettings::new(
            settings
                .iter()
                .filter_map(|(setting, value)| {
                    setting
                        .strip_prefix(ADDITIONAL_SETTINGS)
                        .map(|name| (name.to_string(), value.to_string()))
                })
                .collect(),
        );

        if self.errors.len() != before {
            return None;
        }
        let table = table?;

        let mut location = QueueLocation::new(QueueId::new(self.queue_id), table);
        if let Some(sequence) = self.raw("id-sequence") {
            location = location.with_id_sequence(sequence);
        }

        Some(QueueConfig::new(
            location,
            QueueSettings::new(processing, poll, failure, reenqueue?, ext),
        ))
    }

    fn reenqueue(&mut self) -> Option<ReenqueueSettings> {
        let retry_type = match self.raw("reenqueue-retry-type") {
            Some(_) => self.value::<ReenqueueRetryType>("reenqueue-retry-type")?,
            None => ReenqueueRetryType::Manual,
        };

        let params: &[&str] = match retry_type {
            ReenqueueRetryType::Manual => &[],
            ReenqueueRetryType::Fixed => &["reenqueue-retry-delay"],
            ReenqueueRetryType::Sequential => &["reenqueue-retry-plan"],
            ReenqueueRetryType::Arithmetic => {
                &["reenqueue-retry-initial-delay", "reenqueue-retry-step"]
            }
            ReenqueueRetryType::Geometric => {
                &["reenqueue-retry-initial-delay", "reenqueue-retry-ratio"]
            }
        };

        let mut complete = true;
        for param in params {
            if !self.settings.contains_key(param) {
                self.error(param, "setting is required for this reenqueue-retry-type");
                complete = false;
            }
        }
        for param in [
            "reenqueue-retry-delay",
            "reenqueue-retry-plan",
            "reenqueue-retry-initial-delay",
            "reenqueue-retry-step",
            "reenqueue-retry-ratio",
        ] {
            if self.settings.contains_key(param) && !params.contains(&param) {
                self.error(param, "setting is not used by this reenqueue-retry-type");
                complete = false;
            }
        }
        if !complete {
            return None;
        }

        let settings = match retry_type {
            ReenqueueRetryType::Manual => ReenqueueSettings::manual(),
            ReenqueueRetryType::Fixed => {
                ReenqueueSettings::fixed(self.duration("reenqueue-retry-delay")?)
            }
            ReenqueueRetryType::Sequential => {
                let plan = self.duration_list("reenqueue-retry-plan")?;
                if plan.is_empty() {
                    self.error("reenqueue-retry-plan", "plan must not be empty");
                    return None;
                }
                ReenqueueSettings::sequential(plan)
            }
            ReenqueueRetryType::Arithmetic => {
                let initial = self.duration("reenqueue-retry-initial-delay");
                let step = self.duration("reenqueue-retry-step");
                ReenqueueSettings::arithmetic(initial?, step?)
            }
            ReenqueueRetryType::Geometric => {
                let initial = self.duration("reenqueue-retry-initial-delay");
                let ratio = self.value::<u32>("reenqueue-retry-ratio");
                ReenqueueSettings::geometric(initial?, ratio?)
            }
        };

        match settings.validate() {
            Ok(()) => Some(settings),
            Err(e) => {
                self.error("reenqueue-retry-type", &e.to_string());
                None
            }
        }
    }

    fn raw(&self, setting: &str) -> Option<&'a str> {
        self.settings.get(setting).copied()
    }

    /// Parse an optional setting with `FromStr`, recording failures
    fn value<T>(&mut self, setting: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.raw(setting)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(e) => {
                self.error(setting, &format!("cannot parse {raw:?}: {e}"));
                None
            }
        }
    }

    fn duration(&mut self, setting: &str) -> Option<Duration> {
        let raw = self.raw(setting)?;
        match parse_duration(raw) {
            Ok(duration) => Some(duration),
            Err(e) => {
                self.error(setting, &e.to_string());
                None
            }
        }
    }

    fn duration_list(&mut self, setting: &str) -> Option<Vec<Duration>> {
        let raw = self.raw(setting)?;
        match parse_duration_list(raw) {
            Ok(durations) => Some(durations),
            Err(e) => {
                self.error(setting, &e.to_string());
                None
            }
        }
    }

    fn error(&mut self, setting: &str, message: &str) {
        self.errors.push(format!(
            "{}.{}.{}: {}",
            self.prefix, self.queue_id, setting, message
        ));
    }
}
