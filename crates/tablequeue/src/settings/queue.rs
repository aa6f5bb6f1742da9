//! Queue settings groups
//!
//! Each group is an independent [`DynamicSetting`] so a reload can swap one
//! without touching the others. Only `thread_count` of the processing group is
//! acted on live; the processing mode is read once when the queue is registered.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::dynamic::{diff_field, DynamicSetting, SettingError, SettingValue};
use super::location::QueueLocation;

/// Transaction and executor boundaries around one worker iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    /// Pick and process run in two independent transactions
    SeparateTransactions,
    /// Pick, process and result handling share one transaction
    WrapInTransaction,
    /// Pick synchronously, process on a caller-supplied executor
    UseExternalExecutor,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SeparateTransactions => "separate-transactions",
            Self::WrapInTransaction => "wrap-in-transaction",
            Self::UseExternalExecutor => "use-external-executor",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "separate-transactions" => Ok(Self::SeparateTransactions),
            "wrap-in-transaction" => Ok(Self::WrapInTransaction),
            "use-external-executor" => Ok(Self::UseExternalExecutor),
            other => Err(format!("unknown processing mode: {other}")),
        }
    }
}

/// Worker count and processing mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    pub thread_count: u32,
    pub processing_mode: ProcessingMode,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            thread_count: 1,
            processing_mode: ProcessingMode::SeparateTransactions,
        }
    }
}

impl ProcessingSettings {
    pub fn new(thread_count: u32, processing_mode: ProcessingMode) -> Self {
        Self {
            thread_count,
            processing_mode,
        }
    }
}

impl SettingValue for ProcessingSettings {
    const NAME: &'static str = "processing";

    fn diff_fields(&self, old: &Self) -> Vec<String> {
        [
            diff_field("thread_count", &old.thread_count, &self.thread_count),
            diff_field("processing_mode", &old.processing_mode, &self.processing_mode),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Pacing between worker iterations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Pause after a task was processed. Wakeups do not shorten it.
    pub between_task_timeout: Duration,
    /// Pause after an empty pick. Wakeups end it early.
    pub no_task_timeout: Duration,
    /// Pause after an iteration failed outside task processing
    pub fatal_crash_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            between_task_timeout: Duration::from_millis(100),
            no_task_timeout: Duration::from_secs(1),
            fatal_crash_timeout: Duration::from_secs(1),
        }
    }
}

impl SettingValue for PollSettings {
    const NAME: &'static str = "poll";

    fn diff_fields(&self, old: &Self) -> Vec<String> {
        [
            diff_field(
                "between_task_timeout",
                &old.between_task_timeout,
                &self.between_task_timeout,
            ),
            diff_field("no_task_timeout", &old.no_task_timeout, &self.no_task_timeout),
            diff_field(
                "fatal_crash_timeout",
                &old.fatal_crash_timeout,
                &self.fatal_crash_timeout,
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// How far a picked row is pushed forward, in case processing never finalizes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureRetryType {
    /// `interval * 2^attempt`
    GeometricBackoff,
    /// `interval * (1 + 2 * attempt)`
    ArithmeticBackoff,
    /// `interval`
    LinearBackoff,
}

impl FromStr for FailureRetryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "geometric" => Ok(Self::GeometricBackoff),
            "arithmetic" => Ok(Self::ArithmeticBackoff),
            "linear" => Ok(Self::LinearBackoff),
            other => Err(format!("unknown retry type: {other}")),
        }
    }
}

/// Visibility delay applied to a row when it is picked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSettings {
    pub retry_type: FailureRetryType,
    pub retry_interval: Duration,
}

impl Default for FailureSettings {
    fn default() -> Self {
        Self {
            retry_type: FailureRetryType::GeometricBackoff,
            retry_interval: Duration::from_secs(60),
        }
    }
}

impl FailureSettings {
    pub fn new(retry_type: FailureRetryType, retry_interval: Duration) -> Self {
        Self {
            retry_type,
            retry_interval,
        }
    }

    /// Delay for a row picked with `attempt` previous failed attempts
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier: u32 = match self.retry_type {
            FailureRetryType::LinearBackoff => 1,
            FailureRetryType::ArithmeticBackoff => attempt.saturating_mul(2).saturating_add(1),
            FailureRetryType::GeometricBackoff => 2u32.checked_pow(attempt).unwrap_or(u32::MAX),
        };
        self.retry_interval.saturating_mul(multiplier)
    }
}

impl SettingValue for FailureSettings {
    const NAME: &'static str = "failure";

    fn diff_fields(&self, old: &Self) -> Vec<String> {
        [
            diff_field("retry_type", &old.retry_type, &self.retry_type),
            diff_field("retry_interval", &old.retry_interval, &self.retry_interval),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Re-enqueue strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReenqueueRetryType {
    Manual,
    Fixed,
    Sequential,
    Arithmetic,
    Geometric,
}

impl FromStr for ReenqueueRetryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "fixed" => Ok(Self::Fixed),
            "sequential" => Ok(Self::Sequential),
            "arithmetic" => Ok(Self::Arithmetic),
            "geometric" => Ok(Self::Geometric),
            other => Err(format!("unknown reenqueue retry type: {other}")),
        }
    }
}

/// Re-enqueue strategy and its parameters
///
/// Only the parameters of the selected type are meaningful. Use the
/// constructors, or [`validate`](Self::validate) after filling fields by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReenqueueSettings {
    pub retry_type: ReenqueueRetryType,
    pub fixed_delay: Option<Duration>,
    pub sequential_plan: Option<Vec<Duration>>,
    pub initial_delay: Option<Duration>,
    pub arithmetic_step: Option<Duration>,
    pub geometric_ratio: Option<u32>,
}

impl Default for ReenqueueSettings {
    fn default() -> Self {
        Self::manual()
    }
}

impl ReenqueueSettings {
    fn of(retry_type: ReenqueueRetryType) -> Self {
        Self {
            retry_type,
            fixed_delay: None,
            sequential_plan: None,
            initial_delay: None,
            arithmetic_step: None,
            geometric_ratio: None,
        }
    }

    pub fn manual() -> Self {
        Self::of(ReenqueueRetryType::Manual)
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            fixed_delay: Some(delay),
            ..Self::of(ReenqueueRetryType::Fixed)
        }
    }

    pub fn sequential(plan: Vec<Duration>) -> Self {
        Self {
            sequential_plan: Some(plan),
            ..Self::of(ReenqueueRetryType::Sequential)
        }
    }

    pub fn arithmetic(initial_delay: Duration, step: Duration) -> Self {
        Self {
            initial_delay: Some(initial_delay),
            arithmetic_step: Some(step),
            ..Self::of(ReenqueueRetryType::Arithmetic)
        }
    }

    pub fn geometric(initial_delay: Duration, ratio: u32) -> Self {
        Self {
            initial_delay: Some(initial_delay),
            geometric_ratio: Some(ratio),
            ..Self::of(ReenqueueRetryType::Geometric)
        }
    }

    /// Check that the selected type has all of its parameters
    pub fn validate(&self) -> Result<(), SettingError> {
        let missing = |field: &str| SettingError::Invalid {
            setting: Self::NAME,
            reason: format!("{field} is required for {:?} retry type", self.retry_type),
        };
        match self.retry_type {
            ReenqueueRetryType::Manual => {}
            ReenqueueRetryType::Fixed => {
                self.fixed_delay.ok_or_else(|| missing("fixed_delay"))?;
            }
            ReenqueueRetryType::Sequential => match &self.sequential_plan {
                Some(plan) if !plan.is_empty() => {}
                _ => return Err(missing("sequential_plan")),
            },
            ReenqueueRetryType::Arithmetic => {
                self.initial_delay.ok_or_else(|| missing("initial_delay"))?;
                self.arithmetic_step.ok_or_else(|| missing("arithmetic_step"))?;
            }
            ReenqueueRetryType::Geometric => {
                self.initial_delay.ok_or_else(|| missing("initial_delay"))?;
                self.geometric_ratio.ok_or_else(|| missing("geometric_ratio"))?;
            }
        }
        Ok(())
    }
}

impl SettingValue for ReenqueueSettings {
    const NAME: &'static str = "reenqueue";

    fn diff_fields(&self, old: &Self) -> Vec<String> {
        [
            diff_field("retry_type", &old.retry_type, &self.retry_type),
            diff_field("fixed_delay", &old.fixed_delay, &self.fixed_delay),
            diff_field("sequential_plan", &old.sequential_plan, &self.sequential_plan),
            diff_field("initial_delay", &old.initial_delay, &self.initial_delay),
            diff_field("arithmetic_step", &old.arithmetic_step, &self.arithmetic_step),
            diff_field("geometric_ratio", &old.geometric_ratio, &self.geometric_ratio),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Free-form settings passed through to consumers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtSettings {
    pub values: BTreeMap<String, String>,
}

impl ExtSettings {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl SettingValue for ExtSettings {
    const NAME: &'static str = "ext";

    fn diff_fields(&self, old: &Self) -> Vec<String> {
        let mut diffs = Vec::new();
        for (key, old_value) in &old.values {
            match self.values.get(key) {
                Some(new_value) if new_value != old_value => {
                    diffs.push(format!("{key}={old_value:?}->{new_value:?}"))
                }
                Some(_) => {}
                None => diffs.push(format!("{key}={old_value:?}->None")),
            }
        }
        for (key, new_value) in &self.values {
            if !old.values.contains_key(key) {
                diffs.push(format!("{key}=None->{new_value:?}"));
            }
        }
        diffs
    }
}

/// All settings of one queue
///
/// Cloning shares the underlying cells.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub processing: Arc<DynamicSetting<ProcessingSettings>>,
    pub poll: Arc<DynamicSetting<PollSettings>>,
    pub failure: Arc<DynamicSetting<FailureSettings>>,
    pub reenqueue: Arc<DynamicSetting<ReenqueueSettings>>,
    pub ext: Arc<DynamicSetting<ExtSettings>>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::new(
            ProcessingSettings::default(),
            PollSettings::default(),
            FailureSettings::default(),
            ReenqueueSettings::default(),
            ExtSettings::default(),
        )
    }
}

impl QueueSettings {
    pub fn new(
        processing: ProcessingSettings,
        poll: PollSettings,
        failure: FailureSettings,
        reenqueue: ReenqueueSettings,
        ext: ExtSettings,
    ) -> Self {
        Self {
            processing: Arc::new(DynamicSetting::new(processing)),
            poll: Arc::new(DynamicSetting::new(poll)),
            failure: Arc::new(DynamicSetting::new(failure)),
            reenqueue: Arc::new(DynamicSetting::new(reenqueue)),
            ext: Arc::new(DynamicSetting::new(ext)),
        }
    }

    pub fn with_processing(mut self, settings: ProcessingSettings) -> Self {
        self.processing = Arc::new(DynamicSetting::new(settings));
        self
    }

    pub fn with_poll(mut self, settings: PollSettings) -> Self {
        self.poll = Arc::new(DynamicSetting::new(settings));
        self
    }

    pub fn with_failure(mut self, settings: FailureSettings) -> Self {
        self.failure = Arc::new(DynamicSetting::new(settings));
        self
    }

    pub fn with_reenqueue(mut self, settings: ReenqueueSettings) -> Self {
        self.reenqueue = Arc::new(DynamicSetting::new(settings));
        self
    }

    pub fn with_ext(mut self, settings: ExtSettings) -> Self {
        self.ext = Arc::new(DynamicSetting::new(settings));
        self
    }
}

/// A queue's location and settings
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub location: QueueLocation,
    pub settings: QueueSettings,
}

impl QueueConfig {
    pub fn new(location: QueueLocation, settings: QueueSettings) -> Self {
        Self { location, settings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_delay_by_type() {
        let interval = Duration::from_secs(10);
        let linear = FailureSettings::new(FailureRetryType::LinearBackoff, interval);
        let arithmetic = FailureSettings::new(FailureRetryType::ArithmeticBackoff, interval);
        let geometric = FailureSettings::new(FailureRetryType::GeometricBackoff, interval);

        assert_eq!(linear.delay_for_attempt(5), Duration::from_secs(10));
        assert_eq!(arithmetic.delay_for_attempt(0), Duration::from_secs(10));
        assert_eq!(arithmetic.delay_for_attempt(2), Duration::from_secs(50));
        assert_eq!(geometric.delay_for_attempt(0), Duration::from_secs(10));
        assert_eq!(geometric.delay_for_attempt(3), Duration::from_secs(80));
    }

    #[test]
    fn test_failure_delay_saturates() {
        let geometric =
            FailureSettings::new(FailureRetryType::GeometricBackoff, Duration::from_secs(1));
        assert_eq!(geometric.delay_for_attempt(200), Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn test_reenqueue_validation() {
        assert!(ReenqueueSettings::manual().validate().is_ok());
        assert!(ReenqueueSettings::sequential(vec![]).validate().is_err());

        let mut settings = ReenqueueSettings::of(ReenqueueRetryType::Geometric);
        settings.initial_delay = Some(Duration::from_secs(1));
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("geometric_ratio"));
    }

    #[test]
    fn test_ext_diff_reports_added_changed_removed() {
        let old = ExtSettings::new(BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]));
        let new = ExtSettings::new(BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "3".to_string()),
            ("c".to_string(), "4".to_string()),
        ]));
        assert_eq!(
            new.diff_fields(&old),
            vec!["b=\"2\"->\"3\"".to_string(), "c=None->\"4\"".to_string()]
        );
    }

    #[test]
    fn test_processing_mode_round_trips_through_str() {
        for mode in [
            ProcessingMode::SeparateTransactions,
            ProcessingMode::WrapInTransaction,
            ProcessingMode::UseExternalExecutor,
        ] {
            assert_eq!(mode.as_str().parse::<ProcessingMode>(), Ok(mode));
        }
        assert!("other".parse::<ProcessingMode>().is_err());
    }

    #[test]
    fn test_queue_settings_clone_shares_cells() {
        let settings = QueueSettings::default();
        let copy = settings.clone();
        settings
            .processing
            .set_value(ProcessingSettings::new(4, ProcessingMode::SeparateTransactions));
        assert_eq!(copy.processing.get().thread_count, 4);
    }
}
