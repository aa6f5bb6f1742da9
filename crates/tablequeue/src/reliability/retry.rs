//! Re-enqueue delay strategies

use std::time::Duration;

use crate::settings::{ReenqueueRetryType, ReenqueueSettings, SettingError};

/// Errors from delay calculation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// The manual strategy never computes a delay
    #[error("manual re-enqueue strategy requires an explicit delay in the execution result")]
    ExplicitDelayRequired,
}

/// Maps a re-enqueue attempt number to the delay before the next attempt
///
/// `attempt` is the row's re-enqueue counter: 0 for a task that was never
/// re-enqueued, incremented on every re-enqueue.
///
/// # Example
///
/// ```
/// use tablequeue::ReenqueueRetryStrategy;
/// use std::time::Duration;
///
/// let strategy = ReenqueueRetryStrategy::Sequential(vec![
///     Duration::from_secs(1),
///     Duration::from_secs(5),
/// ]);
///
/// assert_eq!(strategy.calculate_delay(0).unwrap(), Duration::from_secs(1));
/// assert_eq!(strategy.calculate_delay(7).unwrap(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReenqueueRetryStrategy {
    /// Delay must always come with the execution result
    Manual,
    /// Constant delay
    Fixed(Duration),
    /// `plan[min(attempt, plan.len() - 1)]`
    Sequential(Vec<Duration>),
    /// `initial + step * attempt`
    Arithmetic { initial: Duration, step: Duration },
    /// `initial * ratio ^ attempt`, saturating
    Geometric { initial: Duration, ratio: u32 },
}

impl ReenqueueRetryStrategy {
    /// Build the strategy described by a settings snapshot
    pub fn from_settings(settings: &ReenqueueSettings) -> Result<Self, SettingError> {
        settings.validate()?;
        // validate() guarantees the parameters of the selected type are present
        let strategy = match settings.retry_type {
            ReenqueueRetryType::Manual => Self::Manual,
            ReenqueueRetryType::Fixed => Self::Fixed(settings.fixed_delay.unwrap_or_default()),
            ReenqueueRetryType::Sequential => {
                Self::Sequential(settings.sequential_plan.clone().unwrap_or_default())
            }
            ReenqueueRetryType::Arithmetic => Self::Arithmetic {
                initial: settings.initial_delay.unwrap_or_default(),
                step: settings.arithmetic_step.unwrap_or_default(),
            },
            ReenqueueRetryType::Geometric => Self::Geometric {
                initial: settings.initial_delay.unwrap_or_default(),
                ratio: settings.geometric_ratio.unwrap_or(1),
            },
        };
        Ok(strategy)
    }

    /// Delay before the task becomes visible again
    pub fn calculate_delay(&self, attempt: u32) -> Result<Duration, RetryError> {
        match self {
            Self::Manual => Err(RetryError::ExplicitDelayRequired),
            Self::Fixed(delay) => Ok(*delay),
            Self::Sequential(plan) => {
                let index = (attempt as usize).min(plan.len().saturating_sub(1));
                Ok(plan.get(index).copied().unwrap_or_default())
            }
            Self::Arithmetic { initial, step } => {
                Ok(initial.saturating_add(step.saturating_mul(attempt)))
            }
            Self::Geometric { initial, ratio } => {
                let multiplier = (*ratio as u128).saturating_pow(attempt);
                let millis = initial.as_millis().saturating_mul(multiplier);
                Ok(Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_manual_requires_explicit_delay() {
        let strategy = ReenqueueRetryStrategy::Manual;
        assert_eq!(
            strategy.calculate_delay(0),
            Err(RetryError::ExplicitDelayRequired)
        );
    }

    #[test]
    fn test_fixed_ignores_attempt() {
        let strategy = ReenqueueRetryStrategy::Fixed(secs(7));
        assert_eq!(strategy.calculate_delay(0), Ok(secs(7)));
        assert_eq!(strategy.calculate_delay(100), Ok(secs(7)));
    }

    #[test]
    fn test_sequential_clamps_to_last_entry() {
        let strategy = ReenqueueRetryStrategy::Sequential(vec![secs(1), secs(2), secs(3)]);
        let delays: Vec<_> = (0..5)
            .map(|attempt| strategy.calculate_delay(attempt).unwrap())
            .collect();
        assert_eq!(delays, vec![secs(1), secs(2), secs(3), secs(3), secs(3)]);
        assert_eq!(strategy.calculate_delay(u32::MAX), Ok(secs(3)));
    }

    #[test]
    fn test_arithmetic_strictly_increases() {
        let strategy = ReenqueueRetryStrategy::Arithmetic {
            initial: secs(10),
            step: secs(5),
        };
        assert_eq!(strategy.calculate_delay(0), Ok(secs(10)));
        assert_eq!(strategy.calculate_delay(3), Ok(secs(25)));
        for attempt in 0..20 {
            assert!(
                strategy.calculate_delay(attempt).unwrap()
                    < strategy.calculate_delay(attempt + 1).unwrap()
            );
        }
    }

    #[test]
    fn test_geometric_multiplies_by_ratio() {
        let strategy = ReenqueueRetryStrategy::Geometric {
            initial: secs(10),
            ratio: 3,
        };
        let delays: Vec<_> = (0..5)
            .map(|attempt| strategy.calculate_delay(attempt).unwrap())
            .collect();
        assert_eq!(
            delays,
            vec![secs(10), secs(30), secs(90), secs(270), secs(810)]
        );
    }

    #[test]
    fn test_geometric_is_exact_and_saturates() {
        let strategy = ReenqueueRetryStrategy::Geometric {
            initial: Duration::from_millis(1),
            ratio: 3,
        };
        // 3^40 is past the range where f64 holds every integer exactly
        assert_eq!(
            strategy.calculate_delay(40),
            Ok(Duration::from_millis(12_157_665_459_056_928_801))
        );
        assert_eq!(
            strategy.calculate_delay(200),
            Ok(Duration::from_millis(u64::MAX))
        );
    }

    #[test]
    fn test_from_settings() {
        let strategy =
            ReenqueueRetryStrategy::from_settings(&ReenqueueSettings::geometric(secs(1), 2))
                .unwrap();
        assert_eq!(
            strategy,
            ReenqueueRetryStrategy::Geometric {
                initial: secs(1),
                ratio: 2
            }
        );

        assert!(ReenqueueRetryStrategy::from_settings(&ReenqueueSettings::sequential(vec![]))
            .is_err());
    }
}
