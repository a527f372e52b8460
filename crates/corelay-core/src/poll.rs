//! ---
//! corelay_section: "04-relay-core"
//! corelay_subsection: "module"
//! corelay_type: "source"
//! corelay_scope: "code"
//! corelay_description: "Poll schedules for submitters waiting on correlation records."
//! corelay_version: "v0.1.0"
//! corelay_owner: "tbd"
//! ---
use std::time::Duration;

use corelay_common::{PollStrategyKind, SubmitterConfig};

/// How a submitter spaces its store reads.
///
/// Every attempt waits first and then reads, so a strategy with `attempts = R` performs
/// exactly `R` reads and gives up after the sum of its delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollStrategy {
    /// Constant delay between reads.
    Fixed {
        /// Number of reads.
        attempts: u32,
        /// Wait before each read.
        delay: Duration,
    },
    /// Delay grows geometrically, capped at `max_delay`.
    Exponential {
        /// Number of reads.
        attempts: u32,
        /// Wait before the first read.
        initial_delay: Duration,
        /// Upper bound on any single wait.
        max_delay: Duration,
        /// Growth factor applied per attempt.
        multiplier: f64,
    },
}

impl Default for PollStrategy {
    fn default() -> Self {
        PollStrategy::Fixed {
            attempts: 10,
            delay: Duration::from_secs(2),
        }
    }
}

impl PollStrategy {
    /// Build from the `[submitter]` configuration block.
    pub fn from_config(config: &SubmitterConfig) -> Self {
        match config.strategy {
            PollStrategyKind::Fixed => PollStrategy::Fixed {
                attempts: config.attempts,
                delay: config.delay,
            },
            PollStrategyKind::Exponential => PollStrategy::Exponential {
                attempts: config.attempts,
                initial_delay: config.delay,
                max_delay: config.max_delay,
                multiplier: config.multiplier,
            },
        }
    }

    /// Number of store reads before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            PollStrategy::Fixed { attempts, .. } | PollStrategy::Exponential { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Wait preceding the given 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            PollStrategy::Fixed { delay, .. } => delay,
            PollStrategy::Exponential {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let factor = multiplier.max(1.0).powi(exponent);
                let scaled = initial_delay.as_secs_f64() * factor;
                if !scaled.is_finite() || scaled >= max_delay.as_secs_f64() {
                    max_delay.max(initial_delay)
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }

    /// Total time spent waiting when no record ever appears.
    pub fn max_wait(&self) -> Duration {
        (1..=self.attempts()).map(|attempt| self.delay_for(attempt)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_ten_reads_two_seconds_apart() {
        let strategy = PollStrategy::default();
        assert_eq!(strategy.attempts(), 10);
        assert_eq!(strategy.delay_for(1), Duration::from_secs(2));
        assert_eq!(strategy.delay_for(10), Duration::from_secs(2));
        assert_eq!(strategy.max_wait(), Duration::from_secs(20));
    }

    #[test]
    fn exponential_grows_and_caps() {
        let strategy = PollStrategy::Exponential {
            attempts: 6,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
        };
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| strategy.delay_for(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 4000, 4000]);
        assert_eq!(strategy.max_wait(), Duration::from_millis(15_500));
    }

    #[test]
    fn huge_exponents_saturate_at_the_cap() {
        let strategy = PollStrategy::Exponential {
            attempts: u32::MAX,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 10.0,
        };
        assert_eq!(strategy.delay_for(5_000), Duration::from_secs(30));
    }

    #[test]
    fn config_selects_strategy() {
        let mut config = SubmitterConfig::default();
        assert_eq!(PollStrategy::from_config(&config), PollStrategy::default());

        config.strategy = PollStrategyKind::Exponential;
        config.attempts = 4;
        match PollStrategy::from_config(&config) {
            PollStrategy::Exponential {
                attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(initial_delay, config.delay);
                assert_eq!(max_delay, config.max_delay);
                assert_eq!(multiplier, config.multiplier);
            }
            other => panic!("unexpected strategy {other:?}"),
        }
    }
}
