//! Validated configuration.
//!
//! Every tunable is a `nutype` newtype checked at construction, so a config
//! value that exists is a valid one. The structs derive serde so hosts can
//! load them from whatever source they already use.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of events requested per read when replaying a stream.
///
/// Validated to be between 1 and 4096.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 4096),
    default = 512,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct ReadBatchSize(u64);

/// Pause before a dropped subscription is reopened, in milliseconds.
///
/// Validated to be between 1ms and 10 minutes.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600_000),
    default = 1_000,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct ResubscribeDelayMs(u64);

impl ResubscribeDelayMs {
    /// Convert to Duration for use with tokio::time::sleep.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Name under which a subscription stores its checkpoint.
///
/// Trimmed, non-empty and at most 200 characters so the checkpoint stream
/// name stays within the stream id limit.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct SubscriptionId(String);

/// Settings for [`AggregateStore`](crate::aggregate_store::AggregateStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateStoreConfig {
    /// Events per read while loading
    #[serde(default)]
    pub read_batch_size: ReadBatchSize,
    /// Keep applied history on loaded aggregates
    #[serde(default)]
    pub track_history: bool,
}

impl AggregateStoreConfig {
    /// Sets the read batch size.
    #[must_use]
    pub const fn with_read_batch_size(mut self, read_batch_size: ReadBatchSize) -> Self {
        self.read_batch_size = read_batch_size;
        self
    }

    /// Enables applied-history tracking on loaded aggregates.
    #[must_use]
    pub const fn with_history_tracking(mut self) -> Self {
        self.track_history = true;
        self
    }
}

/// Settings for a [`SubscriptionWorker`](crate::subscription::SubscriptionWorker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Checkpoint key
    pub subscription_id: SubscriptionId,
    /// Pause before resubscribing after a drop
    #[serde(default)]
    pub resubscribe_delay: ResubscribeDelayMs,
}

impl SubscriptionConfig {
    /// Creates a config with the default resubscribe delay.
    pub fn new(subscription_id: SubscriptionId) -> Self {
        Self {
            subscription_id,
            resubscribe_delay: ResubscribeDelayMs::default(),
        }
    }

    /// Sets the resubscribe delay.
    #[must_use]
    pub const fn with_resubscribe_delay(mut self, resubscribe_delay: ResubscribeDelayMs) -> Self {
        self.resubscribe_delay = resubscribe_delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn read_batch_size_accepts_valid_range(n in 1u64..=4096) {
            prop_assert!(ReadBatchSize::try_new(n).is_ok());
        }

        #[test]
        fn read_batch_size_rejects_out_of_range(n in 4097u64..100_000) {
            prop_assert!(ReadBatchSize::try_new(n).is_err());
        }

        #[test]
        fn resubscribe_delay_converts_to_duration(ms in 1u64..=600_000) {
            let delay = ResubscribeDelayMs::try_new(ms).unwrap();
            prop_assert_eq!(delay.as_duration(), Duration::from_millis(ms));
        }
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(ReadBatchSize::try_new(0).is_err());
        assert!(ResubscribeDelayMs::try_new(0).is_err());
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(u64::from(ReadBatchSize::default()), 512);
        assert_eq!(
            ResubscribeDelayMs::default().as_duration(),
            Duration::from_secs(1)
        );
        assert!(!AggregateStoreConfig::default().track_history);
    }

    #[test]
    fn subscription_id_is_trimmed_and_bounded() {
        let id = SubscriptionId::try_new("  orders-projection ").unwrap();
        assert_eq!(id.as_ref(), "orders-projection");

        assert!(SubscriptionId::try_new("   ").is_err());
        assert!(SubscriptionId::try_new("x".repeat(201)).is_err());
    }

    #[test]
    fn subscription_config_fills_in_default_delay() {
        let config: SubscriptionConfig =
            serde_json::from_str(r#"{"subscription_id":"sub-1"}"#).unwrap();

        assert_eq!(config.subscription_id.as_ref(), "sub-1");
        assert_eq!(config.resubscribe_delay, ResubscribeDelayMs::default());
    }

    #[test]
    fn aggregate_store_config_rejects_invalid_batch_size() {
        let result: Result<AggregateStoreConfig, _> =
            serde_json::from_str(r#"{"read_batch_size":0}"#);

        assert!(result.is_err());
    }
}
