//! Configuration for [`MessageSlicer`](super::MessageSlicer).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::overflow::OverflowConfig;

/// Default number of attempts per transfer, including the first.
pub const DEFAULT_MAX_TRIES: NonZeroU32 = NonZeroU32::new(3).expect("3 is non-zero");

/// Settings for a [`MessageSlicer`](super::MessageSlicer).
///
/// # Examples
///
/// ```
/// use std::{num::NonZeroUsize, time::Duration};
///
/// use message_slicing::slicer::SlicerConfig;
///
/// let config = SlicerConfig::new(NonZeroUsize::new(2048).expect("non-zero"))
///     .expire_after_inactivity(Duration::from_secs(30))
///     .log_context("shard-1");
///
/// assert_eq!(config.slice_size.get(), 2048);
/// assert_eq!(config.max_tries.get(), 3);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlicerConfig {
    /// Maximum payload bytes per slice.
    pub slice_size: NonZeroUsize,
    /// Attempts per transfer before it fails, counting the first.
    ///
    /// Default: 3.
    pub max_tries: NonZeroU32,
    /// Evict transfers with no reply activity for this long.
    ///
    /// Default: never.
    pub expire_after_inactivity: Option<Duration>,
    /// Staging buffer settings for serialized messages.
    pub overflow: OverflowConfig,
    /// Label attached to every log event.
    pub log_context: String,
}

impl SlicerConfig {
    /// Create a configuration with the required slice size and defaults for
    /// everything else.
    #[must_use]
    pub fn new(slice_size: NonZeroUsize) -> Self {
        Self {
            slice_size,
            max_tries: DEFAULT_MAX_TRIES,
            expire_after_inactivity: None,
            overflow: OverflowConfig::default(),
            log_context: "slicer".to_owned(),
        }
    }

    /// Set the attempt limit.
    #[must_use]
    pub fn max_tries(mut self, max_tries: NonZeroU32) -> Self {
        self.max_tries = max_tries;
        self
    }

    /// Enable inactivity expiry.
    #[must_use]
    pub fn expire_after_inactivity(mut self, window: Duration) -> Self {
        self.expire_after_inactivity = Some(window);
        self
    }

    /// Set the staging buffer settings.
    #[must_use]
    pub fn overflow(mut self, overflow: OverflowConfig) -> Self {
        self.overflow = overflow;
        self
    }

    /// Set the log label.
    #[must_use]
    pub fn log_context(mut self, context: impl Into<String>) -> Self {
        self.log_context = context.into();
        self
    }
}
