//! Configuration for [`MessageAssembler`](super::MessageAssembler).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::overflow::OverflowConfig;

/// Default inactivity window after which partial assemblies are discarded.
pub const DEFAULT_EXPIRE_AFTER_INACTIVITY: Duration = Duration::from_secs(60);

/// Settings for a [`MessageAssembler`](super::MessageAssembler).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use message_slicing::{assembler::AssemblerConfig, overflow::OverflowConfig};
///
/// let config = AssemblerConfig::default()
///     .expire_after_inactivity(Duration::from_secs(10))
///     .overflow(OverflowConfig::default().threshold(4096));
///
/// assert_eq!(config.expire_after_inactivity, Duration::from_secs(10));
/// assert_eq!(config.log_context, "assembler");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Discard a partial assembly after this long without a slice.
    ///
    /// Default: 60 seconds.
    pub expire_after_inactivity: Duration,

    /// Buffer settings for re-assembled payloads.
    pub overflow: OverflowConfig,

    /// Label attached to every log event.
    ///
    /// Default: `"assembler"`.
    pub log_context: String,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            expire_after_inactivity: DEFAULT_EXPIRE_AFTER_INACTIVITY,
            overflow: OverflowConfig::default(),
            log_context: "assembler".to_owned(),
        }
    }
}

impl AssemblerConfig {
    /// Set the inactivity window.
    #[must_use]
    pub fn expire_after_inactivity(mut self, window: Duration) -> Self {
        self.expire_after_inactivity = window;
        self
    }

    /// Set the re-assembly buffer settings.
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
