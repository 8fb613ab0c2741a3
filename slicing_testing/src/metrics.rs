//! Helpers for asserting on counters recorded by `message_slicing`.

use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};

/// Creates a debugging recorder and snapshotter for metrics testing.
#[must_use]
pub fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

/// Counter values captured by a single snapshot.
///
/// Taking a snapshot resets the recorder's counters, so capture once after
/// the exercise and query the result as often as needed.
pub struct Counters {
    values: Vec<(CompositeKey, u64)>,
}

impl Counters {
    /// Snapshot every counter currently held by `snapshotter`.
    #[must_use]
    pub fn capture(snapshotter: &Snapshotter) -> Self {
        let values = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(count) => Some((key, count)),
                _ => None,
            })
            .collect();
        Self { values }
    }

    /// Sum of counter `name` across series carrying `label` (any value when
    /// `None`).
    #[must_use]
    pub fn get(&self, name: &str, label: Option<(&str, &str)>) -> u64 {
        self.values
            .iter()
            .filter(|(key, _)| key.key().name() == name)
            .filter(|(key, _)| {
                label.is_none_or(|(label_key, label_value)| {
                    key.key()
                        .labels()
                        .any(|l| l.key() == label_key && l.value() == label_value)
                })
            })
            .map(|(_, count)| count)
            .sum()
    }
}
