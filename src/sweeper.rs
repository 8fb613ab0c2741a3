//! Periodic expiry sweeps driven by a tokio task.
//!
//! Slicers and assemblers never start timers of their own; the host decides
//! when to sweep. [`spawn_sweeper`] is the common case: sweep on a fixed
//! period until a [`CancellationToken`] fires.

use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::trace;

/// Something holding state that can expire.
pub trait Sweep: Send + Sync + 'static {
    /// Evict every entry idle past its window. Returns how many were evicted.
    fn sweep_expired(&self) -> usize;
}

/// Sweep `target` every `period` on `tracker` until `shutdown` is cancelled.
///
/// The first sweep happens one `period` after spawning. Ticks missed while a
/// sweep runs are skipped rather than replayed.
///
/// # Panics
///
/// Panics if `period` is zero.
///
/// # Examples
///
/// ```
/// use std::{sync::Arc, time::Duration};
///
/// use message_slicing::{
///     assembler::{AssemblerConfig, MessageAssembler},
///     sweeper::spawn_sweeper,
///     transport::ChannelTransport,
/// };
/// use tokio_util::{sync::CancellationToken, task::TaskTracker};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let assembler = Arc::new(MessageAssembler::new(
///     AssemblerConfig::default(),
///     ChannelTransport::<String, u64>::new(),
///     |_message: String, _sender: u64| {},
/// ));
/// let tracker = TaskTracker::new();
/// let shutdown = CancellationToken::new();
/// let handle = spawn_sweeper(&tracker, assembler, Duration::from_secs(5), shutdown.clone());
///
/// shutdown.cancel();
/// handle.await.expect("sweeper stops cleanly");
/// # }
/// ```
pub fn spawn_sweeper<S: Sweep>(
    tracker: &TaskTracker,
    target: Arc<S>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tracker.spawn(async move {
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticks.tick().await;
        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,

                _ = ticks.tick() => {
                    let evicted = target.sweep_expired();
                    trace!(evicted, "expiry sweep finished");
                }
            }
        }
    })
}
