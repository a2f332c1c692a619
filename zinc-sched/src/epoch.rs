//! Background epoch timers.
//!
//! One tokio task per throttled channel sleeps for the channel's current
//! epoch interval and then sets its fired flag. The task never touches the
//! scheduler lock; the next `dispatch` call consumes the flag.
//!
//! Hosts that drive time themselves (simulation, tests) do not need these
//! tasks and call [`Scheduler::advance_clock`](crate::Scheduler::advance_clock)
//! instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use zinc_core::ChannelKind;

use crate::scheduler::Scheduler;
use crate::throttle::ChannelSignal;

/// Fires `signal` once per epoch until a shutdown message arrives or the
/// sender is dropped.
///
/// The interval is re-read on every re-arm, so a tunable change applies
/// from the next epoch on.
pub async fn epoch_task(
    kind: ChannelKind,
    signal: Arc<ChannelSignal>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        let interval = Duration::from_micros(signal.interval_us());
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(channel = %kind, "Epoch timer shutting down");
                break;
            }
            () = tokio::time::sleep(interval) => {
                signal.fire();
                trace!(channel = %kind, interval_us = interval.as_micros(), "Epoch fired");
            }
        }
    }
}

/// A spawned timer and the sender that stops it.
#[derive(Debug)]
struct TimerHandle {
    kind: ChannelKind,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Running epoch timers of one scheduler.
#[derive(Debug)]
pub struct EpochTimers {
    timers: Vec<TimerHandle>,
}

impl EpochTimers {
    /// Spawns one timer per channel of `scheduler`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(scheduler: &Scheduler) -> Self {
        let timers = ChannelKind::ALL
            .iter()
            .map(|&kind| {
                let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
                let signal = scheduler.epoch_signal(kind);
                let handle = tokio::spawn(epoch_task(kind, signal, shutdown_rx));
                TimerHandle {
                    kind,
                    shutdown_tx,
                    handle,
                }
            })
            .collect();
        Self { timers }
    }

    /// Number of running timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether no timer is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Stops every timer and waits for it to exit.
    pub async fn shutdown(self) {
        for timer in &self.timers {
            // A full or closed channel means the task is already stopping.
            let _ = timer.shutdown_tx.try_send(());
        }
        for timer in self.timers {
            if let Err(e) = timer.handle.await {
                warn!(channel = %timer.kind, error = %e, "Epoch timer task failed");
            }
        }
    }
}
