//! Live-update poller for an active checklist view.
//!
//! While a lot's checklist tab is open and visible, a background task
//! re-fetches the ITP instance at a fixed interval so hold-point releases
//! and completions made by another party show up quickly. The refresh goes
//! through [`LotSession::poll_refresh`], which only replaces the view when
//! the fresh result meaningfully differs, and swallows fetch failures.
//!
//! The task is bound to the view's lifetime:
//!
//! - hiding the view pauses ticking,
//! - making it visible again triggers an immediate refresh and resumes the
//!   interval,
//! - [`PollerHandle::cancel`] (or dropping the handle) stops the task for
//!   good; no further ticks after cancellation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::session::LotSession;


/// Default refresh interval while the view is visible.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Minimum poll interval to prevent hammering the server.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum poll interval to keep hold-point releases timely.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Errors constructing a poller configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PollerError {
    /// The interval is outside the allowed bounds.
    #[error("poll interval {actual_secs}s outside allowed range {min_secs}s..={max_secs}s")]
    IntervalOutOfRange {
        /// The rejected interval, in seconds.
        actual_secs: u64,
        /// Minimum allowed, in seconds.
        min_secs: u64,
        /// Maximum allowed, in seconds.
        max_secs: u64,
    },
}

/// Poller configuration.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollerConfig {
    /// Sets the poll interval, validated against the allowed bounds.
    pub fn with_interval(mut self, interval: Duration) -> Result<Self, PollerError> {
        if interval < MIN_POLL_INTERVAL || interval > MAX_POLL_INTERVAL {
            return Err(PollerError::IntervalOutOfRange {
                actual_secs: interval.as_secs(),
                min_secs: MIN_POLL_INTERVAL.as_secs(),
                max_secs: MAX_POLL_INTERVAL.as_secs(),
            });
        }
        self.interval = interval;
        Ok(self)
    }

    /// The configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

/// The scheduled refresh task.
pub struct LivePoller;

impl LivePoller {
    /// Spawns the poll loop for a session. The view starts visible and
    /// refreshes immediately on the first tick.
    #[must_use]
    pub fn spawn(session: Arc<LotSession>, config: PollerConfig) -> PollerHandle {
        let (visible_tx, visible_rx) = watch::channel(true);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(session, config.interval, visible_rx, cancel_rx));
        PollerHandle {
            visible_tx,
            cancel_tx,
            task,
        }
    }
}

/// Handle controlling a running poller; owned by the view.
pub struct PollerHandle {
    visible_tx: watch::Sender<bool>,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Pauses or resumes polling. Resuming triggers an immediate refresh
    /// before the interval restarts.
    pub fn set_visible(&self, visible: bool) {
        // Receiver gone means the task already finished; nothing to do.
        let _ = self.visible_tx.send(visible);
    }

    /// Cancels the poller. No further ticks run after this returns the
    /// task to the scheduler.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Whether the task has fully stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        // Navigating away must stop the task even without an explicit
        // cancel call.
        let _ = self.cancel_tx.send(true);
        self.task.abort();
    }
}

async fn poll_loop(
    session: Arc<LotSession>,
    interval: Duration,
    mut visible_rx: watch::Receiver<bool>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // A hidden stretch longer than the interval must not burst on resume.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let visible = *visible_rx.borrow();
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    debug!(lot_id = %session.lot_id(), "poller cancelled");
                    return;
                }
            },
            changed = visible_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                if *visible_rx.borrow() {
                    // Back on screen: refresh now, then fall back into the
                    // regular cadence.
                    session.poll_refresh().await;
                    ticker.reset();
                }
            },
            _ = ticker.tick(), if visible => {
                session.poll_refresh().await;
            },
        }
    }
}
