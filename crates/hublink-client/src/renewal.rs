//! Token renewal scheduling
//!
//! A single one-shot countdown that tells the session task when the
//! current security token is due for a refresh. The session arms it after
//! every successful connect or renewal and cancels it whenever the link
//! comes down or a renewal starts, so at most one deadline is ever
//! outstanding. Every tick is stamped with the arming that scheduled it:
//! a tick already sitting in the event channel when the timer is cancelled
//! or re-armed fails `is_current` and must be ignored.

use crate::session::commands::SessionEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub(crate) struct RenewalTimer {
    task: Option<JoinHandle<()>>,
    arming: u64,
}

impl RenewalTimer {
    pub fn new() -> Self {
        RenewalTimer { task: None, arming: 0 }
    }

    /// (Re)start the countdown, superseding any previous deadline.
    pub fn arm(&mut self, interval: Duration, events: mpsc::UnboundedSender<SessionEvent>) {
        self.cancel();
        let arming = self.arming;
        debug!(?interval, arming, "arming token renewal timer");
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = events.send(SessionEvent::RenewalDue { arming });
        }));
    }

    /// Stop the countdown and invalidate any tick it already delivered.
    pub fn cancel(&mut self) {
        self.arming += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether a delivered tick belongs to the live arming.
    pub fn is_current(&self, arming: u64) -> bool {
        self.arming == arming
    }
}

impl Drop for RenewalTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
