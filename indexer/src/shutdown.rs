use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
/// Types of Shutdown states
pub enum ShutdownState {
    NotStarted,
    Started,
    Complete,
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShutdownState::NotStarted => write!(f, "NotStarted"),
            ShutdownState::Started => write!(f, "Started"),
            ShutdownState::Complete => write!(f, "Complete"),
        }
    }
}

/// Tracks a one-way shutdown of a component.
///
/// The state only ever moves forward: `NotStarted -> Started -> Complete`.
/// It is held in a `watch` channel so waiters that subscribe after a
/// transition still observe it; nothing is lost between `begin` and
/// `wait_begin`.
#[derive(Debug)]
pub struct Shutdown {
    state: watch::Sender<ShutdownState>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Shutdown {
        let (state, _) = watch::channel(ShutdownState::NotStarted);
        Shutdown { state }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Returns `true` if the shutdown signal has been received.
    pub fn is_shutdown(&self) -> bool {
        self.state() >= ShutdownState::Started
    }

    /// Begin the shutdown. Returns `false` if it had already begun.
    pub fn begin(&self) -> bool {
        self.advance(ShutdownState::Started)
    }

    /// Wait for the begin shutdown notice.
    pub async fn wait_begin(&self) {
        self.wait_for(ShutdownState::Started).await
    }

    /// Complete the shutdown.
    pub fn complete(&self) {
        self.advance(ShutdownState::Complete);
    }

    /// Wait for the shutdown to complete.
    pub async fn wait_complete(&self) {
        self.wait_for(ShutdownState::Complete).await
    }

    fn advance(&self, to: ShutdownState) -> bool {
        self.state.send_if_modified(|current| {
            if *current >= to {
                return false;
            }
            *current = to;
            true
        })
    }

    async fn wait_for(&self, target: ShutdownState) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel can't close while we wait.
        let _ = rx.wait_for(|s| *s >= target).await;
    }
}
