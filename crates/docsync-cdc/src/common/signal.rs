//! Restart signaling between the import coordinator and the tail session.
//!
//! Each tail session gets its own [`RestartSignal`], a child of the engine's
//! shutdown token, so both a restart and a shutdown stop the session. The
//! import coordinator never touches the signal directly: it sends one
//! [`RestartRequest`] to the orchestration loop, which owns the session and
//! fires it.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Restart requests buffered between coordinator and loop.
const RESTART_CHANNEL_CAPACITY: usize = 4;

/// Request to restart tailing with additional datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartRequest {
    /// Datasets to fold into the tailed set
    pub datasets: Vec<String>,
}

/// Sending half held by the import coordinator.
pub type RestartSender = mpsc::Sender<RestartRequest>;

/// Receiving half held by the orchestration loop.
pub type RestartReceiver = mpsc::Receiver<RestartRequest>;

pub fn restart_channel() -> (RestartSender, RestartReceiver) {
    mpsc::channel(RESTART_CHANNEL_CAPACITY)
}

/// Stop signal for one tail session.
#[derive(Debug, Clone, Default)]
pub struct RestartSignal {
    token: CancellationToken,
}

impl RestartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that also fires when `parent` is cancelled.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    pub fn fire(&self) {
        self.token.cancel();
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has fired.
    pub async fn fired(&self) {
        self.token.cancelled().await
    }
}
