use {
    serde::Serialize,
    tokio::sync::watch,
    tracing::debug,
};

/// Lifecycle of the daemon, published on a `watch` channel.
///
/// `Idle → Polling → Dispatching → Idle` per cycle; `Stopping` once shutdown
/// is observed; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    #[default]
    Idle,
    Polling,
    Dispatching,
    Stopping,
    Stopped,
}

impl DaemonState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Dispatching => "dispatching",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }

    #[must_use]
    pub fn is_shutting_down(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

/// Publish `next` unless shutdown has begun and `next` is a cycle state.
pub(crate) fn publish(state: &watch::Sender<DaemonState>, next: DaemonState) {
    state.send_if_modified(|current| {
        if *current == next || (current.is_shutting_down() && !next.is_shutting_down()) {
            return false;
        }
        let previous = std::mem::replace(current, next);
        debug!(from = %previous, to = %next, "daemon state");
        true
    });
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
