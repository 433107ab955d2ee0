use serde::Serialize;

/// Lifecycle status of the push channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Open,
    ClosedReconnecting,
    /// Terminal: set by teardown, never left.
    Disabled,
}

/// Observable connection state.
///
/// `attempt` counts consecutive failed or closed connections and resets
/// to zero when a channel opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub attempt: u32,
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        self.status == ConnectionStatus::Open
    }

    pub fn is_disabled(&self) -> bool {
        self.status == ConnectionStatus::Disabled
    }
}
