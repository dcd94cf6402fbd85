use serde::{Deserialize, Serialize};

/// Transport state of a change-feed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Join requested, no reply yet
    #[default]
    Connecting,
    /// Backend acknowledged the join
    Open,
    /// Dead or explicitly closed
    Closed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub name: String,
    pub listeners: usize,
    pub state: ChannelState,
    /// Registry-wide sequence number of this entry's lifetime
    pub generation: u64,
    pub age_secs: u64,
}

/// Registry counters since process start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub active_channels: usize,
    pub channels_created: u64,
    pub channels_removed: u64,
    pub channels_reaped: u64,
}
