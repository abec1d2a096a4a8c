//! Discrete audit records for the UI and other sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ObjectId;

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum NotificationKind {
    ServerConnected,
    ServerConnectFailed,
    ChannelJoined,
    ChannelParted,
    ChannelKicked,
    ChannelJoinFailed,
    PacketRequested,
    PacketRemoved,
    /// The allocator had no free range for a requested packet.
    PacketConflict,
    DownloadStarted,
    DownloadCompleted,
    DownloadFailed,
}

/// One record, pointing at the entity concerned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub entity: ObjectId,
    pub time: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, entity: ObjectId) -> Self {
        Notification {
            kind,
            entity,
            time: Utc::now(),
        }
    }
}
