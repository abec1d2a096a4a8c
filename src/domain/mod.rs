//! The domain object tree: Server → Channel → Bot → Packet.
//!
//! Every entity lives in a shared [`Tree`] and is addressed by an
//! [`ObjectId`]. Mutations go through the tree so that each changed field
//! is recorded and published as a [`TreeEvent`] to every subscriber. The
//! tree never calls into its observers; the search index, the UI and the
//! connection managers all learn about changes from their subscription.

mod node;
mod tree;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use self::node::{BotData, BotState, ChannelData, Kind, Node, PacketData, ServerData};
pub use self::tree::{Subscription, SubscriptionId, Tree, TreeView};

/// Process-unique, never reused entity identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// A fresh random id.
    pub fn new() -> Self {
        ObjectId(Uuid::new_v4())
    }

    /// The all-zero id; never assigned to an entity.
    pub const fn nil() -> Self {
        ObjectId(Uuid::nil())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Discriminant of [`Kind`], carried on events so subscribers can route
/// without looking the entity up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// An IRC network.
    Server,
    /// A channel on a server.
    Channel,
    /// A remote XDCC bot.
    Bot,
    /// One file offered by a bot.
    Packet,
}

impl EntityKind {
    /// The kind a parent of this kind must have; `None` for roots.
    pub fn parent_kind(self) -> Option<EntityKind> {
        match self {
            EntityKind::Server => None,
            EntityKind::Channel => Some(EntityKind::Server),
            EntityKind::Bot => Some(EntityKind::Channel),
            EntityKind::Packet => Some(EntityKind::Bot),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Server => "server",
            EntityKind::Channel => "channel",
            EntityKind::Bot => "bot",
            EntityKind::Packet => "packet",
        })
    }
}

/// Names of tracked fields, reported in [`TreeEvent::Changed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Field {
    Name,
    Connected,
    Port,
    Topic,
    UserCount,
    ErrorCode,
    State,
    LastMessage,
    LastContact,
    QueuePosition,
    QueueTime,
    Current,
    PacketId,
    Size,
    RealName,
    RealSize,
    LastUpdated,
    LastMentioned,
}

/// A change published by the [`Tree`].
///
/// `server` is the id of the root Server the entity belongs to, so a
/// per-server subscriber can filter without a lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum TreeEvent {
    /// An entity was attached.
    Added {
        server: ObjectId,
        parent: Option<ObjectId>,
        id: ObjectId,
        kind: EntityKind,
    },
    /// An entity and its descendants were detached and dropped.
    Removed {
        server: ObjectId,
        parent: Option<ObjectId>,
        id: ObjectId,
        kind: EntityKind,
    },
    /// One or more tracked fields changed value.
    Changed {
        server: ObjectId,
        id: ObjectId,
        kind: EntityKind,
        fields: Vec<Field>,
    },
    /// The `enabled` flag flipped.
    EnabledChanged {
        server: ObjectId,
        id: ObjectId,
        kind: EntityKind,
        enabled: bool,
    },
}

impl TreeEvent {
    /// The root server of the entity concerned.
    pub fn server(&self) -> ObjectId {
        match self {
            TreeEvent::Added { server, .. }
            | TreeEvent::Removed { server, .. }
            | TreeEvent::Changed { server, .. }
            | TreeEvent::EnabledChanged { server, .. } => *server,
        }
    }

    /// The entity concerned.
    pub fn id(&self) -> ObjectId {
        match self {
            TreeEvent::Added { id, .. }
            | TreeEvent::Removed { id, .. }
            | TreeEvent::Changed { id, .. }
            | TreeEvent::EnabledChanged { id, .. } => *id,
        }
    }
}
