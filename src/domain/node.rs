use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntityKind, Field, ObjectId};

/// Lifecycle of a bot with respect to our requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BotState {
    /// Nothing requested or in flight.
    #[default]
    Idle,
    /// The bot asked us to come back later (slots full, DCC pending).
    Waiting,
    /// We sit in the bot's queue.
    Queued,
    /// A transfer from this bot is running.
    Active,
}

/// Server specific fields. The node name is the host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerData {
    pub port: u16,
}

/// Channel specific fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData {
    pub topic: String,
    pub user_count: u32,
    /// Numeric reply of the last refused join; 0 once a join succeeds.
    pub error_code: u16,
}

/// Bot specific fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotData {
    pub state: BotState,
    pub last_message: String,
    pub last_contact: DateTime<Utc>,
    pub queue_position: u32,
    /// Seconds the bot estimated until our turn.
    pub queue_time: u32,
    /// The packet we last asked this bot for.
    pub current: Option<ObjectId>,
}

impl Default for BotData {
    fn default() -> Self {
        BotData {
            state: BotState::Idle,
            last_message: String::new(),
            last_contact: DateTime::<Utc>::MIN_UTC,
            queue_position: 0,
            queue_time: 0,
            current: None,
        }
    }
}

/// Packet specific fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketData {
    /// Offer number, scoped to the bot.
    pub id: u32,
    /// Advertised size in bytes (rounded by the bot).
    pub size: u64,
    /// File name from the DCC offer, empty until a transfer begins.
    pub real_name: String,
    /// Exact size from the DCC offer, 0 until a transfer begins.
    pub real_size: u64,
    pub last_updated: DateTime<Utc>,
    pub last_mentioned: DateTime<Utc>,
}

impl PacketData {
    /// Real name if known, else the announced name.
    pub fn file_name<'a>(&'a self, announced: &'a str) -> &'a str {
        if self.real_name.is_empty() {
            announced
        } else {
            &self.real_name
        }
    }

    /// Real size if known, else the advertised size.
    pub fn file_size(&self) -> u64 {
        if self.real_size == 0 {
            self.size
        } else {
            self.real_size
        }
    }
}

/// Kind-specific payload of a [`Node`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    Server(ServerData),
    Channel(ChannelData),
    Bot(BotData),
    Packet(PacketData),
}

impl Kind {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Kind::Server(_) => EntityKind::Server,
            Kind::Channel(_) => EntityKind::Channel,
            Kind::Bot(_) => EntityKind::Bot,
            Kind::Packet(_) => EntityKind::Packet,
        }
    }
}

/// Writes `value` into `slot` and records `field` when the value differs.
fn track<T: PartialEq>(slot: &mut T, value: T, field: Field, dirty: &mut Vec<Field>) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    if !dirty.contains(&field) {
        dirty.push(field);
    }
    true
}

/// One entity of the tree.
///
/// Structural fields (`parent`, `children`, `enabled`) are owned by the
/// [`Tree`](super::Tree); everything else is mutated through the setters
/// below inside [`Tree::modify`](super::Tree::modify), which publishes the
/// recorded field names.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    id: ObjectId,
    pub(super) parent: Option<ObjectId>,
    pub(super) children: Vec<ObjectId>,
    name: String,
    pub(super) enabled: bool,
    connected: bool,
    pub(super) last_modified: DateTime<Utc>,
    pub(super) modified: bool,
    kind: Kind,
    #[serde(skip)]
    pub(super) dirty: Vec<Field>,
}

impl Node {
    fn with_kind(name: &str, kind: Kind) -> Self {
        Node {
            id: ObjectId::new(),
            parent: None,
            children: Vec::new(),
            name: name.to_string(),
            enabled: false,
            connected: false,
            last_modified: DateTime::<Utc>::MIN_UTC,
            modified: false,
            kind,
            dirty: Vec::new(),
        }
    }

    pub fn server(host: &str, port: u16) -> Self {
        Self::with_kind(host, Kind::Server(ServerData { port }))
    }

    pub fn channel(name: &str) -> Self {
        Self::with_kind(name, Kind::Channel(ChannelData::default()))
    }

    pub fn bot(name: &str) -> Self {
        Self::with_kind(name, Kind::Bot(BotData::default()))
    }

    pub fn packet(id: u32, name: &str, size: u64) -> Self {
        let now = Utc::now();
        Self::with_kind(
            name,
            Kind::Packet(PacketData {
                id,
                size,
                real_name: String::new(),
                real_size: 0,
                last_updated: now,
                last_mentioned: now,
            }),
        )
    }

    /// Builder: initial `enabled` flag, applied when the node is attached.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builder: reuse a known id (for merges and restores).
    pub fn with_id(mut self, id: ObjectId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    /// Children in insertion order.
    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Time of the last enable; orders packets oldest first.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Dirty flag for the storage collaborator.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.kind.entity_kind()
    }

    pub fn as_server(&self) -> Option<&ServerData> {
        match &self.kind {
            Kind::Server(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&ChannelData> {
        match &self.kind {
            Kind::Channel(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_bot(&self) -> Option<&BotData> {
        match &self.kind {
            Kind::Bot(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_packet(&self) -> Option<&PacketData> {
        match &self.kind {
            Kind::Packet(p) => Some(p),
            _ => None,
        }
    }

    pub fn set_name(&mut self, name: &str) -> bool {
        if self.name == name {
            return false;
        }
        if let Kind::Packet(p) = &mut self.kind {
            track(&mut p.last_updated, Utc::now(), Field::LastUpdated, &mut self.dirty);
        }
        track(&mut self.name, name.to_string(), Field::Name, &mut self.dirty)
    }

    pub fn set_connected(&mut self, connected: bool) -> bool {
        track(&mut self.connected, connected, Field::Connected, &mut self.dirty)
    }

    pub fn set_port(&mut self, port: u16) -> bool {
        match &mut self.kind {
            Kind::Server(s) => track(&mut s.port, port, Field::Port, &mut self.dirty),
            _ => false,
        }
    }

    pub fn set_topic(&mut self, topic: &str) -> bool {
        match &mut self.kind {
            Kind::Channel(c) => track(&mut c.topic, topic.to_string(), Field::Topic, &mut self.dirty),
            _ => false,
        }
    }

    pub fn set_user_count(&mut self, count: u32) -> bool {
        match &mut self.kind {
            Kind::Channel(c) => track(&mut c.user_count, count, Field::UserCount, &mut self.dirty),
            _ => false,
        }
    }

    pub fn set_error_code(&mut self, code: u16) -> bool {
        match &mut self.kind {
            Kind::Channel(c) => track(&mut c.error_code, code, Field::ErrorCode, &mut self.dirty),
            _ => false,
        }
    }

    pub fn set_state(&mut self, state: BotState) -> bool {
        match &mut self.kind {
            Kind::Bot(b) => track(&mut b.state, state, Field::State, &mut self.dirty),
            _ => false,
        }
    }

    pub fn set_last_message(&mut self, message: &str) -> bool {
        match &mut self.kind {
            Kind::Bot(b) => track(
                &mut b.last_message,
                message.to_string(),
                Field::LastMessage,
                &mut self.dirty,
            ),
            _ => false,
        }
    }

    pub fn set_last_contact(&mut self, when: DateTime<Utc>) -> bool {
        match &mut self.kind {
            Kind::Bot(b) => track(&mut b.last_contact, when, Field::LastContact, &mut self.dirty),
            _ => false,
        }
    }

    pub fn set_queue(&mut self, position: u32, seconds: u32) -> bool {
        match &mut self.kind {
            Kind::Bot(b) => {
                let a = track(&mut b.queue_position, position, Field::QueuePosition, &mut self.dirty);
                let t = track(&mut b.queue_time, seconds, Field::QueueTime, &mut self.dirty);
                a || t
            }
            _ => false,
        }
    }

    pub fn set_current(&mut self, packet: Option<ObjectId>) -> bool {
        match &mut self.kind {
            Kind::Bot(b) => track(&mut b.current, packet, Field::Current, &mut self.dirty),
            _ => false,
        }
    }

    pub fn set_packet_id(&mut self, id: u32) -> bool {
        match &mut self.kind {
            Kind::Packet(p) => track(&mut p.id, id, Field::PacketId, &mut self.dirty),
            _ => false,
        }
    }

    pub fn set_size(&mut self, size: u64) -> bool {
        match &mut self.kind {
            Kind::Packet(p) => track(&mut p.size, size, Field::Size, &mut self.dirty),
            _ => false,
        }
    }

    pub fn set_real_name(&mut self, name: &str) -> bool {
        match &mut self.kind {
            Kind::Packet(p) => track(
                &mut p.real_name,
                name.to_string(),
                Field::RealName,
                &mut self.dirty,
            ),
            _ => false,
        }
    }

    pub fn set_real_size(&mut self, size: u64) -> bool {
        match &mut self.kind {
            Kind::Packet(p) => track(&mut p.real_size, size, Field::RealSize, &mut self.dirty),
            _ => false,
        }
    }

    pub fn set_last_mentioned(&mut self, when: DateTime<Utc>) -> bool {
        match &mut self.kind {
            Kind::Packet(p) => track(&mut p.last_mentioned, when, Field::LastMentioned, &mut self.dirty),
            _ => false,
        }
    }

    /// Copy the descriptive fields of `other` into `self`, recording changes.
    ///
    /// Identity, structure and `enabled` are left alone.
    pub(super) fn merge_from(&mut self, other: &Node) {
        self.set_name(&other.name);
        match &other.kind {
            Kind::Server(s) => {
                self.set_port(s.port);
            }
            Kind::Channel(c) => {
                self.set_topic(&c.topic);
            }
            Kind::Bot(_) => {}
            Kind::Packet(p) => {
                self.set_packet_id(p.id);
                self.set_size(p.size);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_record_changed_fields_once() {
        let mut node = Node::channel("#xdcc");
        assert!(node.set_topic("files"));
        assert!(!node.set_topic("files"));
        assert!(node.set_topic("more files"));
        assert!(!node.set_state(BotState::Active));
        assert_eq!(node.dirty, vec![Field::Topic]);
    }

    #[test]
    fn test_packet_rename_touches_last_updated() {
        let mut node = Node::packet(1, "old.bin", 10);
        let before = node.as_packet().unwrap().last_updated;
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(node.set_name("new.bin"));
        assert!(node.as_packet().unwrap().last_updated > before);
        assert!(node.dirty.contains(&Field::Name));
        assert!(node.dirty.contains(&Field::LastUpdated));
    }

    #[test]
    fn test_file_name_and_size_fallback() {
        let mut node = Node::packet(3, "Announced.mkv", 700);
        let p = node.as_packet().unwrap();
        assert_eq!(p.file_name(node.name()), "Announced.mkv");
        assert_eq!(p.file_size(), 700);

        node.set_real_name("Real.mkv");
        node.set_real_size(734);
        let p = node.as_packet().unwrap();
        assert_eq!(p.file_name(node.name()), "Real.mkv");
        assert_eq!(p.file_size(), 734);
    }
}
