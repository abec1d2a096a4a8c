use std::collections::HashMap;

use chrono::Utc;
use parking_lot::{RwLock, RwLockReadGuard};
use tokio::sync::mpsc;
use tracing::trace;

use super::{EntityKind, Node, ObjectId, TreeEvent};
use crate::casemap::irc_eq;
use crate::error::TreeError;

/// Handle identifying a subscriber for [`Tree::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a tree subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<TreeEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. `None` once the tree is gone or the
    /// subscription was cancelled.
    pub async fn recv(&mut self) -> Option<TreeEvent> {
        self.rx.recv().await
    }

    /// Next already-published event, if any.
    pub fn try_recv(&mut self) -> Option<TreeEvent> {
        self.rx.try_recv().ok()
    }
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<ObjectId, Node>,
    roots: Vec<ObjectId>,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<TreeEvent>)>,
    next_subscriber: u64,
}

impl Inner {
    fn server_of(&self, mut id: ObjectId) -> Option<ObjectId> {
        loop {
            let node = self.nodes.get(&id)?;
            match node.parent {
                Some(parent) => id = parent,
                None => return Some(id),
            }
        }
    }

    fn publish(&mut self, events: Vec<TreeEvent>) {
        if events.is_empty() {
            return;
        }
        self.subscribers.retain(|(_, tx)| {
            events
                .iter()
                .all(|event| tx.send(event.clone()).is_ok())
        });
    }

    /// Cascade-aware enable flip. Children are disabled before the node
    /// itself, from a snapshot of the child list.
    fn set_enabled(&mut self, id: ObjectId, enabled: bool, server: ObjectId, events: &mut Vec<TreeEvent>) {
        if !enabled {
            let children = match self.nodes.get(&id) {
                Some(node) => node.children.clone(),
                None => return,
            };
            for child in children {
                self.set_enabled(child, false, server, events);
            }
        }

        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if node.enabled == enabled {
            return;
        }
        node.enabled = enabled;
        node.modified = true;
        if enabled {
            node.last_modified = Utc::now();
        }
        events.push(TreeEvent::EnabledChanged {
            server,
            id,
            kind: node.entity_kind(),
            enabled,
        });
    }

    fn drop_subtree(&mut self, id: ObjectId) {
        if let Some(node) = self.nodes.remove(&id) {
            for child in node.children {
                self.drop_subtree(child);
            }
        }
    }
}

/// The shared entity tree.
///
/// A single tree-wide lock is held for the duration of each mutation only.
/// Events are published while the lock is held, so every subscriber sees
/// them in mutation order; sends never block.
#[derive(Default)]
pub struct Tree {
    inner: RwLock<Inner>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Events published from now on are
    /// delivered to it until [`Tree::unsubscribe`] or the receiver drops.
    pub fn subscribe(&self) -> Subscription {
        let mut inner = self.inner.write();
        let id = SubscriptionId(inner.next_subscriber);
        inner.next_subscriber += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push((id, tx));
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.write().subscribers.retain(|(sid, _)| *sid != id);
    }

    /// Attach `child` under `parent` (`None` for servers).
    ///
    /// If an entity with the child's id is already attached there, its
    /// descriptive fields are updated in place instead and its id returned.
    /// A merge never changes `enabled`; use [`Tree::set_enabled`].
    pub fn add_child(&self, parent: Option<ObjectId>, child: Node) -> Result<ObjectId, TreeError> {
        let mut inner = self.inner.write();
        let kind = child.entity_kind();

        let parent_kind = match parent {
            Some(pid) => Some(
                inner
                    .nodes
                    .get(&pid)
                    .ok_or(TreeError::NotFound(pid))?
                    .entity_kind(),
            ),
            None => None,
        };
        if parent_kind != kind.parent_kind() {
            return Err(TreeError::InvalidParent {
                child: kind,
                parent: parent_kind,
            });
        }

        let id = child.id();
        let mut events = Vec::new();

        if let Some(existing) = inner.nodes.get_mut(&id) {
            if existing.parent != parent {
                return Err(TreeError::InvalidParent {
                    child: kind,
                    parent: parent_kind,
                });
            }
            existing.merge_from(&child);
            let fields = std::mem::take(&mut existing.dirty);
            let server = inner.server_of(id).unwrap_or(id);
            if !fields.is_empty() {
                if let Some(existing) = inner.nodes.get_mut(&id) {
                    existing.modified = true;
                }
                events.push(TreeEvent::Changed {
                    server,
                    id,
                    kind,
                    fields,
                });
            }
            inner.publish(events);
            return Ok(id);
        }

        let mut node = child;
        node.parent = parent;
        node.dirty.clear();
        node.modified = true;
        if node.enabled {
            node.last_modified = Utc::now();
        }
        inner.nodes.insert(id, node);
        match parent {
            Some(pid) => {
                if let Some(p) = inner.nodes.get_mut(&pid) {
                    p.children.push(id);
                }
            }
            None => inner.roots.push(id),
        }

        let server = inner.server_of(id).unwrap_or(id);
        trace!(%id, %kind, "entity added");
        events.push(TreeEvent::Added {
            server,
            parent,
            id,
            kind,
        });
        inner.publish(events);
        Ok(id)
    }

    /// Find the channel named `name` under `server`, creating it (disabled)
    /// if absent.
    pub fn ensure_channel(&self, server: ObjectId, name: &str) -> Result<ObjectId, TreeError> {
        if let Some(id) = self.read().find_channel(server, name) {
            return Ok(id);
        }
        self.add_child(Some(server), Node::channel(name))
    }

    /// Find the bot named `name` anywhere on the channel's server, creating
    /// it under `channel` if absent.
    pub fn ensure_bot(&self, channel: ObjectId, name: &str) -> Result<ObjectId, TreeError> {
        let existing = {
            let view = self.read();
            let server = view.server_of(channel).ok_or(TreeError::NotFound(channel))?;
            view.find_bot(server, name)
        };
        match existing {
            Some(id) => Ok(id),
            None => self.add_child(Some(channel), Node::bot(name).enabled(true)),
        }
    }

    /// Disable `id` (cascading), then detach and drop it with its
    /// descendants.
    pub fn remove(&self, id: ObjectId) -> Result<(), TreeError> {
        let mut inner = self.inner.write();
        let server = inner.server_of(id).ok_or(TreeError::NotFound(id))?;
        let mut events = Vec::new();
        inner.set_enabled(id, false, server, &mut events);

        let (parent, kind) = match inner.nodes.get(&id) {
            Some(node) => (node.parent, node.entity_kind()),
            None => return Err(TreeError::NotFound(id)),
        };
        match parent {
            Some(pid) => {
                if let Some(p) = inner.nodes.get_mut(&pid) {
                    p.children.retain(|c| *c != id);
                    p.modified = true;
                }
            }
            None => inner.roots.retain(|r| *r != id),
        }
        inner.drop_subtree(id);

        events.push(TreeEvent::Removed {
            server,
            parent,
            id,
            kind,
        });
        inner.publish(events);
        Ok(())
    }

    /// Flip `enabled`. Disabling cascades to every descendant first;
    /// enabling touches only `id` and stamps its `last_modified`.
    ///
    /// Returns whether the flag of `id` itself changed.
    pub fn set_enabled(&self, id: ObjectId, enabled: bool) -> Result<bool, TreeError> {
        let mut inner = self.inner.write();
        let server = inner.server_of(id).ok_or(TreeError::NotFound(id))?;
        let mut events = Vec::new();
        inner.set_enabled(id, enabled, server, &mut events);
        let changed = events.iter().any(|e| e.id() == id);
        inner.publish(events);
        Ok(changed)
    }

    /// Mutate `id` through its setters. Every field whose value changed is
    /// reported in a single [`TreeEvent::Changed`].
    pub fn modify<R>(&self, id: ObjectId, f: impl FnOnce(&mut Node) -> R) -> Result<R, TreeError> {
        let mut inner = self.inner.write();
        let server = inner.server_of(id).ok_or(TreeError::NotFound(id))?;
        let node = inner.nodes.get_mut(&id).ok_or(TreeError::NotFound(id))?;
        let out = f(node);
        let fields = std::mem::take(&mut node.dirty);
        if !fields.is_empty() {
            node.modified = true;
            let kind = node.entity_kind();
            inner.publish(vec![TreeEvent::Changed {
                server,
                id,
                kind,
                fields,
            }]);
        }
        Ok(out)
    }

    /// Clear every `modified` flag, returning snapshots of the entities
    /// that were dirty.
    pub fn take_modified(&self) -> Vec<Node> {
        let mut inner = self.inner.write();
        inner
            .nodes
            .values_mut()
            .filter(|n| n.modified)
            .map(|n| {
                n.modified = false;
                n.clone()
            })
            .collect()
    }

    /// Read-only view. Do not call mutating methods while holding it.
    pub fn read(&self) -> TreeView<'_> {
        TreeView {
            inner: self.inner.read(),
        }
    }

    /// Snapshot of one entity.
    pub fn get(&self, id: ObjectId) -> Option<Node> {
        self.read().get(id).cloned()
    }

    pub fn find_channel(&self, server: ObjectId, name: &str) -> Option<ObjectId> {
        self.read().find_channel(server, name)
    }

    pub fn find_bot(&self, server: ObjectId, name: &str) -> Option<ObjectId> {
        self.read().find_bot(server, name)
    }

    pub fn oldest_enabled_packet(&self, bot: ObjectId) -> Option<ObjectId> {
        self.read().oldest_enabled_packet(bot)
    }
}

/// Lookups under a shared read lock.
pub struct TreeView<'a> {
    inner: RwLockReadGuard<'a, Inner>,
}

impl TreeView<'_> {
    pub fn get(&self, id: ObjectId) -> Option<&Node> {
        self.inner.nodes.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.inner.nodes.contains_key(&id)
    }

    /// Root servers in insertion order.
    pub fn servers(&self) -> Vec<ObjectId> {
        self.inner.roots.clone()
    }

    /// Children of `id` in insertion order; empty if `id` is unknown.
    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.get(id).map(|n| n.children().to_vec()).unwrap_or_default()
    }

    pub fn server_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.inner.server_of(id)
    }

    pub fn find_channel(&self, server: ObjectId, name: &str) -> Option<ObjectId> {
        self.get(server)?
            .children()
            .iter()
            .copied()
            .find(|c| self.get(*c).is_some_and(|n| irc_eq(n.name(), name)))
    }

    /// Bots are identified by name across all channels of a server.
    pub fn find_bot(&self, server: ObjectId, name: &str) -> Option<ObjectId> {
        self.get(server)?
            .children()
            .iter()
            .flat_map(|c| self.get(*c).map(Node::children).unwrap_or_default())
            .copied()
            .find(|b| self.get(*b).is_some_and(|n| irc_eq(n.name(), name)))
    }

    /// The bot owning a packet.
    pub fn bot_of(&self, packet: ObjectId) -> Option<ObjectId> {
        self.get(packet)?.parent()
    }

    /// Enabled packets of `bot`, oldest enable first. Ties keep child order.
    pub fn enabled_packets(&self, bot: ObjectId) -> Vec<ObjectId> {
        let mut packets: Vec<&Node> = self
            .children(bot)
            .into_iter()
            .filter_map(|p| self.get(p))
            .filter(|n| n.is_enabled())
            .collect();
        packets.sort_by_key(|n| n.last_modified());
        packets.into_iter().map(Node::id).collect()
    }

    pub fn oldest_enabled_packet(&self, bot: ObjectId) -> Option<ObjectId> {
        self.enabled_packets(bot).into_iter().next()
    }

    /// The packet of `bot` with offer number `number`.
    pub fn find_packet(&self, bot: ObjectId, number: u32) -> Option<ObjectId> {
        self.children(bot)
            .into_iter()
            .find(|p| self.get(*p).and_then(Node::as_packet).is_some_and(|d| d.id == number))
    }

    /// Every packet under `id`, including `id` itself.
    pub fn descendant_packets(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.get(next) else { continue };
            if node.entity_kind() == EntityKind::Packet {
                out.push(next);
            }
            stack.extend(node.children().iter().copied());
        }
        out
    }
}
