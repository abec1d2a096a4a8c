//! Top-level supervisor.
//!
//! The [`Agent`] starts one connection driver per enabled server, follows
//! server enable and removal, stops transfers of packets that get disabled,
//! and settles finished transfers back into the tree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::allocator::ChunkAllocator;
use crate::config::Config;
use crate::connection::{Connection, ConnectionHandle};
use crate::domain::{BotState, EntityKind, ObjectId, Tree, TreeEvent};
use crate::download::{DownloadReport, Downloads, Outcome};
use crate::notification::{Notification, NotificationKind};
use crate::parser::Parser;

const NOTIFICATION_BACKLOG: usize = 256;
const DRIVER_CHECK: Duration = Duration::from_secs(5);

enum Step {
    Report(DownloadReport),
    Tree(TreeEvent),
    Revive,
}

pub struct Agent {
    tree: Arc<Tree>,
    config: Arc<Config>,
    allocator: Arc<dyn ChunkAllocator>,
    parser: Arc<Parser>,
    downloads: Arc<Downloads>,
    reports: mpsc::UnboundedReceiver<DownloadReport>,
    connections: HashMap<ObjectId, ConnectionHandle>,
    stopping: Vec<ConnectionHandle>,
    notifications: broadcast::Sender<Notification>,
}

impl Agent {
    pub fn new(
        tree: Arc<Tree>,
        config: Arc<Config>,
        allocator: Arc<dyn ChunkAllocator>,
        parser: Arc<Parser>,
    ) -> Self {
        let (downloads, reports) = Downloads::new(allocator.clone(), config.timeouts.connect());
        let (notifications, _) = broadcast::channel(NOTIFICATION_BACKLOG);
        Agent {
            tree,
            config,
            allocator,
            parser,
            downloads: Arc::new(downloads),
            reports,
            connections: HashMap::new(),
            stopping: Vec::new(),
            notifications,
        }
    }

    /// Subscribe to audit records. Slow receivers lose the oldest ones.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn downloads(&self) -> &Arc<Downloads> {
        &self.downloads
    }

    /// Run until `shutdown` fires, then quit every server and stop every
    /// transfer.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut subscription = self.tree.subscribe();

        let servers = self.tree.read().servers();
        for server in servers {
            if self.tree.get(server).is_some_and(|n| n.is_enabled()) {
                self.start_server(server);
            }
        }

        let mut watchdog = tokio::time::interval(DRIVER_CHECK);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(report) = self.reports.recv() => Step::Report(report),
                event = subscription.recv() => match event {
                    Some(event) => Step::Tree(event),
                    None => break,
                },
                _ = watchdog.tick() => Step::Revive,
            };
            match step {
                Step::Report(report) => self.on_report(report).await,
                Step::Tree(event) => self.on_tree_event(event),
                Step::Revive => self.revive(),
            }
        }

        info!("shutting down");
        self.tree.unsubscribe(subscription.id());
        for (_, handle) in self.connections.drain() {
            handle.shutdown().await;
        }
        for handle in self.stopping.drain(..) {
            handle.shutdown().await;
        }
        self.downloads.stop_all().await;
    }

    fn start_server(&mut self, server: ObjectId) {
        if let Some(handle) = self.connections.get(&server) {
            if !handle.is_finished() {
                return;
            }
            error!(%server, "connection driver exited unexpectedly, restarting");
            self.connections.remove(&server);
        }
        let connection = Connection::new(
            server,
            self.tree.clone(),
            self.config.clone(),
            self.allocator.clone(),
            self.parser.clone(),
        );
        let handle = ConnectionHandle::spawn(connection, self.downloads.clone(), self.notifications.clone());
        self.connections.insert(server, handle);
    }

    fn stop_server(&mut self, server: ObjectId) {
        if let Some(handle) = self.connections.remove(&server) {
            info!(%server, "stopping server");
            handle.stop();
            self.stopping.push(handle);
        }
    }

    /// Restart drivers of enabled servers that died, and forget stopped ones.
    fn revive(&mut self) {
        self.stopping.retain(|h| !h.is_finished());
        let dead: Vec<ObjectId> = self
            .connections
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for server in dead {
            if self.tree.get(server).is_some_and(|n| n.is_enabled()) {
                self.start_server(server);
            } else {
                error!(%server, "connection driver exited unexpectedly");
                self.connections.remove(&server);
            }
        }
    }

    fn on_tree_event(&mut self, event: TreeEvent) {
        match event {
            TreeEvent::Added {
                id,
                kind: EntityKind::Server,
                ..
            } => {
                if self.tree.get(id).is_some_and(|n| n.is_enabled()) {
                    self.start_server(id);
                }
            }
            TreeEvent::EnabledChanged {
                id,
                kind: EntityKind::Server,
                enabled,
                ..
            } => {
                if enabled {
                    self.start_server(id);
                } else {
                    self.stop_server(id);
                }
            }
            TreeEvent::EnabledChanged {
                id,
                kind: EntityKind::Packet,
                enabled: false,
                ..
            } => {
                if self.downloads.stop(id) {
                    info!(packet = %id, "packet disabled, stopping transfer");
                }
            }
            TreeEvent::Removed { id, kind, .. } => match kind {
                EntityKind::Server => self.stop_server(id),
                EntityKind::Bot => self.downloads.stop_bot(id),
                EntityKind::Packet => {
                    self.downloads.stop(id);
                }
                EntityKind::Channel => {}
            },
            _ => {}
        }
    }

    fn notify(&self, kind: NotificationKind, entity: ObjectId) {
        let _ = self.notifications.send(Notification::new(kind, entity));
    }

    /// Settle a finished transfer: free the bot, finalize the file, and
    /// disable the packet once the file is complete.
    async fn on_report(&mut self, report: DownloadReport) {
        let DownloadReport {
            request, outcome, ..
        } = report;
        self.downloads.finished(request.packet);

        // The bot is freed first so disabling the packet does not unrequest.
        let freed = self.tree.modify(request.bot, |n| {
            n.set_current(None);
            n.set_state(BotState::Idle);
        });
        if let Err(e) = freed {
            warn!("bot of finished transfer is gone: {}", e);
        }
        if let Err(e) = self.tree.modify(request.packet, |n| {
            n.set_connected(false);
        }) {
            warn!("packet of finished transfer is gone: {}", e);
        }

        match outcome {
            Outcome::Completed => {
                // Finalizing may rename across file systems.
                let allocator = self.allocator.clone();
                let (file_name, size) = (request.file_name.clone(), request.size);
                let checked = tokio::task::spawn_blocking(move || {
                    allocator.check_completed_file(&file_name, size)
                })
                .await
                .unwrap_or_else(|e| Err(std::io::Error::other(e)));
                match checked {
                    Ok(true) => {
                        info!(file = %request.file_name, "download complete");
                        if let Err(e) = self.tree.set_enabled(request.packet, false) {
                            warn!("cannot disable finished packet: {}", e);
                        }
                        self.notify(NotificationKind::DownloadCompleted, request.packet);
                    }
                    Ok(false) => {
                        info!(file = %request.file_name, "part finished, file still incomplete")
                    }
                    Err(e) => {
                        error!(file = %request.file_name, "cannot finalize file: {}", e);
                        self.notify(NotificationKind::DownloadFailed, request.packet);
                    }
                }
            }
            Outcome::Failed(reason) => {
                warn!(file = %request.file_name, "download failed: {}", reason);
                self.notify(NotificationKind::DownloadFailed, request.packet);
            }
            Outcome::Cancelled => {}
        }

        if let Some(handle) = self.connections.get(&request.server) {
            handle.requeue_bot(request.bot, self.config.timeouts.command_wait());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::DiskAllocator;
    use crate::domain::Node;

    async fn wait_finished(agent: &Agent, server: ObjectId) {
        while !agent.connections[&server].is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_dead_driver_is_restarted_while_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Arc::new(Tree::new());
        // Nothing listens there, so a live driver sits in its reconnect wait.
        let server = tree
            .add_child(None, Node::server("127.0.0.1", 1).enabled(true))
            .unwrap();
        let allocator = DiskAllocator::new(dir.path().join("temp"), dir.path().join("ready"));
        let mut agent = Agent::new(
            tree.clone(),
            Arc::new(Config::default()),
            Arc::new(allocator),
            Arc::new(Parser::default()),
        );

        agent.start_server(server);
        agent.connections[&server].abort();
        wait_finished(&agent, server).await;

        agent.revive();
        assert!(!agent.connections[&server].is_finished());

        agent.connections[&server].abort();
        wait_finished(&agent, server).await;
        tree.set_enabled(server, false).unwrap();
        agent.revive();
        assert!(!agent.connections.contains_key(&server));
    }
}
