//! Async driver for one server.
//!
//! Owns the transport and feeds the [`Connection`] from four sources: the
//! socket, tree events, control commands and a periodic tick. Actions are
//! executed after every step. Between sessions it waits out the reconnect
//! delay picked by [`policy::reconnect_wait`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{Action, Connection};
use crate::command::Command;
use crate::domain::{ObjectId, Subscription};
use crate::download::Downloads;
use crate::error::XdccError;
use crate::message::Message;
use crate::notification::{Notification, NotificationKind};
use crate::policy;
use crate::transport::{Transport, TransportReadError};

/// Requests from the agent to a running driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    /// Schedule a request for `bot` after `wait`.
    RequeueBot { bot: ObjectId, wait: Duration },
    /// Quit and stop reconnecting.
    Shutdown,
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Asked to stop.
    Shutdown,
    /// Lost the server; `None` when it closed cleanly.
    Closed(Option<io::Error>),
}

enum Step {
    Read(Result<Option<Message>, TransportReadError>),
    Tree(Option<crate::domain::TreeEvent>),
    Control(Option<ControlCommand>),
    Tick,
}

/// A spawned driver.
pub struct ConnectionHandle {
    server: ObjectId,
    commands: mpsc::UnboundedSender<ControlCommand>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Spawn the driver for `connection.server()`.
    pub fn spawn(
        connection: Connection,
        downloads: Arc<Downloads>,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        let server = connection.server();
        let (commands, rx) = mpsc::unbounded_channel();
        let subscription = connection.tree().subscribe();
        let task = tokio::spawn(supervise(connection, subscription, rx, downloads, notifications));
        ConnectionHandle {
            server,
            commands,
            task,
        }
    }

    pub fn server(&self) -> ObjectId {
        self.server
    }

    /// Whether the driver task has exited, for whatever reason.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    #[cfg(test)]
    pub(crate) fn abort(&self) {
        self.task.abort();
    }

    /// Forward a bot requeue. Ignored once the driver has exited.
    pub fn requeue_bot(&self, bot: ObjectId, wait: Duration) {
        if self.commands.send(ControlCommand::RequeueBot { bot, wait }).is_err() {
            debug!(server = %self.server, "driver gone, requeue dropped");
        }
    }

    /// Ask the driver to quit without waiting for it.
    pub fn stop(&self) {
        let _ = self.commands.send(ControlCommand::Shutdown);
    }

    /// Ask the driver to quit and wait until it has.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!(server = %self.server, "driver ended abnormally: {}", e);
        }
    }
}

/// Sessions and reconnect delays until shut down.
async fn supervise(
    mut connection: Connection,
    mut subscription: Subscription,
    mut commands: mpsc::UnboundedReceiver<ControlCommand>,
    downloads: Arc<Downloads>,
    notifications: broadcast::Sender<Notification>,
) {
    let server = connection.server();
    loop {
        let end = run_session(
            &mut connection,
            &mut subscription,
            &mut commands,
            &downloads,
            &notifications,
        )
        .await;
        connection.disconnected();
        offline(&mut connection, &notifications);

        let error = match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Closed(error) => error,
        };
        let wait = policy::reconnect_wait(error.as_ref(), &connection.config().timeouts);
        match &error {
            Some(e) => warn!(%server, ?wait, "connection lost: {}", e),
            None => warn!(%server, ?wait, "server closed the connection"),
        }

        let sleep = tokio::time::sleep(wait);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                event = subscription.recv() => match event {
                    Some(event) => connection.on_tree_event(&event, Instant::now()),
                    None => {
                        connection.tree().unsubscribe(subscription.id());
                        return;
                    }
                },
                command = commands.recv() => match command {
                    Some(ControlCommand::RequeueBot { bot, wait }) => {
                        connection.requeue_bot(bot, wait, Instant::now())
                    }
                    Some(ControlCommand::Shutdown) | None => {
                        connection.tree().unsubscribe(subscription.id());
                        return;
                    }
                },
            }
            offline(&mut connection, &notifications);
        }
    }
    connection.tree().unsubscribe(subscription.id());
    info!(%server, "driver stopped");
}

/// Drain actions while no session is up. Only notifications survive.
fn offline(connection: &mut Connection, notifications: &broadcast::Sender<Notification>) {
    for action in connection.drain() {
        match action {
            Action::Notify(n) => {
                let _ = notifications.send(n);
            }
            Action::Send(message) => debug!("not connected, dropping {:?}", message.command),
            Action::StartDownload(request) => {
                warn!(file = %request.file_name, "not connected, dropping download")
            }
        }
    }
}

async fn resolve(connection: &Connection) -> io::Result<SocketAddr> {
    let node = connection
        .tree()
        .get(connection.server())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "server removed"))?;
    let port = node.as_server().map(|s| s.port).unwrap_or(6667);
    let addr = lookup(node.name(), port).await?;
    Ok(addr)
}

/// First address `host` resolves to.
async fn lookup(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port)).await?;
    let addr = addrs.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}:{port}"))
    })?;
    Ok(addr)
}

async fn connect(connection: &Connection) -> io::Result<Transport> {
    let addr = resolve(connection).await?;
    info!(server = %connection.server(), %addr, "connecting");
    match Transport::connect(addr, connection.config().timeouts.connect()).await {
        Ok(transport) => Ok(transport),
        Err(XdccError::ConnectTimeout(addr)) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {addr} timed out"),
        )),
        Err(XdccError::Io(e)) => Err(e),
        Err(other) => Err(io::Error::other(other.to_string())),
    }
}

/// Execute queued actions. Returns the write error that ends the session.
async fn execute(
    connection: &mut Connection,
    transport: &mut Transport,
    downloads: &Downloads,
    notifications: &broadcast::Sender<Notification>,
) -> Result<(), io::Error> {
    for action in connection.drain() {
        match action {
            Action::Send(message) => {
                debug!(">> {}", message);
                transport
                    .write_message(message)
                    .await
                    .map_err(|e| io::Error::other(e.to_string()))?;
            }
            Action::StartDownload(request) => {
                if let Err(e) = downloads.start(request) {
                    error!("cannot start download: {}", e);
                }
            }
            Action::Notify(n) => {
                let _ = notifications.send(n);
            }
        }
    }
    Ok(())
}

/// Run one session: connect, register, then pump events until it ends.
pub async fn run_session(
    connection: &mut Connection,
    subscription: &mut Subscription,
    commands: &mut mpsc::UnboundedReceiver<ControlCommand>,
    downloads: &Downloads,
    notifications: &broadcast::Sender<Notification>,
) -> SessionEnd {
    let server = connection.server();
    let mut transport = match connect(connection).await {
        Ok(transport) => transport,
        Err(e) => {
            let _ = notifications.send(Notification::new(NotificationKind::ServerConnectFailed, server));
            return SessionEnd::Closed(Some(e));
        }
    };

    connection.start();
    if let Err(e) = execute(connection, &mut transport, downloads, notifications).await {
        return SessionEnd::Closed(Some(e));
    }

    let mut ticker = tokio::time::interval(connection.config().timeouts.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let step = tokio::select! {
            read = transport.read_message() => Step::Read(read),
            event = subscription.recv() => Step::Tree(event),
            command = commands.recv() => Step::Control(command),
            _ = ticker.tick() => Step::Tick,
        };

        let now = Instant::now();
        match step {
            Step::Read(Ok(Some(message))) => {
                debug!("<< {}", message);
                connection.handle_message(&message, now);
            }
            Step::Read(Ok(None)) => return SessionEnd::Closed(None),
            Step::Read(Err(TransportReadError::Io(e))) => return SessionEnd::Closed(Some(e)),
            Step::Read(Err(TransportReadError::Protocol(e))) => warn!(%server, "protocol error: {}", e),
            Step::Tree(Some(event)) => connection.on_tree_event(&event, now),
            Step::Tree(None) | Step::Control(Some(ControlCommand::Shutdown)) | Step::Control(None) => {
                let _ = transport
                    .write_message(Message::new(Command::QUIT(None)))
                    .await;
                return SessionEnd::Shutdown;
            }
            Step::Control(Some(ControlCommand::RequeueBot { bot, wait })) => {
                connection.requeue_bot(bot, wait, now)
            }
            Step::Tick => connection.tick(now),
        }

        if let Err(e) = execute(connection, &mut transport, downloads, notifications).await {
            return SessionEnd::Closed(Some(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_literal_address() {
        let addr = lookup("127.0.0.1", 6697).await.unwrap();
        assert_eq!(addr, "127.0.0.1:6697".parse::<SocketAddr>().unwrap());
    }
}
