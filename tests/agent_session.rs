//! Whole-agent runs against a loopback IRC server and DCC sender.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use slirc_xdcc::{
    Agent, Config, DiskAllocator, Node, NotificationKind, ObjectId, Parser, Tree,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const LOOPBACK: u32 = 0x7f00_0001;
const PATIENCE: Duration = Duration::from_secs(10);

/// The server side of one client session.
struct FakeIrc {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeIrc {
    async fn accept(listener: &TcpListener) -> Self {
        let (socket, _) = timeout(PATIENCE, listener.accept()).await.unwrap().unwrap();
        let (read, writer) = socket.into_split();
        FakeIrc {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    /// Read until a line starting with `prefix` arrives.
    async fn expect(&mut self, prefix: &str) -> String {
        loop {
            let line = timeout(PATIENCE, self.lines.next_line())
                .await
                .unwrap_or_else(|_| panic!("no {prefix:?} line"))
                .unwrap()
                .unwrap_or_else(|| panic!("client hung up before {prefix:?}"));
            if line.starts_with(prefix) {
                return line;
            }
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
    }

    /// Register the client, let it join `#xdcc`, and have `Bot` join too.
    async fn welcome(&mut self) {
        self.expect("USER ").await;
        self.send(":irc.test 001 slirc-xdcc :Welcome").await;
        self.expect("JOIN #xdcc").await;
        self.send(":slirc-xdcc!xdcc@client JOIN #xdcc").await;
        self.send(":Bot!bot@host JOIN #xdcc").await;
    }
}

struct Setup {
    _dir: tempfile::TempDir,
    ready: std::path::PathBuf,
    tree: Arc<Tree>,
    server: ObjectId,
    packet: ObjectId,
    agent: Agent,
    listener: TcpListener,
}

async fn setup(size: u64) -> Setup {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let tree = Arc::new(Tree::new());
    let server = tree
        .add_child(None, Node::server("127.0.0.1", port).enabled(true))
        .unwrap();
    let channel = tree
        .add_child(Some(server), Node::channel("#xdcc").enabled(true))
        .unwrap();
    let bot = tree
        .add_child(Some(channel), Node::bot("Bot").enabled(true))
        .unwrap();
    let packet = tree
        .add_child(Some(bot), Node::packet(1, "file.bin", size).enabled(true))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("ready");
    let allocator = Arc::new(DiskAllocator::new(dir.path().join("temp"), ready.clone()));
    let agent = Agent::new(
        tree.clone(),
        Arc::new(Config::default()),
        allocator,
        Arc::new(Parser::default()),
    );
    Setup {
        _dir: dir,
        ready,
        tree,
        server,
        packet,
        agent,
        listener,
    }
}

async fn wait_for(
    notifications: &mut broadcast::Receiver<slirc_xdcc::Notification>,
    kind: NotificationKind,
) -> ObjectId {
    timeout(PATIENCE, async {
        loop {
            let n = notifications.recv().await.unwrap();
            if n.kind == kind {
                return n.entity;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind:?} notification"))
}

fn dcc_send(file: &str, addr: SocketAddr, size: u64) -> String {
    format!(
        ":Bot!bot@host PRIVMSG slirc-xdcc :\x01DCC SEND {file} {LOOPBACK} {} {size}\x01",
        addr.port()
    )
}

#[tokio::test]
async fn test_enabled_packet_is_requested_and_downloaded() {
    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
    let s = setup(data.len() as u64).await;
    let mut notifications = s.agent.notifications();
    let shutdown = CancellationToken::new();
    let agent = tokio::spawn(s.agent.run(shutdown.clone()));

    let mut irc = FakeIrc::accept(&s.listener).await;
    irc.welcome().await;
    irc.expect("PRIVMSG Bot :XDCC SEND 1").await;

    let dcc = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dcc_addr = dcc.local_addr().unwrap();
    let payload = data.clone();
    let sender = tokio::spawn(async move {
        let (mut socket, _) = dcc.accept().await.unwrap();
        socket.write_all(&payload).await.unwrap();
        let mut acks = Vec::new();
        let _ = socket.read_to_end(&mut acks).await;
        acks
    });
    irc.send(&dcc_send("file.bin", dcc_addr, data.len() as u64)).await;

    assert_eq!(
        wait_for(&mut notifications, NotificationKind::DownloadCompleted).await,
        s.packet
    );
    let acks = sender.await.unwrap();
    assert_eq!(&acks[acks.len() - 4..], &(data.len() as u32).to_be_bytes());

    assert_eq!(std::fs::read(s.ready.join("file.bin")).unwrap(), data);
    assert!(!s.tree.get(s.packet).unwrap().is_enabled());

    shutdown.cancel();
    irc.expect("QUIT").await;
    timeout(PATIENCE, agent).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disabling_the_server_stops_the_transfer() {
    let s = setup(1_000_000).await;
    let downloads = s.agent.downloads().clone();
    let mut notifications = s.agent.notifications();
    let shutdown = CancellationToken::new();
    let agent = tokio::spawn(s.agent.run(shutdown.clone()));

    let mut irc = FakeIrc::accept(&s.listener).await;
    irc.welcome().await;
    irc.expect("PRIVMSG Bot :XDCC SEND 1").await;

    // A sender that stalls after the first few bytes.
    let dcc = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dcc_addr = dcc.local_addr().unwrap();
    let _sender = tokio::spawn(async move {
        let (mut socket, _) = dcc.accept().await.unwrap();
        socket.write_all(&[0u8; 100]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });
    irc.send(&dcc_send("file.bin", dcc_addr, 1_000_000)).await;

    wait_for(&mut notifications, NotificationKind::DownloadStarted).await;
    assert!(downloads.is_active(s.packet));

    s.tree.set_enabled(s.server, false).unwrap();
    irc.expect("QUIT").await;

    timeout(PATIENCE, async {
        while downloads.is_active(s.packet) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("transfer still registered");
    assert!(!s.tree.get(s.packet).unwrap().is_enabled());
    assert!(!s.ready.join("file.bin").exists());

    shutdown.cancel();
    timeout(PATIENCE, agent).await.unwrap().unwrap();
}
