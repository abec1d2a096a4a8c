//! Peer transfers.
//!
//! A [`DownloadManager`] streams one packet from a bot's DCC socket into a
//! part obtained from the [`ChunkAllocator`]. It never retries; the owner
//! receives a [`DownloadReport`] and decides what happens next.
//! [`Downloads`] is the registry that keeps at most one manager per packet.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::allocator::{ChunkAllocator, PartSink};
use crate::domain::ObjectId;
use crate::error::XdccError;

const READ_BUFFER: usize = 64 * 1024;

/// Everything a transfer needs, resolved by the connection manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadRequest {
    pub server: ObjectId,
    pub bot: ObjectId,
    pub packet: ObjectId,
    /// File name from the DCC offer.
    pub file_name: String,
    /// Total file size from the DCC offer.
    pub size: u64,
    /// Where this part starts.
    pub offset: u64,
    pub addr: SocketAddr,
}

impl DownloadRequest {
    /// Bytes this part is expected to receive.
    pub fn budget(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }
}

/// Transfer progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DownloadState {
    Connecting,
    Streaming,
    Completed,
    Failed,
}

/// How a transfer ended.
#[derive(Debug)]
pub enum Outcome {
    /// The byte budget was satisfied.
    Completed,
    /// Connect, read or write failed, or the peer closed early.
    Failed(XdccError),
    /// Stopped by [`Downloads::stop`] and friends.
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => f.write_str("completed"),
            Outcome::Failed(reason) => write!(f, "failed: {reason}"),
            Outcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Sent to the owner when a manager terminates.
#[derive(Debug)]
pub struct DownloadReport {
    pub request: DownloadRequest,
    pub outcome: Outcome,
    /// Bytes written by this part.
    pub received: u64,
}

/// One in-flight transfer.
pub struct DownloadManager {
    request: DownloadRequest,
    allocator: Arc<dyn ChunkAllocator>,
    cancel: CancellationToken,
    connect_timeout: Duration,
    state: DownloadState,
    received: u64,
}

impl DownloadManager {
    pub fn new(
        request: DownloadRequest,
        allocator: Arc<dyn ChunkAllocator>,
        cancel: CancellationToken,
        connect_timeout: Duration,
    ) -> Self {
        DownloadManager {
            request,
            allocator,
            cancel,
            connect_timeout,
            state: DownloadState::Connecting,
            received: 0,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Run to completion, failure or cancellation.
    pub async fn run(mut self) -> DownloadReport {
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Outcome::Cancelled,
            result = Self::transfer(
                &self.request,
                self.allocator.as_ref(),
                self.connect_timeout,
                &mut self.state,
                &mut self.received,
            ) => match result {
                Ok(()) => Outcome::Completed,
                Err(reason) => Outcome::Failed(reason),
            },
        };

        self.state = match outcome {
            Outcome::Completed => DownloadState::Completed,
            _ => DownloadState::Failed,
        };
        info!(
            packet = %self.request.packet,
            file = %self.request.file_name,
            received = self.received,
            "transfer {}",
            outcome
        );
        DownloadReport {
            request: self.request,
            outcome,
            received: self.received,
        }
    }

    async fn transfer(
        request: &DownloadRequest,
        allocator: &dyn ChunkAllocator,
        connect_timeout: Duration,
        state: &mut DownloadState,
        received: &mut u64,
    ) -> Result<(), XdccError> {
        debug!(addr = %request.addr, offset = request.offset, "connecting to peer");
        let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(request.addr))
            .await
            .map_err(|_| XdccError::ConnectTimeout(request.addr))??;

        let mut part = allocator.open_part(&request.file_name, request.size, request.offset)?;
        *state = DownloadState::Streaming;

        let streamed = Self::stream(request, &mut stream, &mut part, received).await;
        // Keep whatever arrived so a later request can resume from it.
        let flushed = part.flush().await;
        streamed?;
        flushed?;
        part.shutdown().await?;
        Ok(())
    }

    async fn stream(
        request: &DownloadRequest,
        stream: &mut TcpStream,
        part: &mut Box<dyn PartSink>,
        received: &mut u64,
    ) -> Result<(), XdccError> {
        let budget = request.budget();
        let mut buf = vec![0u8; READ_BUFFER];
        while *received < budget {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Err(XdccError::PeerClosed {
                    received: *received,
                    expected: budget,
                });
            }
            let take = n.min(usize::try_from(budget - *received).unwrap_or(usize::MAX));
            part.write_all(&buf[..take]).await?;
            *received += take as u64;

            // DCC acknowledges the low 32 bits of the absolute position.
            let position = (request.offset + *received) as u32;
            if let Err(e) = stream.write_all(&position.to_be_bytes()).await {
                debug!("ack failed: {}", e);
            }
        }
        Ok(())
    }
}

struct Active {
    bot: ObjectId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Registry of running transfers, at most one per packet.
pub struct Downloads {
    allocator: Arc<dyn ChunkAllocator>,
    connect_timeout: Duration,
    active: Mutex<HashMap<ObjectId, Active>>,
    reports: mpsc::UnboundedSender<DownloadReport>,
}

impl Downloads {
    /// Create the registry and the receiver its reports arrive on.
    pub fn new(
        allocator: Arc<dyn ChunkAllocator>,
        connect_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<DownloadReport>) {
        let (reports, rx) = mpsc::unbounded_channel();
        let downloads = Downloads {
            allocator,
            connect_timeout,
            active: Mutex::new(HashMap::new()),
            reports,
        };
        (downloads, rx)
    }

    pub fn allocator(&self) -> &Arc<dyn ChunkAllocator> {
        &self.allocator
    }

    /// Spawn a manager for `request.packet`. A second start for a packet
    /// that is still registered is rejected.
    pub fn start(&self, request: DownloadRequest) -> Result<(), XdccError> {
        let mut active = self.active.lock();
        if active.contains_key(&request.packet) {
            error!(packet = %request.packet, "second transfer for the same packet, should not happen");
            return Err(XdccError::DuplicateTransfer(request.packet));
        }

        let cancel = CancellationToken::new();
        let packet = request.packet;
        let bot = request.bot;
        let manager = DownloadManager::new(
            request,
            self.allocator.clone(),
            cancel.clone(),
            self.connect_timeout,
        );
        let reports = self.reports.clone();
        let handle = tokio::spawn(async move {
            let report = manager.run().await;
            if reports.send(report).is_err() {
                warn!(%packet, "download report dropped, owner is gone");
            }
        });
        active.insert(packet, Active { bot, cancel, handle });
        Ok(())
    }

    pub fn is_active(&self, packet: ObjectId) -> bool {
        self.active.lock().contains_key(&packet)
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal the transfer of `packet` to stop. Its report still arrives.
    pub fn stop(&self, packet: ObjectId) -> bool {
        match self.active.lock().get(&packet) {
            Some(a) => {
                a.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop every transfer from `bot`.
    pub fn stop_bot(&self, bot: ObjectId) {
        for a in self.active.lock().values().filter(|a| a.bot == bot) {
            a.cancel.cancel();
        }
    }

    /// Forget `packet` once its report was handled.
    pub fn finished(&self, packet: ObjectId) {
        self.active.lock().remove(&packet);
    }

    /// Cancel everything and wait for the managers to exit.
    pub async fn stop_all(&self) {
        let drained: Vec<Active> = self.active.lock().drain().map(|(_, a)| a).collect();
        for a in &drained {
            a.cancel.cancel();
        }
        for a in drained {
            if let Err(e) = a.handle.await {
                warn!("download task ended abnormally: {}", e);
            }
        }
    }
}
