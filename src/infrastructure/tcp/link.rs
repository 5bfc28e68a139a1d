use crate::core::cancellation::CancellationToken;
use crate::domain::config::NetworkSettings;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::domain::frame::{normalize, Frame};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Connection state of the network endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEndpointState {
    Listening,
    ClientConnected,
    ClientDisconnected,
}

impl std::fmt::Display for NetworkEndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkEndpointState::Listening => write!(f, "Listening"),
            NetworkEndpointState::ClientConnected => write!(f, "ClientConnected"),
            NetworkEndpointState::ClientDisconnected => write!(f, "ClientDisconnected"),
        }
    }
}

/// The currently attached client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub addr: SocketAddr,
    pub connected_at: SystemTime,
}

struct ClientReader {
    id: String,
    addr: SocketAddr,
    half: OwnedReadHalf,
    pending: Vec<u8>,
    /// Cancelled when the writer side gives up on this client
    evicted: CancellationToken,
}

impl ClientReader {
    /// Next complete line, or a full buffer's worth if no newline shows up
    fn take_frame(&mut self, max_len: usize) -> Option<Vec<u8>> {
        if let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            return Some(self.pending.drain(..=end).collect());
        }
        if self.pending.len() >= max_len {
            return Some(self.pending.drain(..max_len).collect());
        }
        None
    }
}

struct ClientWriter {
    info: ClientInfo,
    half: OwnedWriteHalf,
    evicted: CancellationToken,
}

impl ClientWriter {
    /// Close the connection and tell the reader side to let go of it
    async fn close(mut self) {
        self.evicted.cancel();
        let _ = self.half.shutdown().await;
    }
}

/// Owns the listening socket and at most one client.
///
/// A newly accepted connection always replaces the current client. The
/// client's read half is used only by the network-to-serial pump; the write
/// half sits behind a lock so a replacement waits for an in-flight send.
/// Every send is bounded by the write timeout: a client that stops reading
/// is dropped instead of holding the lock.
pub struct NetworkLink {
    listener: TcpListener,
    local_addr: SocketAddr,
    accept_timeout: Duration,
    max_frame_len: usize,
    write_timeout: Duration,
    state: RwLock<NetworkEndpointState>,
    reader: Mutex<Option<ClientReader>>,
    writer: Mutex<Option<ClientWriter>>,
    undecodable: AtomicU64,
}

impl NetworkLink {
    /// Bind the listener once. Failure is a configuration problem.
    pub async fn bind(settings: &NetworkSettings) -> BridgeResult<Self> {
        let address = settings.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| BridgeError::Bind {
                address: address.clone(),
                source,
            })?;

        let local_addr = listener.local_addr().map_err(|source| BridgeError::Bind {
            address: address.clone(),
            source,
        })?;

        info!("Bound listener on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            accept_timeout: settings.accept_timeout(),
            max_frame_len: settings.max_frame_len.max(1),
            write_timeout: settings.write_timeout(),
            state: RwLock::new(NetworkEndpointState::Listening),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            undecodable: AtomicU64::new(0),
        })
    }

    /// Keep trying to bind until it works or `token` is cancelled
    pub async fn bind_with_retry(
        settings: &NetworkSettings,
        retry_delay: Duration,
        token: &CancellationToken,
    ) -> BridgeResult<Option<Self>> {
        let mut attempts: u64 = 0;

        loop {
            if token.is_cancelled() {
                return Ok(None);
            }
            attempts += 1;

            match Self::bind(settings).await {
                Ok(link) => return Ok(Some(link)),
                Err(e) => {
                    if attempts == 1 {
                        warn!("{}; retrying", e);
                    } else {
                        debug!("Bind attempt {} failed: {}", attempts, e);
                    }
                }
            }

            if token
                .run_until_cancelled(tokio::time::sleep(retry_delay))
                .await
                .is_none()
            {
                return Ok(None);
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn state(&self) -> NetworkEndpointState {
        *self.state.read().await
    }

    pub async fn has_client(&self) -> bool {
        self.reader.lock().await.is_some()
    }

    pub async fn client_info(&self) -> Option<ClientInfo> {
        self.writer.lock().await.as_ref().map(|w| w.info.clone())
    }

    /// Client input dropped because it was not valid UTF-8
    pub fn undecodable_frames(&self) -> u64 {
        self.undecodable.load(Ordering::Relaxed)
    }

    /// Wait up to the accept timeout for a client and attach it.
    ///
    /// Returns `Ok(false)` on timeout or cancellation, leaving the current
    /// state untouched.
    pub async fn accept_blocking(&self, token: &CancellationToken) -> BridgeResult<bool> {
        let attempt = tokio::time::timeout(self.accept_timeout, self.accept_connection());

        match token.run_until_cancelled(attempt).await {
            None | Some(Err(_)) => Ok(false),
            Some(Ok(accepted)) => {
                let (stream, addr) = accepted?;
                self.attach(stream, addr).await;
                Ok(true)
            }
        }
    }

    /// Wait for the next incoming connection without attaching it
    pub async fn accept_connection(&self) -> BridgeResult<(TcpStream, SocketAddr)> {
        self.listener
            .accept()
            .await
            .map_err(|e| BridgeError::network_link(format!("accept failed: {}", e)))
    }

    /// Make `stream` the current client, closing any previous one
    pub async fn attach(&self, stream: TcpStream, addr: SocketAddr) -> ClientInfo {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        let info = ClientInfo {
            id: uuid::Uuid::new_v4().simple().to_string(),
            addr,
            connected_at: SystemTime::now(),
        };
        let (read_half, write_half) = stream.into_split();
        let evicted = CancellationToken::new();

        // Waits at most one write timeout for an in-flight send.
        let previous = self.writer.lock().await.replace(ClientWriter {
            info: info.clone(),
            half: write_half,
            evicted: evicted.clone(),
        });
        *self.reader.lock().await = Some(ClientReader {
            id: info.id.clone(),
            addr,
            half: read_half,
            pending: Vec::new(),
            evicted,
        });
        self.set_state(NetworkEndpointState::ClientConnected).await;

        match previous {
            Some(old) => {
                info!(
                    "Client {} ({}) replaced by {} ({})",
                    old.info.addr, old.info.id, addr, info.id
                );
                // The old read half was dropped above; this closes the rest.
                old.close().await;
            }
            None => info!("Client connected from {} ({})", addr, info.id),
        }

        info
    }

    /// Receive one frame from the current client.
    ///
    /// `Ok(None)` when no client is attached, the peer closed the
    /// connection, or the client was dropped after a stalled send; the
    /// caller is expected to accept again.
    pub async fn read_frame(&self) -> BridgeResult<Option<Frame>> {
        let mut slot = self.reader.lock().await;
        let Some(client) = slot.as_mut() else {
            return Ok(None);
        };

        let mut chunk = vec![0u8; self.max_frame_len];
        loop {
            if let Some(bytes) = client.take_frame(self.max_frame_len) {
                match normalize(&bytes) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(e) => {
                        self.undecodable.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Dropping undecodable frame from {}: {} ({})",
                            client.addr,
                            hex::encode(&bytes),
                            e
                        );
                        continue;
                    }
                }
            }

            let received = tokio::select! {
                _ = client.evicted.cancelled() => None,
                read = client.half.read(&mut chunk) => Some(read),
            };

            let Some(received) = received else {
                let addr = client.addr;
                let id = client.id.clone();
                *slot = None;
                drop(slot);
                self.set_state(NetworkEndpointState::ClientDisconnected).await;
                info!("Client {} ({}) dropped after a stalled send", addr, id);
                return Ok(None);
            };

            match received {
                Ok(0) => {
                    let id = client.id.clone();
                    let addr = client.addr;
                    let leftover = std::mem::take(&mut client.pending);
                    *slot = None;
                    drop(slot);
                    self.release_writer(&id).await;
                    self.set_state(NetworkEndpointState::ClientDisconnected).await;
                    info!("Client {} ({}) disconnected", addr, id);

                    // An unterminated tail still counts as a frame.
                    if leftover.is_empty() {
                        return Ok(None);
                    }
                    return match normalize(&leftover) {
                        Ok(frame) => Ok(Some(frame)),
                        Err(e) => {
                            self.undecodable.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                "Dropping undecodable tail from {}: {} ({})",
                                addr,
                                hex::encode(&leftover),
                                e
                            );
                            Ok(None)
                        }
                    };
                }
                Ok(n) => {
                    debug!("Received {} bytes from {}", n, client.addr);
                    client.pending.extend_from_slice(&chunk[..n]);
                }
                Err(e) => {
                    let id = client.id.clone();
                    let addr = client.addr;
                    *slot = None;
                    drop(slot);
                    self.release_writer(&id).await;
                    self.set_state(NetworkEndpointState::ClientDisconnected).await;
                    return Err(BridgeError::network_link(format!(
                        "receive from {} failed: {}",
                        addr, e
                    )));
                }
            }
        }
    }

    /// Normalize `raw` and send it to the current client.
    ///
    /// A send that does not finish within the write timeout drops the
    /// client and returns a link error.
    pub async fn write_frame<T: AsRef<[u8]>>(&self, raw: T) -> BridgeResult<Frame> {
        let frame = normalize(raw)?;

        let mut slot = self.writer.lock().await;
        let client = slot.as_mut().ok_or(BridgeError::NoClient)?;
        let addr = client.info.addr;

        let send = async {
            client.half.write_all(frame.as_bytes()).await?;
            client.half.flush().await
        };

        let outcome = tokio::time::timeout(self.write_timeout, send).await;
        let failure = match outcome {
            Ok(Ok(())) => {
                debug!("Sent {} bytes to {}", frame.len(), addr);
                return Ok(frame);
            }
            Ok(Err(e)) => format!("send to {} failed: {}", addr, e),
            Err(_) => format!(
                "send to {} did not finish within {:?}, client is not reading",
                addr, self.write_timeout
            ),
        };

        if let Some(stale) = slot.take() {
            stale.close().await;
        }
        drop(slot);
        self.set_state(NetworkEndpointState::ClientDisconnected).await;
        Err(BridgeError::network_link(failure))
    }

    /// Drop the current client, if any
    pub async fn disconnect(&self) {
        let reader = self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();

        if let Some(writer) = writer {
            let addr = writer.info.addr;
            writer.close().await;
            info!("Connection to client {} closed", addr);
        }
        if reader.is_some() {
            self.set_state(NetworkEndpointState::ClientDisconnected).await;
        }
    }

    async fn release_writer(&self, id: &str) {
        let mut slot = self.writer.lock().await;
        if slot.as_ref().is_some_and(|w| w.info.id == id) {
            *slot = None;
        }
    }

    async fn set_state(&self, next: NetworkEndpointState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!("Network endpoint {} -> {}", *state, next);
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn test_settings() -> NetworkSettings {
        NetworkSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            accept_timeout_ms: 200,
            ..NetworkSettings::default()
        }
    }

    async fn bound_link() -> NetworkLink {
        NetworkLink::bind(&test_settings()).await.unwrap()
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let first = bound_link().await;
        let settings = NetworkSettings {
            port: first.local_addr().port(),
            ..test_settings()
        };

        let err = NetworkLink::bind(&settings).await.err().unwrap();
        assert!(matches!(err, BridgeError::Bind { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_bind_with_retry_gives_up_on_cancel() {
        let first = bound_link().await;
        let settings = NetworkSettings {
            port: first.local_addr().port(),
            ..test_settings()
        };

        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel();
            })
        };

        let result = NetworkLink::bind_with_retry(&settings, Duration::from_millis(10), &token)
            .await
            .unwrap();
        assert!(result.is_none());
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_times_out_without_client() {
        let link = bound_link().await;
        let token = CancellationToken::new();

        assert!(!link.accept_blocking(&token).await.unwrap());
        assert_eq!(link.state().await, NetworkEndpointState::Listening);
        assert!(!link.has_client().await);
    }

    #[tokio::test]
    async fn test_read_and_write_frames() {
        let link = bound_link().await;
        let token = CancellationToken::new();

        let mut client = TcpStream::connect(link.local_addr()).await.unwrap();
        assert!(link.accept_blocking(&token).await.unwrap());
        assert_eq!(link.state().await, NetworkEndpointState::ClientConnected);

        client.write_all(b"{\"b\":1}\r\n{\"b\":2}\n").await.unwrap();
        assert_eq!(link.read_frame().await.unwrap().unwrap().as_str(), "{\"b\":1}\n");
        assert_eq!(link.read_frame().await.unwrap().unwrap().as_str(), "{\"b\":2}\n");

        link.write_frame("{\"t\":1}").await.unwrap();
        let mut reader = BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "{\"t\":1}\n");
    }

    #[tokio::test]
    async fn test_oversized_input_split_at_ceiling() {
        let settings = NetworkSettings {
            max_frame_len: 8,
            ..test_settings()
        };
        let link = NetworkLink::bind(&settings).await.unwrap();
        let token = CancellationToken::new();

        let mut client = TcpStream::connect(link.local_addr()).await.unwrap();
        assert!(link.accept_blocking(&token).await.unwrap());

        client.write_all(b"0123456789\n").await.unwrap();
        assert_eq!(link.read_frame().await.unwrap().unwrap().as_str(), "01234567\n");
        assert_eq!(link.read_frame().await.unwrap().unwrap().as_str(), "89\n");
    }

    #[tokio::test]
    async fn test_peer_close_returns_none() {
        let link = bound_link().await;
        let token = CancellationToken::new();

        let client = TcpStream::connect(link.local_addr()).await.unwrap();
        assert!(link.accept_blocking(&token).await.unwrap());
        drop(client);

        assert!(link.read_frame().await.unwrap().is_none());
        assert_eq!(link.state().await, NetworkEndpointState::ClientDisconnected);
        assert!(!link.has_client().await);
        assert!(matches!(
            link.write_frame("late").await,
            Err(BridgeError::NoClient)
        ));
    }

    #[tokio::test]
    async fn test_write_without_client() {
        let link = bound_link().await;
        let err = link.write_frame("{\"t\":1}").await.unwrap_err();
        assert!(matches!(err, BridgeError::NoClient));
        assert!(link.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_client_replaces_old() {
        let link = bound_link().await;
        let token = CancellationToken::new();

        let mut first = TcpStream::connect(link.local_addr()).await.unwrap();
        assert!(link.accept_blocking(&token).await.unwrap());
        let first_info = link.client_info().await.unwrap();

        let second = TcpStream::connect(link.local_addr()).await.unwrap();
        assert!(link.accept_blocking(&token).await.unwrap());
        let second_info = link.client_info().await.unwrap();
        assert_ne!(first_info.id, second_info.id);
        assert_eq!(second_info.addr, second.local_addr().unwrap());

        link.write_frame("to-second").await.unwrap();
        let mut line = String::new();
        BufReader::new(second).read_line(&mut line).await.unwrap();
        assert_eq!(line, "to-second\n");

        // The replaced client sees end-of-stream.
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(1), first.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_stalled_client_dropped_and_replaceable() {
        let settings = NetworkSettings {
            write_timeout_ms: 100,
            ..test_settings()
        };
        let link = NetworkLink::bind(&settings).await.unwrap();
        let token = CancellationToken::new();

        // Connects and never reads.
        let _stalled = TcpStream::connect(link.local_addr()).await.unwrap();
        assert!(link.accept_blocking(&token).await.unwrap());

        let line = "x".repeat(64 * 1024);
        let started = std::time::Instant::now();
        let err = loop {
            match link.write_frame(line.as_str()).await {
                Ok(_) => assert!(
                    started.elapsed() < Duration::from_secs(10),
                    "socket buffers never filled"
                ),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, BridgeError::Link { .. }));
        assert!(link.client_info().await.is_none());
        assert!(matches!(link.write_frame("late").await, Err(BridgeError::NoClient)));

        // The reader side lets go of the stalled client as well.
        let read = tokio::time::timeout(Duration::from_secs(1), link.read_frame())
            .await
            .unwrap();
        assert!(read.unwrap().is_none());
        assert!(!link.has_client().await);

        let next = TcpStream::connect(link.local_addr()).await.unwrap();
        let attached = tokio::time::timeout(Duration::from_secs(1), link.accept_blocking(&token))
            .await
            .unwrap();
        assert!(attached.unwrap());

        link.write_frame("to-next").await.unwrap();
        let mut received = String::new();
        BufReader::new(next).read_line(&mut received).await.unwrap();
        assert_eq!(received, "to-next\n");
    }

    #[tokio::test]
    async fn test_undecodable_tail_counted() {
        let link = bound_link().await;
        let token = CancellationToken::new();

        let mut client = TcpStream::connect(link.local_addr()).await.unwrap();
        assert!(link.accept_blocking(&token).await.unwrap());

        client.write_all(&[0xff, b'\n', 0xfe, 0xfd]).await.unwrap();
        drop(client);

        assert!(link.read_frame().await.unwrap().is_none());
        assert_eq!(link.undecodable_frames(), 2);
        assert_eq!(link.state().await, NetworkEndpointState::ClientDisconnected);
    }

    #[tokio::test]
    async fn test_disconnect_closes_client() {
        let link = bound_link().await;
        let token = CancellationToken::new();

        let mut client = TcpStream::connect(link.local_addr()).await.unwrap();
        assert!(link.accept_blocking(&token).await.unwrap());

        link.disconnect().await;
        link.disconnect().await;
        assert!(!link.has_client().await);

        let mut buf = [0u8; 4];
        let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
