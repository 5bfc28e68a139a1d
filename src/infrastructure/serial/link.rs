use crate::core::cancellation::CancellationToken;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::domain::frame::{normalize, Frame, DEFAULT_MAX_FRAME_LEN};
use crate::infrastructure::serial::device::{LineReader, SerialDevice, SerialOpener};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Connection state of the serial endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerialEndpointState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for SerialEndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerialEndpointState::Disconnected => write!(f, "Disconnected"),
            SerialEndpointState::Connecting => write!(f, "Connecting"),
            SerialEndpointState::Connected => write!(f, "Connected"),
        }
    }
}

/// Owns the connection to the serial device.
///
/// Reads and the reconnect procedure belong to the serial-to-network pump;
/// the other pump only calls [`SerialLink::write_frame`].
pub struct SerialLink {
    opener: Arc<dyn SerialOpener>,
    read_timeout: Duration,
    reconnect_delay: Duration,
    max_frame_len: usize,
    state: RwLock<SerialEndpointState>,
    reader: Mutex<Option<LineReader>>,
    writer: Mutex<Option<Box<dyn SerialDevice>>>,
    undecodable: AtomicU64,
}

impl SerialLink {
    pub fn new(opener: Arc<dyn SerialOpener>, read_timeout: Duration, reconnect_delay: Duration) -> Self {
        Self {
            opener,
            read_timeout,
            reconnect_delay,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            state: RwLock::new(SerialEndpointState::Disconnected),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            undecodable: AtomicU64::new(0),
        }
    }

    /// Cut device lines that run longer than `max_frame_len` bytes
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Lines dropped because they were not valid UTF-8
    pub fn undecodable_frames(&self) -> u64 {
        self.undecodable.load(Ordering::Relaxed)
    }

    pub async fn state(&self) -> SerialEndpointState {
        *self.state.read().await
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == SerialEndpointState::Connected
    }

    /// Open the device, retrying until it succeeds or `token` is cancelled.
    ///
    /// Returns `Ok(false)` when cancelled before the device could be opened.
    /// Only configuration errors are returned as `Err`.
    pub async fn open(&self, token: &CancellationToken) -> BridgeResult<bool> {
        if self.is_open().await {
            return Ok(true);
        }

        let target = self.opener.describe();
        let mut attempts: u64 = 0;

        loop {
            if token.is_cancelled() {
                self.set_state(SerialEndpointState::Disconnected).await;
                return Ok(false);
            }

            self.set_state(SerialEndpointState::Connecting).await;
            attempts += 1;

            let opener = Arc::clone(&self.opener);
            let opened = tokio::task::spawn_blocking(move || opener.open())
                .await
                .map_err(|e| BridgeError::serial_link(format!("open task failed: {}", e)))?;

            let failure = match opened {
                Ok(device) => match device.try_clone_device() {
                    Ok(writer) => {
                        *self.reader.lock().await = Some(LineReader::new(device, self.max_frame_len));
                        *self.writer.lock().await = Some(writer);
                        self.set_state(SerialEndpointState::Connected).await;
                        info!("Serial device {} opened after {} attempt(s)", target, attempts);
                        return Ok(true);
                    }
                    Err(e) => BridgeError::serial_link(format!("cannot clone device handle: {}", e)),
                },
                Err(e) if e.is_fatal() => {
                    self.set_state(SerialEndpointState::Disconnected).await;
                    return Err(e);
                }
                Err(e) => e,
            };

            if attempts == 1 {
                warn!("Failed to open serial device {}: {}; retrying", target, failure);
            } else {
                debug!("Serial open attempt {} for {} failed: {}", attempts, target, failure);
            }

            let slept = token
                .run_until_cancelled(tokio::time::sleep(self.reconnect_delay))
                .await;
            if slept.is_none() {
                self.set_state(SerialEndpointState::Disconnected).await;
                return Ok(false);
            }
        }
    }

    /// Read one frame, waiting at most the configured read timeout.
    ///
    /// `Ok(None)` on timeout or when the received bytes were not valid text.
    pub async fn read_frame(&self) -> BridgeResult<Option<Frame>> {
        let mut slot = self.reader.lock().await;
        let mut reader = slot
            .take()
            .ok_or_else(|| BridgeError::serial_link("serial port is not open"))?;

        let timeout = self.read_timeout;
        let (reader, result) = tokio::task::spawn_blocking(move || {
            let result = reader.read_line(timeout);
            (reader, result)
        })
        .await
        .map_err(|e| BridgeError::serial_link(format!("read task failed: {}", e)))?;

        match result {
            Ok(Some(bytes)) => {
                *slot = Some(reader);
                match normalize(&bytes) {
                    Ok(frame) => Ok(Some(frame)),
                    Err(e) => {
                        self.undecodable.fetch_add(1, Ordering::Relaxed);
                        warn!("Dropping undecodable serial frame {}: {}", hex::encode(&bytes), e);
                        Ok(None)
                    }
                }
            }
            Ok(None) => {
                *slot = Some(reader);
                Ok(None)
            }
            Err(e) => {
                drop(slot);
                self.set_state(SerialEndpointState::Disconnected).await;
                Err(BridgeError::serial_link(format!("read failed: {}", e)))
            }
        }
    }

    /// Normalize `raw` and write it to the device.
    ///
    /// The write runs on a blocking thread; flow control can hold it for up
    /// to the port timeout.
    pub async fn write_frame<T: AsRef<[u8]>>(&self, raw: T) -> BridgeResult<Frame> {
        let frame = normalize(raw)?;

        let mut slot = self.writer.lock().await;
        let mut device = slot
            .take()
            .ok_or_else(|| BridgeError::serial_link("serial port is not open"))?;

        let bytes = frame.as_bytes().to_vec();
        let (device, written) = tokio::task::spawn_blocking(move || {
            let written = device.write_all(&bytes).and_then(|_| device.flush());
            (device, written)
        })
        .await
        .map_err(|e| BridgeError::serial_link(format!("write task failed: {}", e)))?;

        if let Err(e) = written {
            drop(slot);
            self.set_state(SerialEndpointState::Disconnected).await;
            return Err(BridgeError::serial_link(format!("write failed: {}", e)));
        }

        *slot = Some(device);
        debug!("Wrote {} bytes to serial device", frame.len());
        Ok(frame)
    }

    /// Release the device. Safe to call repeatedly.
    pub async fn close(&self) {
        let reader = self.reader.lock().await.take();
        let writer = self.writer.lock().await.take();
        self.set_state(SerialEndpointState::Disconnected).await;

        if reader.is_some() || writer.is_some() {
            info!("Serial device {} closed", self.opener.describe());
        }
    }

    async fn set_state(&self, next: SerialEndpointState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!("Serial endpoint {} -> {}", *state, next);
            *state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::serial::fake::{FakeRead, FakeSerial};

    fn link_for(fake: &FakeSerial) -> SerialLink {
        SerialLink::new(
            Arc::new(fake.clone()),
            Duration::from_millis(100),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_open_retries_until_device_appears() {
        let fake = FakeSerial::new();
        fake.fail_next_opens(3);
        let link = link_for(&fake);

        let token = CancellationToken::new();
        assert!(link.open(&token).await.unwrap());
        assert_eq!(link.state().await, SerialEndpointState::Connected);
        assert_eq!(fake.open_count(), 1);

        // Already open: no second device handle.
        assert!(link.open(&token).await.unwrap());
        assert_eq!(fake.open_count(), 1);
    }

    #[tokio::test]
    async fn test_open_stops_when_cancelled() {
        let fake = FakeSerial::new();
        fake.fail_next_opens(usize::MAX);
        let link = link_for(&fake);

        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel();
            })
        };

        assert!(!link.open(&token).await.unwrap());
        assert_eq!(link.state().await, SerialEndpointState::Disconnected);
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame_normalizes() {
        let fake = FakeSerial::new();
        fake.push_line("{\"t\":1}\r\n");
        let link = link_for(&fake);
        link.open(&CancellationToken::new()).await.unwrap();

        let frame = link.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.as_str(), "{\"t\":1}\n");

        // Nothing else scripted: times out quietly.
        assert!(link.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_input_is_dropped() {
        let fake = FakeSerial::new();
        fake.push_read(FakeRead::Data(vec![0xff, 0xfe, b'\n']));
        fake.push_line("ok\n");
        let link = link_for(&fake);
        link.open(&CancellationToken::new()).await.unwrap();

        assert!(link.read_frame().await.unwrap().is_none());
        assert_eq!(link.undecodable_frames(), 1);
        assert_eq!(link.read_frame().await.unwrap().unwrap().as_str(), "ok\n");
    }

    #[tokio::test]
    async fn test_device_failure_disconnects() {
        let fake = FakeSerial::new();
        fake.push_read(FakeRead::Fail(std::io::ErrorKind::BrokenPipe));
        let link = link_for(&fake);
        link.open(&CancellationToken::new()).await.unwrap();

        let err = link.read_frame().await.unwrap_err();
        assert!(matches!(err, BridgeError::Link { .. }));
        assert_eq!(link.state().await, SerialEndpointState::Disconnected);

        link.close().await;
        assert!(link.open(&CancellationToken::new()).await.unwrap());
        assert_eq!(fake.open_count(), 2);
    }

    #[tokio::test]
    async fn test_write_requires_open_link() {
        let fake = FakeSerial::new();
        let link = link_for(&fake);

        let err = link.write_frame("{\"b\":2}").await.unwrap_err();
        assert!(matches!(err, BridgeError::Link { .. }));

        link.open(&CancellationToken::new()).await.unwrap();
        link.write_frame("{\"b\":2}\r\nrest").await.unwrap();
        assert_eq!(fake.writes(), vec![b"{\"b\":2}\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_long_device_line_split() {
        let fake = FakeSerial::new();
        fake.push_line("0123456789\n");
        let link = link_for(&fake).with_max_frame_len(6);
        link.open(&CancellationToken::new()).await.unwrap();

        assert_eq!(link.read_frame().await.unwrap().unwrap().as_str(), "012345\n");
        assert_eq!(link.read_frame().await.unwrap().unwrap().as_str(), "6789\n");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let fake = FakeSerial::new();
        let link = link_for(&fake);
        link.open(&CancellationToken::new()).await.unwrap();

        link.close().await;
        link.close().await;
        assert_eq!(link.state().await, SerialEndpointState::Disconnected);
        assert!(link.read_frame().await.is_err());
    }
}
