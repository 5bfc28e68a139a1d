use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::serial::device::{SerialDevice, SerialOpener};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One scripted outcome of a device read
#[derive(Debug, Clone)]
pub enum FakeRead {
    Data(Vec<u8>),
    Timeout,
    Fail(io::ErrorKind),
}

#[derive(Default)]
struct FakeState {
    failing_opens: usize,
    open_count: usize,
    reads: VecDeque<FakeRead>,
    writes: Vec<Vec<u8>>,
}

/// In-memory serial device with scripted reads, used by tests.
///
/// Every handle opened from the same `FakeSerial` shares one script and
/// one write log. An empty script behaves like an idle line: reads wait
/// `idle` (or the device's read timeout, if shorter) and then time out.
#[derive(Clone)]
pub struct FakeSerial {
    state: Arc<Mutex<FakeState>>,
    idle: Duration,
}

impl FakeSerial {
    pub fn new() -> Self {
        Self::with_idle(Duration::from_millis(10))
    }

    pub fn with_idle(idle: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            idle,
        }
    }

    /// Make the next `count` open attempts fail
    pub fn fail_next_opens(&self, count: usize) {
        self.lock().failing_opens = count;
    }

    pub fn push_read(&self, read: FakeRead) {
        self.lock().reads.push_back(read);
    }

    pub fn push_line(&self, line: &str) {
        self.push_read(FakeRead::Data(line.as_bytes().to_vec()));
    }

    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    /// Every write so far, one entry per `write` call
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// All written bytes concatenated as text
    pub fn written_text(&self) -> String {
        let bytes: Vec<u8> = self.lock().writes.concat();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for FakeSerial {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialOpener for FakeSerial {
    fn open(&self) -> BridgeResult<Box<dyn SerialDevice>> {
        let mut state = self.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(BridgeError::Serial(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "fake device not present",
            )));
        }
        state.open_count += 1;

        Ok(Box::new(FakeDevice {
            owner: self.clone(),
            timeout: None,
        }))
    }

    fn describe(&self) -> String {
        "fake serial device".to_string()
    }
}

struct FakeDevice {
    owner: FakeSerial,
    timeout: Option<Duration>,
}

impl Read for FakeDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let next = self.owner.lock().reads.pop_front();

        match next {
            Some(FakeRead::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    let rest = data.split_off(n);
                    self.owner.lock().reads.push_front(FakeRead::Data(rest));
                }
                Ok(n)
            }
            Some(FakeRead::Fail(kind)) => Err(io::Error::new(kind, "fake device failure")),
            Some(FakeRead::Timeout) | None => {
                let wait = match self.timeout {
                    Some(timeout) => timeout.min(self.owner.idle),
                    None => self.owner.idle,
                };
                std::thread::sleep(wait);
                Err(io::Error::new(io::ErrorKind::TimedOut, "fake read timed out"))
            }
        }
    }
}

impl Write for FakeDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.owner.lock().writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialDevice for FakeDevice {
    fn try_clone_device(&self) -> io::Result<Box<dyn SerialDevice>> {
        Ok(Box::new(FakeDevice {
            owner: self.owner.clone(),
            timeout: self.timeout,
        }))
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = Some(timeout);
        Ok(())
    }
}
