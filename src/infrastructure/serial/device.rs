use crate::domain::config::{FlowControlConfig, ParityConfig, SerialSettings};
use crate::domain::error::{BridgeError, BridgeResult};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// An opened serial device.
///
/// The link keeps two handles to the same device: one read on a blocking
/// thread, one written from the async side.
pub trait SerialDevice: Read + Write + Send {
    fn try_clone_device(&self) -> io::Result<Box<dyn SerialDevice>>;

    /// Upper bound for the next blocking `read`
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl SerialDevice for Box<dyn SerialPort> {
    fn try_clone_device(&self) -> io::Result<Box<dyn SerialDevice>> {
        let clone = self.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(clone))
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_timeout(timeout).map_err(io::Error::from)
    }
}

/// Something that can (re)open the serial device
pub trait SerialOpener: Send + Sync {
    fn open(&self) -> BridgeResult<Box<dyn SerialDevice>>;

    /// Human readable name for logs
    fn describe(&self) -> String;
}

/// Opens a real port through the `serialport` crate
#[derive(Debug, Clone)]
pub struct PortOpener {
    path: String,
    baud_rate: u32,
    data_bits: serialport::DataBits,
    stop_bits: serialport::StopBits,
    parity: serialport::Parity,
    flow_control: serialport::FlowControl,
    timeout: Duration,
}

impl PortOpener {
    /// Validate the line settings up front so a bad configuration fails at
    /// startup instead of inside the reconnect loop.
    pub fn new(settings: &SerialSettings) -> BridgeResult<Self> {
        let data_bits = match settings.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(BridgeError::Config {
                    message: format!("Invalid data bits: {}", other),
                })
            }
        };

        let stop_bits = match settings.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => {
                return Err(BridgeError::Config {
                    message: format!("Invalid stop bits: {}", other),
                })
            }
        };

        let parity = match settings.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };

        let flow_control = match settings.flow_control {
            FlowControlConfig::None => serialport::FlowControl::None,
            FlowControlConfig::Software => serialport::FlowControl::Software,
            FlowControlConfig::Hardware => serialport::FlowControl::Hardware,
        };

        if settings.port.trim().is_empty() {
            return Err(BridgeError::Config {
                message: "Serial port path is empty".to_string(),
            });
        }

        Ok(Self {
            path: settings.port.clone(),
            baud_rate: settings.baud_rate,
            data_bits,
            stop_bits,
            parity,
            flow_control,
            timeout: settings.read_timeout(),
        })
    }
}

impl SerialOpener for PortOpener {
    fn open(&self) -> BridgeResult<Box<dyn SerialDevice>> {
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .flow_control(self.flow_control)
            .timeout(self.timeout)
            .open()?;

        Ok(Box::new(port))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }
}

/// Accumulates device bytes into newline-terminated lines.
///
/// Bytes after the last newline stay buffered for the next call, so a line
/// split across reads comes out whole and several lines in one chunk come
/// out one at a time. A run of `max_len` bytes without a newline is cut off
/// and returned as its own line.
pub(crate) struct LineReader {
    device: Box<dyn SerialDevice>,
    pending: Vec<u8>,
    max_len: usize,
}

impl LineReader {
    pub(crate) fn new(device: Box<dyn SerialDevice>, max_len: usize) -> Self {
        Self {
            device,
            pending: Vec::new(),
            max_len: max_len.max(1),
        }
    }

    /// Read until a full line is buffered or `timeout` elapses.
    ///
    /// `Ok(None)` means no complete line arrived in time.
    pub(crate) fn read_line(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];

        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            // Each read only gets what is left of the caller's timeout.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.device.set_read_timeout(remaining)?;

            match self.device.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(ref e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    return Ok(None);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        if let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            return Some(self.pending.drain(..=end).collect());
        }
        if self.pending.len() >= self.max_len {
            return Some(self.pending.drain(..self.max_len).collect());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::serial::fake::{FakeRead, FakeSerial};

    fn reader_for(fake: &FakeSerial) -> LineReader {
        LineReader::new(fake.open().unwrap(), 2048)
    }

    #[test]
    fn test_invalid_line_settings_rejected() {
        let settings = SerialSettings {
            data_bits: 9,
            ..SerialSettings::default()
        };
        assert!(matches!(PortOpener::new(&settings), Err(BridgeError::Config { .. })));

        let settings = SerialSettings {
            stop_bits: 3,
            ..SerialSettings::default()
        };
        assert!(matches!(PortOpener::new(&settings), Err(BridgeError::Config { .. })));
    }

    #[test]
    fn test_opener_describe() {
        let settings = SerialSettings {
            port: "/dev/tty.usbmodem1411".to_string(),
            ..SerialSettings::default()
        };
        let opener = PortOpener::new(&settings).unwrap();
        assert_eq!(opener.describe(), "/dev/tty.usbmodem1411 @ 115200 baud");
    }

    #[test]
    fn test_opening_missing_device_fails() {
        let settings = SerialSettings {
            port: "/dev/serialbridge-does-not-exist".to_string(),
            ..SerialSettings::default()
        };
        let opener = PortOpener::new(&settings).unwrap();
        assert!(opener.open().is_err());
    }

    #[test]
    fn test_split_line_reassembled() {
        let fake = FakeSerial::new();
        fake.push_read(FakeRead::Data(b"{\"t\":".to_vec()));
        fake.push_read(FakeRead::Data(b"1}\n".to_vec()));

        let mut reader = reader_for(&fake);
        let line = reader.read_line(Duration::from_millis(200)).unwrap();
        assert_eq!(line.as_deref(), Some(&b"{\"t\":1}\n"[..]));
    }

    #[test]
    fn test_coalesced_lines_delivered_in_order() {
        let fake = FakeSerial::new();
        fake.push_read(FakeRead::Data(b"one\ntwo\nthr".to_vec()));
        fake.push_read(FakeRead::Data(b"ee\n".to_vec()));

        let mut reader = reader_for(&fake);
        let timeout = Duration::from_millis(200);
        assert_eq!(reader.read_line(timeout).unwrap().unwrap(), b"one\n");
        assert_eq!(reader.read_line(timeout).unwrap().unwrap(), b"two\n");
        assert_eq!(reader.read_line(timeout).unwrap().unwrap(), b"three\n");
    }

    #[test]
    fn test_timeout_keeps_partial_line() {
        let fake = FakeSerial::new();
        fake.push_read(FakeRead::Data(b"par".to_vec()));
        fake.push_read(FakeRead::Timeout);
        fake.push_read(FakeRead::Data(b"tial\n".to_vec()));

        let mut reader = reader_for(&fake);
        let timeout = Duration::from_millis(200);
        assert_eq!(reader.read_line(timeout).unwrap(), None);
        assert_eq!(reader.read_line(timeout).unwrap().unwrap(), b"partial\n");
    }

    #[test]
    fn test_unterminated_run_cut_at_ceiling() {
        let fake = FakeSerial::new();
        fake.push_read(FakeRead::Data(vec![b'x'; 20]));
        fake.push_read(FakeRead::Data(b"yz\n".to_vec()));

        let mut reader = LineReader::new(fake.open().unwrap(), 8);
        let timeout = Duration::from_millis(200);
        assert_eq!(reader.read_line(timeout).unwrap().unwrap(), vec![b'x'; 8]);
        assert_eq!(reader.read_line(timeout).unwrap().unwrap(), vec![b'x'; 8]);
        assert_eq!(reader.read_line(timeout).unwrap().unwrap(), b"xxxxyz\n");
        assert!(reader.pending.is_empty());
    }

    #[test]
    fn test_trickling_device_bounded_by_timeout() {
        let fake = FakeSerial::with_idle(Duration::from_millis(400));
        fake.push_read(FakeRead::Data(b"a".to_vec()));

        let mut reader = reader_for(&fake);
        let started = Instant::now();
        assert_eq!(reader.read_line(Duration::from_millis(100)).unwrap(), None);
        assert!(started.elapsed() < Duration::from_millis(300), "took {:?}", started.elapsed());

        // The partial byte is still buffered.
        fake.push_read(FakeRead::Data(b"b\n".to_vec()));
        assert_eq!(reader.read_line(Duration::from_millis(100)).unwrap().unwrap(), b"ab\n");
    }

    #[test]
    fn test_device_failure_surfaces() {
        let fake = FakeSerial::new();
        fake.push_read(FakeRead::Fail(io::ErrorKind::BrokenPipe));

        let mut reader = reader_for(&fake);
        let err = reader.read_line(Duration::from_millis(200)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
