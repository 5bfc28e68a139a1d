//! Frame normalization
//!
//! Both directions of the bridge push every outgoing chunk through
//! [`normalize`] so the wire always carries exactly one newline-terminated
//! line per frame, without carriage returns.

use crate::domain::error::{BridgeError, BridgeResult};
use std::fmt;

/// Longest run of bytes either link buffers before cutting it into a frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 2048;

/// One logical newline-terminated message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame(String);

impl Frame {
    /// Build a frame from text that is already decoded
    pub fn from_text(text: &str) -> Self {
        let stripped: String = text.chars().filter(|c| *c != '\r').collect();

        let line = match stripped.find('\n') {
            // Only the first line survives; the rest is dropped.
            Some(index) => stripped[..=index].to_string(),
            None => {
                let mut line = stripped;
                line.push('\n');
                line
            }
        };

        Frame(line)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Frame content without the terminating newline
    pub fn payload(&self) -> &str {
        self.0.strip_suffix('\n').unwrap_or(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.payload())
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Canonicalize a raw chunk into a single frame.
///
/// Accepts bytes or text. Bytes that are not valid UTF-8 yield
/// [`BridgeError::Decode`]; callers drop such chunks and keep going.
pub fn normalize<T: AsRef<[u8]>>(raw: T) -> BridgeResult<Frame> {
    let raw = raw.as_ref();
    let text = std::str::from_utf8(raw).map_err(|source| BridgeError::Decode {
        len: raw.len(),
        source,
    })?;

    Ok(Frame::from_text(text))
}
