use thiserror::Error;

/// Which side of the bridge an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Serial,
    Network,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Serial => write!(f, "serial"),
            Endpoint::Network => write!(f, "network"),
        }
    }
}

/// SerialBridge unified error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Frame is not valid UTF-8 ({len} bytes): {source}")]
    Decode {
        len: usize,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("{endpoint} link error: {message}")]
    Link { endpoint: Endpoint, message: String },

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No network client connected")]
    NoClient,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Output error: {0}")]
    Output(String),
}

impl BridgeError {
    pub fn serial_link(message: impl Into<String>) -> Self {
        Self::Link {
            endpoint: Endpoint::Serial,
            message: message.into(),
        }
    }

    pub fn network_link(message: impl Into<String>) -> Self {
        Self::Link {
            endpoint: Endpoint::Network,
            message: message.into(),
        }
    }

    /// Startup failures that end the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Config { .. })
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
