use thiserror::Error;

/// Faults raised by the serial link transport.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Send or read attempted while the link is down.
    #[error("link not connected")]
    NotConnected,

    /// The device could not be opened.
    #[error("failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// Wrapper around IO errors on an open link.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound line exceeds the per-line radio payload.
    #[error("line of {len} bytes exceeds link payload of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// Outbound line would be split by the field unit's line reader.
    #[error("line contains an embedded newline")]
    EmbeddedNewline,
}

/// Faults while decoding a compact wire line.
#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("expected prefix {expected}")]
    Prefix { expected: &'static str },

    #[error("{frame}: expected {expected} fields, got {found}")]
    FieldCount {
        frame: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{frame}: bad {field} value '{value}'")]
    Field {
        frame: &'static str,
        field: &'static str,
        value: String,
    },
}

/// Faults from an external collaborator (capture, detector, telemetry).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Faults from the host network manager backend.
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("{tool} not available")]
    ToolMissing { tool: &'static str },

    #[error("{command} timed out")]
    Timeout { command: String },

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
