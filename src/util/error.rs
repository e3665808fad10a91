use thiserror::Error;

/// Errors surfaced anywhere in the bridge's data plane and configuration path.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported SOCKS command: {0}")]
    UnsupportedCommand(u8),

    #[error("unsupported SOCKS address type: {0}")]
    UnsupportedAddrType(u8),

    #[error("socks greeting carried extra data past the declared method count")]
    ExtraGreetingData,

    #[error("socks request carried extra data past the computed address length")]
    ExtraRequestData,

    #[error("no upstream tunnel available")]
    NoUpstreamAvailable,

    #[error("unsupported cipher method: {0}")]
    UnsupportedMethod(String),

    #[error("config parse error: {0}")]
    ConfigParse(String),
}

impl From<tokio::time::error::Elapsed> for BridgeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        BridgeError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "read deadline exceeded",
        ))
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
