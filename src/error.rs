use crate::network::types::Verdict;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NfqError {
    /// An operation ran before the handle, queue or callback it needs exists
    #[error("queue not initialized: {0}")]
    NotInitialized(&'static str),

    /// The netfilter queue handle could not be opened
    #[error("failed to open netfilter queue handle: {0}")]
    OpenFailed(#[source] std::io::Error),

    /// A native operation that is expected to succeed reported failure
    #[error("runtime error while trying to {context}: {source}")]
    Runtime {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A modified verdict was issued without replacement bytes
    #[error("replacement payload for packet {packet_id} is empty")]
    EmptyReplacement { packet_id: u32 },

    /// The replacement payload does not fit in one netlink attribute
    #[error("replacement payload for packet {packet_id} is {len} bytes, the limit is {max}")]
    ReplacementTooLarge { packet_id: u32, len: usize, max: usize },

    /// A second verdict was attempted for the same packet
    #[error("packet {packet_id} already received verdict '{previous}'")]
    VerdictAlreadyIssued { packet_id: u32, previous: Verdict },

    /// Sending a verdict to the kernel failed; the packet gets no second chance
    #[error("failed to send verdict for packet {packet_id}: {source}")]
    Verdict {
        packet_id: u32,
        #[source]
        source: std::io::Error,
    },

    /// Error reading a settings file
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Error writing a settings file
    #[error("failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// I/O errors from file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenient Result type alias using `NfqError`.
pub type Result<T> = std::result::Result<T, NfqError>;

impl NfqError {
    /// Wraps a failed native call with what the queue was trying to do.
    pub fn runtime(context: &'static str, source: std::io::Error) -> Self {
        Self::Runtime { context, source }
    }

    /// Returns true for errors caused by calling operations out of order.
    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Self::NotInitialized(_))
    }
}
