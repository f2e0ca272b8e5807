use serde::{Deserialize, Serialize};
use std::fmt;

/// How much of each packet the kernel copies to userspace.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CopyMode {
    /// Nothing is copied, the queue delivers no events
    None,
    /// Only metadata (packet ID, mark, interfaces) is copied
    #[value(alias = "meta")]
    #[serde(alias = "meta")]
    Metadata,
    /// Metadata plus up to the copy range bytes of payload
    #[default]
    Packet,
}

impl CopyMode {
    /// Returns the kernel `NFQNL_COPY_*` constant.
    pub const fn as_raw(self) -> u8 {
        match self {
            CopyMode::None => 0,
            CopyMode::Metadata => 1,
            CopyMode::Packet => 2,
        }
    }

    /// Returns true if events carry payload bytes in this mode.
    pub fn copies_payload(self) -> bool {
        matches!(self, CopyMode::Packet)
    }
}

impl fmt::Display for CopyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CopyMode::None => "none",
            CopyMode::Metadata => "metadata",
            CopyMode::Packet => "packet",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_full_packet() {
        assert_eq!(CopyMode::default(), CopyMode::Packet);
        assert!(CopyMode::default().copies_payload());
        assert!(!CopyMode::Metadata.copies_payload());
    }

    #[test]
    fn test_kernel_constants() {
        assert_eq!(CopyMode::None.as_raw(), 0);
        assert_eq!(CopyMode::Metadata.as_raw(), 1);
        assert_eq!(CopyMode::Packet.as_raw(), 2);
    }
}
