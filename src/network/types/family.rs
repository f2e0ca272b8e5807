use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol family a queue handle can be bound to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    /// IPv4 (`AF_INET`)
    #[value(alias = "ipv4")]
    Inet,
    /// IPv6 (`AF_INET6`)
    #[value(alias = "ipv6")]
    Inet6,
    /// Bridged traffic (`AF_BRIDGE`)
    Bridge,
}

impl ProtocolFamily {
    /// Returns the `AF_*` constant as carried in the config command.
    pub fn as_raw(self) -> u16 {
        let family = match self {
            ProtocolFamily::Inet => libc::AF_INET,
            ProtocolFamily::Inet6 => libc::AF_INET6,
            ProtocolFamily::Bridge => libc::AF_BRIDGE,
        };
        family as u16
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolFamily::Inet => "inet",
            ProtocolFamily::Inet6 => "inet6",
            ProtocolFamily::Bridge => "bridge",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_families() {
        assert_eq!(ProtocolFamily::Inet.as_raw(), 2);
        assert_eq!(ProtocolFamily::Inet6.as_raw(), 10);
        assert_eq!(ProtocolFamily::Bridge.as_raw(), 7);
    }
}
