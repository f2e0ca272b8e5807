//! Closed protocol enumerations shared by the transport and the controller.

pub mod copy_mode;
pub mod family;
pub mod verdict;

pub use copy_mode::CopyMode;
pub use family::ProtocolFamily;
pub use verdict::Verdict;
