//! Core of the serial to TCP bridge: line source, decoding, forwarding loop.

pub mod bridge;
pub mod encoding;
pub mod error;
pub mod serial_source;
pub mod shutdown;

pub use bridge::{Bridge, BridgeConfig, BridgeState, SessionEnd};
pub use encoding::{decode_line, encode_frame};
pub use error::{BridgeError, Result};
pub use serial_source::{list_ports, LineReader, LineSource, PortInfo, SerialConfig, SerialSource};
pub use shutdown::{Shutdown, ShutdownTrigger};
