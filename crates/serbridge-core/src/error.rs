use std::io;
use std::net::SocketAddr;

use crate::bridge::BridgeState;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("cannot open serial port {port}: {source}")]
    SerialOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial read failed: {0}")]
    SerialRead(#[source] io::Error),

    #[error("serial source closed")]
    SerialClosed,

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("write to client failed: {0}")]
    ClientWrite(#[source] io::Error),

    #[error("bridge is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: BridgeState,
        actual: BridgeState,
    },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
