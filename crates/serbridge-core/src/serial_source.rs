use serialport::{SerialPort, SerialPortInfo};
use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (port_type, vid, pid, serial_number, manufacturer, product) = match &info.port_type {
            serialport::SerialPortType::UsbPort(usb) => (
                "USB".to_string(),
                Some(usb.vid),
                Some(usb.pid),
                usb.serial_number.clone(),
                usb.manufacturer.clone(),
                usb.product.clone(),
            ),
            serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None, None),
            serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None, None, None, None),
            serialport::SerialPortType::Unknown => ("Unknown".to_string(), None, None, None, None, None),
        };
        Self {
            port_name: info.port_name,
            port_type,
            vid,
            pid,
            serial_number,
            manufacturer,
            product,
        }
    }
}

pub fn list_ports() -> Vec<PortInfo> {
    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect()
}

#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM3";
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: serialport::DataBits,
    pub parity: serialport::Parity,
    pub stop_bits: serialport::StopBits,
    pub flow_control: serialport::FlowControl,
    /// Upper bound for a single `read_line` call.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: serialport::DataBits::Eight,
            parity: serialport::Parity::None,
            stop_bits: serialport::StopBits::One,
            flow_control: serialport::FlowControl::None,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Something that yields newline-delimited chunks of bytes.
pub trait LineSource {
    /// Returns one line including its terminator, or whatever arrived before
    /// the read timeout expired. An empty vector means nothing arrived.
    fn read_line(&mut self) -> Result<Vec<u8>>;
}

impl<T: LineSource + ?Sized> LineSource for Box<T> {
    fn read_line(&mut self) -> Result<Vec<u8>> {
        (**self).read_line()
    }
}

/// Buffers a timed byte reader and splits it on `\n`.
///
/// The reader is expected to report an elapsed read timeout as
/// `ErrorKind::TimedOut` (what `serialport` does) or `ErrorKind::WouldBlock`.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    timeout: Duration,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            timeout,
        }
    }

    /// Bytes received but not yet returned as a line.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        Some(self.buf.drain(..=pos).collect())
    }
}

impl<R: Read> LineSource for LineReader<R> {
    fn read_line(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; 512];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            if Instant::now() >= deadline {
                return Ok(std::mem::take(&mut self.buf));
            }
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    if self.buf.is_empty() {
                        return Err(BridgeError::SerialClosed);
                    }
                    return Ok(std::mem::take(&mut self.buf));
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(std::mem::take(&mut self.buf));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(BridgeError::SerialRead(e)),
            }
        }
    }
}

/// An opened serial port read line by line.
pub struct SerialSource {
    port_name: String,
    reader: LineReader<Box<dyn SerialPort>>,
}

impl SerialSource {
    pub fn open(cfg: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&cfg.port_name, cfg.baud_rate)
            .data_bits(cfg.data_bits)
            .parity(cfg.parity)
            .stop_bits(cfg.stop_bits)
            .flow_control(cfg.flow_control)
            .timeout(cfg.timeout)
            .open()
            .map_err(|source| BridgeError::SerialOpen {
                port: cfg.port_name.clone(),
                source,
            })?;
        log::info!("opened serial port {} at {} baud", cfg.port_name, cfg.baud_rate);

        Ok(Self {
            port_name: cfg.port_name.clone(),
            reader: LineReader::new(port, cfg.timeout),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl LineSource for SerialSource {
    fn read_line(&mut self) -> Result<Vec<u8>> {
        self.reader.read_line()
    }
}

impl Drop for SerialSource {
    fn drop(&mut self) {
        log::info!("closed serial port {}", self.port_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Replays a fixed script of read results.
    struct Script(VecDeque<io::Result<Vec<u8>>>);

    fn data(bytes: &[u8]) -> io::Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn fail(kind: io::ErrorKind) -> io::Result<Vec<u8>> {
        Err(kind.into())
    }

    impl Read for Script {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    out[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::TimedOut.into()),
            }
        }
    }

    fn reader(steps: Vec<io::Result<Vec<u8>>>) -> LineReader<Script> {
        LineReader::new(Script(steps.into()), Duration::from_secs(5))
    }

    #[test]
    fn test_default_config() {
        let cfg = SerialConfig::default();
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.port_name, DEFAULT_PORT);
        assert_eq!(cfg.timeout, Duration::from_secs(1));
    }

    #[test]
    fn splits_chunk_holding_two_lines() {
        let mut r = reader(vec![data(b"A1:512\nA1:513\n")]);
        assert_eq!(r.read_line().unwrap(), b"A1:512\n");
        assert_eq!(r.read_line().unwrap(), b"A1:513\n");
        assert!(r.pending().is_empty());
    }

    #[test]
    fn joins_line_spread_over_reads() {
        let mut r = reader(vec![data(b"A1:"), data(b"51"), data(b"2\r\nA1")]);
        assert_eq!(r.read_line().unwrap(), b"A1:512\r\n");
        assert_eq!(r.pending(), b"A1");
    }

    #[test]
    fn timeout_without_data_is_empty() {
        let mut r = reader(vec![fail(io::ErrorKind::TimedOut)]);
        assert!(r.read_line().unwrap().is_empty());
    }

    #[test]
    fn timeout_returns_partial_line() {
        let mut r = reader(vec![data(b"A1:5"), fail(io::ErrorKind::WouldBlock)]);
        assert_eq!(r.read_line().unwrap(), b"A1:5");
        assert!(r.pending().is_empty());
    }

    #[test]
    fn interrupted_read_is_retried() {
        let mut r = reader(vec![fail(io::ErrorKind::Interrupted), data(b"x\n")]);
        assert_eq!(r.read_line().unwrap(), b"x\n");
    }

    #[test]
    fn eof_reports_closed_source() {
        let mut r = reader(vec![data(b"")]);
        assert!(matches!(r.read_line(), Err(BridgeError::SerialClosed)));
    }

    #[test]
    fn other_read_errors_propagate() {
        let mut r = reader(vec![fail(io::ErrorKind::PermissionDenied)]);
        assert!(matches!(r.read_line(), Err(BridgeError::SerialRead(_))));
    }

    #[test]
    fn zero_timeout_returns_immediately() {
        let mut r = LineReader::new(Script(vec![data(b"never read\n")].into()), Duration::ZERO);
        assert!(r.read_line().unwrap().is_empty());
    }

    #[test]
    fn open_missing_port_fails() {
        let cfg = SerialConfig {
            port_name: "/dev/serbridge-does-not-exist".to_string(),
            ..Default::default()
        };
        match SerialSource::open(&cfg) {
            Err(BridgeError::SerialOpen { port, .. }) => assert_eq!(port, cfg.port_name),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }
}
