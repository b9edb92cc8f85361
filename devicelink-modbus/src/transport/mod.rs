//! Transport sessions the client adapter delegates to.
//!
//! Framing is left to external crates: `tokio-modbus` drives TCP and RTU,
//! `rmodbus` builds and checks ASCII frames. Every operation returns the raw
//! data bytes of the response:
//!
//! - bit reads are packed LSB-first, eight bits per byte
//! - register reads are big-endian, two bytes per register
//! - writes return the echoed `address, quantity` (or `address, value`) pair

mod ascii;
mod context;
mod payload;
mod serial;
mod tcp;

pub use ascii::AsciiSession;
pub use payload::{bytes_to_registers, pack_bits, registers_to_bytes, unpack_bits};
pub use serial::RtuSession;
pub use tcp::TcpSession;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::connection::{ConnectionInfo, Protocol};

/// Default Modbus TCP port.
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Errors surfaced by a transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Modbus transport error: {0}")]
    Modbus(String),

    #[error("Modbus exception: {0}")]
    Exception(String),

    #[error("Frame error: {0}")]
    Frame(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid serial setting: {0}")]
    InvalidSetting(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Per-session transport tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Upper bound for connect and for each request. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl TransportOptions {
    /// Options with a timeout in milliseconds; `0` disables it.
    pub fn from_millis(timeout_ms: u64) -> Self {
        Self {
            timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        }
    }
}

/// Session with one Modbus device.
///
/// Operations take `&mut self`; a session serves one caller at a time.
#[async_trait]
pub trait ModbusTransport: Send {
    /// Framing variant of this session.
    fn protocol(&self) -> Protocol;

    /// Opens the socket or serial port and binds a client to it.
    async fn connect(&mut self) -> TransportResult<()>;

    /// Closes the session. Closing an unopened session is a no-op.
    async fn close(&mut self) -> TransportResult<()>;

    fn is_connected(&self) -> bool;

    /// Reads discrete inputs (FC 02).
    async fn read_discrete_inputs(&mut self, address: u16, quantity: u16)
    -> TransportResult<Vec<u8>>;

    /// Reads coils (FC 01).
    async fn read_coils(&mut self, address: u16, quantity: u16) -> TransportResult<Vec<u8>>;

    /// Reads input registers (FC 04).
    async fn read_input_registers(&mut self, address: u16, quantity: u16)
    -> TransportResult<Vec<u8>>;

    /// Reads holding registers (FC 03).
    async fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>>;

    /// Writes `quantity` coils packed LSB-first in `value` (FC 15).
    async fn write_multiple_coils(
        &mut self,
        address: u16,
        quantity: u16,
        value: &[u8],
    ) -> TransportResult<Vec<u8>>;

    /// Writes `quantity` big-endian registers from `value` (FC 16).
    async fn write_multiple_registers(
        &mut self,
        address: u16,
        quantity: u16,
        value: &[u8],
    ) -> TransportResult<Vec<u8>>;

    /// Writes one holding register (FC 06).
    async fn write_single_register(&mut self, address: u16, value: u16)
    -> TransportResult<Vec<u8>>;
}

/// The session for one device, chosen once from its [`ConnectionInfo`].
#[derive(Debug)]
pub enum ConnectionHandle {
    Tcp(TcpSession),
    Rtu(RtuSession),
    Ascii(AsciiSession),
}

impl ConnectionHandle {
    /// Prepare (but do not open) the session matching `info.protocol`.
    ///
    /// RTU and ASCII need serial line settings; there is no fallback.
    pub fn from_info(info: &ConnectionInfo, options: TransportOptions) -> TransportResult<Self> {
        let serial = || {
            info.serial.ok_or_else(|| {
                TransportError::InvalidSetting(format!(
                    "{} connection to '{}' has no serial settings",
                    info.protocol, info.address
                ))
            })
        };

        let handle = match info.protocol {
            Protocol::Tcp => ConnectionHandle::Tcp(TcpSession::new(
                info.address.clone(),
                info.port.unwrap_or(DEFAULT_TCP_PORT),
                info.unit_id,
                options,
            )),
            Protocol::Rtu => ConnectionHandle::Rtu(RtuSession::new(
                info.serial_path(),
                serial()?,
                info.unit_id,
                options,
            )),
            Protocol::Ascii => ConnectionHandle::Ascii(AsciiSession::new(
                info.serial_path(),
                serial()?,
                info.unit_id,
                options,
            )),
        };
        Ok(handle)
    }

    fn session(&mut self) -> &mut dyn ModbusTransport {
        match self {
            ConnectionHandle::Tcp(session) => session,
            ConnectionHandle::Rtu(session) => session,
            ConnectionHandle::Ascii(session) => session,
        }
    }

    fn session_ref(&self) -> &dyn ModbusTransport {
        match self {
            ConnectionHandle::Tcp(session) => session,
            ConnectionHandle::Rtu(session) => session,
            ConnectionHandle::Ascii(session) => session,
        }
    }
}

#[async_trait]
impl ModbusTransport for ConnectionHandle {
    fn protocol(&self) -> Protocol {
        self.session_ref().protocol()
    }

    async fn connect(&mut self) -> TransportResult<()> {
        self.session().connect().await
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.session().close().await
    }

    fn is_connected(&self) -> bool {
        self.session_ref().is_connected()
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        self.session().read_discrete_inputs(address, quantity).await
    }

    async fn read_coils(&mut self, address: u16, quantity: u16) -> TransportResult<Vec<u8>> {
        self.session().read_coils(address, quantity).await
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        self.session().read_input_registers(address, quantity).await
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        self.session().read_holding_registers(address, quantity).await
    }

    async fn write_multiple_coils(
        &mut self,
        address: u16,
        quantity: u16,
        value: &[u8],
    ) -> TransportResult<Vec<u8>> {
        self.session()
            .write_multiple_coils(address, quantity, value)
            .await
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        quantity: u16,
        value: &[u8],
    ) -> TransportResult<Vec<u8>> {
        self.session()
            .write_multiple_registers(address, quantity, value)
            .await
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> TransportResult<Vec<u8>> {
        self.session().write_single_register(address, value).await
    }
}

/// Run `fut`, bounded by `timeout` when set.
pub(crate) async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Echo bytes for a write: the address followed by the quantity or value.
pub(crate) fn write_echo(address: u16, quantity_or_value: u16) -> Vec<u8> {
    let mut echo = Vec::with_capacity(4);
    echo.extend_from_slice(&address.to_be_bytes());
    echo.extend_from_slice(&quantity_or_value.to_be_bytes());
    echo
}
