//! Modbus ASCII session.
//!
//! Requests are built and responses checked by `rmodbus`; this session only
//! moves the hex-encoded `:...\r\n` lines across the serial port.

use async_trait::async_trait;
use rmodbus::client::ModbusRequest;
use rmodbus::{ErrorKind, ModbusFrameBuf, ModbusProto, generate_ascii_frame, parse_ascii_frame};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::SerialStream;
use tracing::{debug, trace, warn};

use super::payload::{bytes_to_registers, pack_bits, registers_to_bytes, unpack_bits};
use super::serial::open_serial;
use super::{
    ModbusTransport, TransportError, TransportOptions, TransportResult, with_timeout, write_echo,
};
use crate::connection::{Protocol, SerialSettings};

/// Longest ASCII line: `:` + 2 hex chars per byte of a 256-byte frame + CRLF.
const MAX_ASCII_LINE: usize = 1 + 2 * 256 + 2;

/// Byte stream an ASCII session talks over.
trait AsciiLine: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsciiLine for S {}

/// A Modbus ASCII session on a serial line.
pub struct AsciiSession {
    path: String,
    settings: SerialSettings,
    unit_id: u8,
    options: TransportOptions,
    port: Option<Box<dyn AsciiLine>>,
}

impl AsciiSession {
    pub fn new(
        path: impl Into<String>,
        settings: SerialSettings,
        unit_id: u8,
        options: TransportOptions,
    ) -> Self {
        Self {
            path: path.into(),
            settings,
            unit_id,
            options,
            port: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn request(&self) -> ModbusRequest {
        ModbusRequest::new(self.unit_id, ModbusProto::Ascii)
    }

    /// Send one binary request frame and return the binary response frame.
    ///
    /// A timed out request drops the port: a late reply would otherwise be
    /// read as the answer to the next request.
    async fn transact(&mut self, request: &[u8]) -> TransportResult<Vec<u8>> {
        let timeout = self.options.timeout;
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        let result = with_timeout(timeout, exchange(port, request)).await;
        if let Err(TransportError::Timeout(limit)) = &result {
            warn!(path = %self.path, "ASCII request timed out after {:?}, closing port", limit);
            self.port = None;
        }
        result
    }
}

impl fmt::Debug for AsciiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsciiSession")
            .field("path", &self.path)
            .field("settings", &self.settings)
            .field("unit_id", &self.unit_id)
            .field("options", &self.options)
            .field("connected", &self.port.is_some())
            .finish()
    }
}

/// Write `request` as an ASCII line and read back one response line, decoded.
async fn exchange<S>(stream: &mut S, request: &[u8]) -> TransportResult<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(request.len() * 2 + 3);
    generate_ascii_frame(request, &mut line).map_err(rmodbus_error)?;
    trace!(frame = %String::from_utf8_lossy(&line).trim_end(), "ascii tx");
    stream.write_all(&line).await?;
    stream.flush().await?;

    let response = read_line(stream).await?;
    trace!(frame = %String::from_utf8_lossy(&response).trim_end(), "ascii rx");

    let mut frame: ModbusFrameBuf = [0; 256];
    let len = parse_ascii_frame(&response, response.len(), &mut frame, 0).map_err(rmodbus_error)?;
    Ok(frame[..len as usize].to_vec())
}

/// Read up to and including the terminating `\n`.
async fn read_line<S>(stream: &mut S) -> TransportResult<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    loop {
        let byte = stream.read_u8().await?;
        // Anything before the start marker is line noise.
        if line.is_empty() && byte != b':' {
            continue;
        }
        line.push(byte);
        if byte == b'\n' {
            return Ok(line);
        }
        if line.len() > MAX_ASCII_LINE {
            return Err(TransportError::Frame(format!(
                "response exceeds {} characters",
                MAX_ASCII_LINE
            )));
        }
    }
}

/// Framing faults become [`TransportError::Frame`], device exception codes
/// become [`TransportError::Exception`].
fn rmodbus_error(e: ErrorKind) -> TransportError {
    match e {
        ErrorKind::OOB
        | ErrorKind::OOBContext
        | ErrorKind::FrameBroken
        | ErrorKind::FrameCRCError
        | ErrorKind::Utf8Error => TransportError::Frame(e.to_string()),
        _ => TransportError::Exception(e.to_string()),
    }
}

#[async_trait]
impl ModbusTransport for AsciiSession {
    fn protocol(&self) -> Protocol {
        Protocol::Ascii
    }

    async fn connect(&mut self) -> TransportResult<()> {
        let port: SerialStream = open_serial(&self.path, &self.settings)?;
        self.port = Some(Box::new(port));

        debug!(
            path = %self.path,
            baud_rate = self.settings.baud_rate,
            unit_id = self.unit_id,
            "ASCII session established"
        );
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        if let Some(mut port) = self.port.take() {
            port.shutdown().await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        let mut mreq = self.request();
        let mut request = Vec::new();
        mreq.generate_get_discretes(address, quantity, &mut request)
            .map_err(rmodbus_error)?;
        let response = self.transact(&request).await?;

        let mut bits = Vec::with_capacity(quantity as usize);
        mreq.parse_bool(&response, &mut bits).map_err(rmodbus_error)?;
        Ok(pack_bits(&bits))
    }

    async fn read_coils(&mut self, address: u16, quantity: u16) -> TransportResult<Vec<u8>> {
        let mut mreq = self.request();
        let mut request = Vec::new();
        mreq.generate_get_coils(address, quantity, &mut request)
            .map_err(rmodbus_error)?;
        let response = self.transact(&request).await?;

        let mut bits = Vec::with_capacity(quantity as usize);
        mreq.parse_bool(&response, &mut bits).map_err(rmodbus_error)?;
        Ok(pack_bits(&bits))
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        let mut mreq = self.request();
        let mut request = Vec::new();
        mreq.generate_get_inputs(address, quantity, &mut request)
            .map_err(rmodbus_error)?;
        let response = self.transact(&request).await?;

        let mut registers = Vec::with_capacity(quantity as usize);
        mreq.parse_u16(&response, &mut registers)
            .map_err(rmodbus_error)?;
        Ok(registers_to_bytes(&registers))
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        let mut mreq = self.request();
        let mut request = Vec::new();
        mreq.generate_get_holdings(address, quantity, &mut request)
            .map_err(rmodbus_error)?;
        let response = self.transact(&request).await?;

        let mut registers = Vec::with_capacity(quantity as usize);
        mreq.parse_u16(&response, &mut registers)
            .map_err(rmodbus_error)?;
        Ok(registers_to_bytes(&registers))
    }

    async fn write_multiple_coils(
        &mut self,
        address: u16,
        quantity: u16,
        value: &[u8],
    ) -> TransportResult<Vec<u8>> {
        let coils = unpack_bits(value, quantity)?;
        let mut mreq = self.request();
        let mut request = Vec::new();
        mreq.generate_set_coils_bulk(address, &coils, &mut request)
            .map_err(rmodbus_error)?;
        let response = self.transact(&request).await?;

        mreq.parse_ok(&response).map_err(rmodbus_error)?;
        Ok(write_echo(address, quantity))
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        quantity: u16,
        value: &[u8],
    ) -> TransportResult<Vec<u8>> {
        let registers = bytes_to_registers(value, quantity)?;
        let mut mreq = self.request();
        let mut request = Vec::new();
        mreq.generate_set_holdings_bulk(address, &registers, &mut request)
            .map_err(rmodbus_error)?;
        let response = self.transact(&request).await?;

        mreq.parse_ok(&response).map_err(rmodbus_error)?;
        Ok(write_echo(address, quantity))
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> TransportResult<Vec<u8>> {
        let mut mreq = self.request();
        let mut request = Vec::new();
        mreq.generate_set_holding(address, value, &mut request)
            .map_err(rmodbus_error)?;
        let response = self.transact(&request).await?;

        mreq.parse_ok(&response).map_err(rmodbus_error)?;
        Ok(write_echo(address, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Encode a binary frame (without LRC) the way a device would answer.
    fn device_line(frame: &[u8]) -> Vec<u8> {
        let lrc = frame
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b))
            .wrapping_neg();
        let mut binary = frame.to_vec();
        binary.push(lrc);
        let mut line = Vec::new();
        generate_ascii_frame(&binary, &mut line).unwrap();
        line
    }

    #[tokio::test]
    async fn test_exchange_holding_registers() {
        let (mut client, mut device) = duplex(1024);

        let mut mreq = ModbusRequest::new(1, ModbusProto::Ascii);
        let mut request = Vec::new();
        mreq.generate_get_holdings(0x10, 2, &mut request).unwrap();

        let expected_request = {
            let mut line = Vec::new();
            generate_ascii_frame(&request, &mut line).unwrap();
            line
        };

        let device_task = tokio::spawn(async move {
            let mut received = vec![0u8; expected_request.len()];
            device.read_exact(&mut received).await.unwrap();
            assert_eq!(received, expected_request);
            // unit 1, FC 03, 4 bytes: 0x1234, 0xABCD
            let reply = device_line(&[0x01, 0x03, 0x04, 0x12, 0x34, 0xAB, 0xCD]);
            device.write_all(&reply).await.unwrap();
        });

        let response = exchange(&mut client, &request).await.unwrap();
        device_task.await.unwrap();

        let mut registers = Vec::new();
        mreq.parse_u16(&response, &mut registers).unwrap();
        assert_eq!(registers, vec![0x1234, 0xABCD]);
        assert_eq!(registers_to_bytes(&registers), vec![0x12, 0x34, 0xAB, 0xCD]);
    }

    #[tokio::test]
    async fn test_read_line_skips_noise() {
        let (mut client, mut device) = duplex(64);
        device.write_all(b"\0\0:0103\r\n").await.unwrap();

        let line = read_line(&mut client).await.unwrap();
        assert_eq!(line, b":0103\r\n");
    }

    #[test]
    fn test_crc_mismatch_is_frame_error() {
        let mreq = ModbusRequest::new(1, ModbusProto::Ascii);
        // Last byte is not the LRC of the rest.
        let err = mreq.parse_ok(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x07, 0x00]);
        assert!(matches!(
            err.map_err(rmodbus_error),
            Err(TransportError::Frame(_))
        ));
    }

    #[tokio::test]
    async fn test_read_line_closed_stream() {
        let (mut client, device) = duplex(64);
        drop(device);

        assert!(matches!(
            read_line(&mut client).await,
            Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_exception_response() {
        let (mut client, mut device) = duplex(1024);

        let mut mreq = ModbusRequest::new(1, ModbusProto::Ascii);
        let mut request = Vec::new();
        mreq.generate_get_coils(0, 8, &mut request).unwrap();

        tokio::spawn(async move {
            let mut sink = [0u8; 64];
            let _ = device.read(&mut sink).await;
            // FC 01 | 0x80, exception 02 (illegal data address)
            let reply = device_line(&[0x01, 0x81, 0x02]);
            device.write_all(&reply).await.unwrap();
        });

        let response = exchange(&mut client, &request).await.unwrap();
        let mut bits = Vec::new();
        let err = mreq.parse_bool(&response, &mut bits).map_err(rmodbus_error);
        assert!(matches!(err, Err(TransportError::Exception(_))));
    }

    #[tokio::test]
    async fn test_timeout_drops_port() {
        let mut session = AsciiSession::new(
            "/dev/ttyUSB0",
            SerialSettings::default(),
            1,
            TransportOptions::from_millis(50),
        );
        let (client, mut device) = duplex(1024);
        session.port = Some(Box::new(client));

        let device_task = tokio::spawn(async move {
            let request = read_line(&mut device).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            // Late reply for the first request: 0x1234.
            let reply = device_line(&[0x01, 0x03, 0x02, 0x12, 0x34]);
            let _ = device.write_all(&reply).await;
            request
        });

        let err = session.read_holding_registers(0x10, 1).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "{:?}", err);
        assert!(!session.is_connected());

        // The stale reply can never be taken for a later request.
        assert!(matches!(
            session.read_holding_registers(0x20, 1).await,
            Err(TransportError::NotConnected)
        ));
        assert!(device_task.await.unwrap().starts_with(b":"));
    }

    #[tokio::test]
    async fn test_requests_require_connection() {
        let mut session = AsciiSession::new(
            "/dev/ttyUSB0",
            SerialSettings::default(),
            1,
            TransportOptions::default(),
        );

        assert!(matches!(
            session.read_holding_registers(0, 1).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            session.write_single_register(0, 7).await,
            Err(TransportError::NotConnected)
        ));
    }
}
