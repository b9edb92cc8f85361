//! Modbus client adapter for one device.
//!
//! [`ModbusClient`] owns one transport session and maps [`CommandInfo`]
//! requests onto the matching read or write function. Every call is a single
//! attempt: transport failures are returned unchanged and the caller decides
//! whether to reopen.

use tracing::{Instrument, Span, debug, info, info_span};

use crate::command::{CommandInfo, PrimaryTable};
use crate::connection::{ConnectionInfo, Protocol};
use crate::transport::{
    ConnectionHandle, ModbusTransport, TransportError, TransportOptions, TransportResult,
};

/// Client for one Modbus device.
#[derive(Debug)]
pub struct ModbusClient<T = ConnectionHandle> {
    transport: T,
    span: Span,
}

impl ModbusClient<ConnectionHandle> {
    /// Create a client for `info` with default transport options.
    pub fn new(info: &ConnectionInfo) -> TransportResult<Self> {
        Self::with_options(info, TransportOptions::default())
    }

    /// Create a client for `info`.
    ///
    /// Nothing is opened until [`open_connection`](Self::open_connection).
    /// RTU and ASCII connections without serial settings are rejected.
    pub fn with_options(info: &ConnectionInfo, options: TransportOptions) -> TransportResult<Self> {
        let span = info_span!(
            "modbus_client",
            protocol = %info.protocol,
            address = %info.address,
            unit_id = info.unit_id
        );
        Ok(Self {
            transport: ConnectionHandle::from_info(info, options)?,
            span,
        })
    }
}

impl<T: ModbusTransport> ModbusClient<T> {
    /// Wrap an already prepared transport.
    pub fn with_transport(transport: T) -> Self {
        let span = info_span!("modbus_client", protocol = %transport.protocol());
        Self { transport, span }
    }

    /// Log under `span` instead of the default client span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.transport.protocol()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open the session and bind a client to it.
    pub async fn open_connection(&mut self) -> TransportResult<()> {
        let span = self.span.clone();
        async {
            self.transport.connect().await?;
            info!(
                "Modbus client created {} connection",
                transport_kind(self.transport.protocol())
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Close the session.
    pub async fn close_connection(&mut self) -> TransportResult<()> {
        let span = self.span.clone();
        async {
            self.transport.close().await?;
            debug!(
                "Modbus client closed {} connection",
                transport_kind(self.transport.protocol())
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Read the range described by `command` and return the raw response bytes.
    pub async fn get_value(&mut self, command: &CommandInfo) -> TransportResult<Vec<u8>> {
        let span = self.span.clone();
        async {
            let response = self.read(command).await?;
            info!(command = %command, "Modbus client GetValue's results {:?}", response);
            Ok(response)
        }
        .instrument(span)
        .await
    }

    /// Write `value` to the range described by `command`.
    ///
    /// A single holding register is written from the first two bytes of
    /// `value` (big-endian); every other range uses a multiple write.
    pub async fn set_value(&mut self, command: &CommandInfo, value: &[u8]) -> TransportResult<()> {
        let span = self.span.clone();
        async {
            let result = self.write(command, value).await?;
            info!(command = %command, "Modbus client SetValue successful, results: {:?}", result);
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn read(&mut self, command: &CommandInfo) -> TransportResult<Vec<u8>> {
        let address = command.starting_address;
        let quantity = command.length;

        match command.primary_table {
            PrimaryTable::DiscreteInputs => {
                self.transport
                    .read_discrete_inputs(address, quantity)
                    .await
            }
            PrimaryTable::Coils => self.transport.read_coils(address, quantity).await,
            PrimaryTable::InputRegisters => {
                self.transport
                    .read_input_registers(address, quantity)
                    .await
            }
            PrimaryTable::HoldingRegisters => {
                self.transport
                    .read_holding_registers(address, quantity)
                    .await
            }
        }
    }

    async fn write(&mut self, command: &CommandInfo, value: &[u8]) -> TransportResult<Vec<u8>> {
        let address = command.starting_address;
        let quantity = command.length;

        match command.primary_table {
            PrimaryTable::DiscreteInputs | PrimaryTable::Coils => {
                self.transport
                    .write_multiple_coils(address, quantity, value)
                    .await
            }
            PrimaryTable::InputRegisters => {
                self.transport
                    .write_multiple_registers(address, quantity, value)
                    .await
            }
            PrimaryTable::HoldingRegisters if quantity == 1 => {
                let register = first_register(value)?;
                self.transport
                    .write_single_register(address, register)
                    .await
            }
            PrimaryTable::HoldingRegisters => {
                self.transport
                    .write_multiple_registers(address, quantity, value)
                    .await
            }
        }
    }
}

fn transport_kind(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Tcp => "TCP",
        Protocol::Rtu => "RTU",
        Protocol::Ascii => "ASCII",
    }
}

fn first_register(value: &[u8]) -> TransportResult<u16> {
    match value {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(TransportError::InvalidValue(format!(
            "single register write needs 2 bytes, got {}",
            value.len()
        ))),
    }
}
