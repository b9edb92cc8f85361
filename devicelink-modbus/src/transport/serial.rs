//! Serial line setup and the Modbus RTU session.

use async_trait::async_trait;
use tokio_modbus::prelude::*;
use tokio_serial::SerialStream;
use tracing::debug;

use super::context::ContextSession;
use super::{ModbusTransport, TransportError, TransportOptions, TransportResult};
use crate::connection::{Parity, Protocol, SerialSettings};

/// Open `path` with the given line settings.
pub(crate) fn open_serial(path: &str, settings: &SerialSettings) -> TransportResult<SerialStream> {
    let data_bits = match settings.data_bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        8 => tokio_serial::DataBits::Eight,
        other => {
            return Err(TransportError::InvalidSetting(format!(
                "data bits must be 5-8, got {}",
                other
            )));
        }
    };

    let stop_bits = match settings.stop_bits {
        1 => tokio_serial::StopBits::One,
        2 => tokio_serial::StopBits::Two,
        other => {
            return Err(TransportError::InvalidSetting(format!(
                "stop bits must be 1 or 2, got {}",
                other
            )));
        }
    };

    let parity = match settings.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    };

    let builder = tokio_serial::new(path, settings.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity);

    Ok(SerialStream::open(&builder)?)
}

/// A Modbus RTU session on a serial line.
#[derive(Debug)]
pub struct RtuSession {
    path: String,
    settings: SerialSettings,
    unit_id: u8,
    inner: ContextSession,
}

impl RtuSession {
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
            inner: ContextSession::new(options.timeout),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

#[async_trait]
impl ModbusTransport for RtuSession {
    fn protocol(&self) -> Protocol {
        Protocol::Rtu
    }

    async fn connect(&mut self) -> TransportResult<()> {
        let serial = open_serial(&self.path, &self.settings)?;
        self.inner
            .attach(rtu::attach_slave(serial, Slave(self.unit_id)));

        debug!(
            path = %self.path,
            baud_rate = self.settings.baud_rate,
            unit_id = self.unit_id,
            "RTU session established"
        );
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.inner.detach().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_attached()
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        self.inner.read_discrete_inputs(address, quantity).await
    }

    async fn read_coils(&mut self, address: u16, quantity: u16) -> TransportResult<Vec<u8>> {
        self.inner.read_coils(address, quantity).await
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        self.inner.read_input_registers(address, quantity).await
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        self.inner.read_holding_registers(address, quantity).await
    }

    async fn write_multiple_coils(
        &mut self,
        address: u16,
        quantity: u16,
        value: &[u8],
    ) -> TransportResult<Vec<u8>> {
        self.inner
            .write_multiple_coils(address, quantity, value)
            .await
    }

    async fn write_multiple_registers(
        &mut self,
        address: u16,
        quantity: u16,
        value: &[u8],
    ) -> TransportResult<Vec<u8>> {
        self.inner
            .write_multiple_registers(address, quantity, value)
            .await
    }

    async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> TransportResult<Vec<u8>> {
        self.inner.write_single_register(address, value).await
    }
}
