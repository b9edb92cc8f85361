//! Modbus TCP session.

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_modbus::prelude::*;
use tracing::debug;

use super::context::ContextSession;
use super::{ModbusTransport, TransportError, TransportOptions, TransportResult, with_timeout};
use crate::connection::Protocol;

/// A Modbus TCP session addressed by host, port and unit ID.
#[derive(Debug)]
pub struct TcpSession {
    host: String,
    port: u16,
    unit_id: u8,
    options: TransportOptions,
    inner: ContextSession,
}

impl TcpSession {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8, options: TransportOptions) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            options,
            inner: ContextSession::new(options.timeout),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl ModbusTransport for TcpSession {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn connect(&mut self) -> TransportResult<()> {
        let target = (self.host.as_str(), self.port);
        let stream = with_timeout(self.options.timeout, async {
            TcpStream::connect(target).await.map_err(TransportError::from)
        })
        .await?;
        stream.set_nodelay(true).ok();

        self.inner
            .attach(tcp::attach_slave(stream, Slave(self.unit_id)));

        debug!(
            host = %self.host,
            port = self.port,
            unit_id = self.unit_id,
            "TCP session established"
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
