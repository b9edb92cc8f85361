//! Request plumbing shared by the sessions built on a `tokio-modbus` context.

use std::fmt;
use std::time::Duration;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use super::payload::{bytes_to_registers, pack_bits, registers_to_bytes, unpack_bits};
use super::{TransportError, TransportResult, with_timeout, write_echo};
use tracing::warn;

/// A bound `tokio-modbus` client context, present only while connected.
pub(crate) struct ContextSession {
    ctx: Option<Context>,
    timeout: Option<Duration>,
}

impl ContextSession {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self { ctx: None, timeout }
    }

    pub(crate) fn attach(&mut self, ctx: Context) {
        self.ctx = Some(ctx);
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.ctx.is_some()
    }

    /// Disconnect and drop the context, if any.
    pub(crate) async fn detach(&mut self) -> TransportResult<()> {
        match self.ctx.take() {
            Some(mut ctx) => ctx
                .disconnect()
                .await
                .map_err(|e| TransportError::Modbus(e.to_string())),
            None => Ok(()),
        }
    }

    fn ctx(&mut self) -> TransportResult<&mut Context> {
        self.ctx.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Drop the context after a timeout. The late reply is still in flight and
    /// would be matched against the next request.
    fn expire<T>(&mut self, result: TransportResult<T>) -> TransportResult<T> {
        if let Err(TransportError::Timeout(limit)) = &result {
            warn!("Modbus request timed out after {:?}, dropping session", limit);
            self.ctx = None;
        }
        result
    }

    pub(crate) async fn read_discrete_inputs(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        let timeout = self.timeout;
        let ctx = self.ctx()?;
        let result = with_timeout(timeout, async {
            flatten(ctx.read_discrete_inputs(address, quantity).await)
        })
        .await;
        let bits = self.expire(result)?;
        Ok(pack_bits(&bits))
    }

    pub(crate) async fn read_coils(&mut self, address: u16, quantity: u16) -> TransportResult<Vec<u8>> {
        let timeout = self.timeout;
        let ctx = self.ctx()?;
        let result =
            with_timeout(timeout, async { flatten(ctx.read_coils(address, quantity).await) })
                .await;
        let bits = self.expire(result)?;
        Ok(pack_bits(&bits))
    }

    pub(crate) async fn read_input_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        let timeout = self.timeout;
        let ctx = self.ctx()?;
        let result = with_timeout(timeout, async {
            flatten(ctx.read_input_registers(address, quantity).await)
        })
        .await;
        let registers = self.expire(result)?;
        Ok(registers_to_bytes(&registers))
    }

    pub(crate) async fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> TransportResult<Vec<u8>> {
        let timeout = self.timeout;
        let ctx = self.ctx()?;
        let result = with_timeout(timeout, async {
            flatten(ctx.read_holding_registers(address, quantity).await)
        })
        .await;
        let registers = self.expire(result)?;
        Ok(registers_to_bytes(&registers))
    }

    pub(crate) async fn write_multiple_coils(
        &mut self,
        address: u16,
        quantity: u16,
        value: &[u8],
    ) -> TransportResult<Vec<u8>> {
        let coils = unpack_bits(value, quantity)?;
        let timeout = self.timeout;
        let ctx = self.ctx()?;
        let result = with_timeout(timeout, async {
            flatten(ctx.write_multiple_coils(address, &coils).await)
        })
        .await;
        self.expire(result)?;
        Ok(write_echo(address, quantity))
    }

    pub(crate) async fn write_multiple_registers(
        &mut self,
        address: u16,
        quantity: u16,
        value: &[u8],
    ) -> TransportResult<Vec<u8>> {
        let registers = bytes_to_registers(value, quantity)?;
        let timeout = self.timeout;
        let ctx = self.ctx()?;
        let result = with_timeout(timeout, async {
            flatten(ctx.write_multiple_registers(address, &registers).await)
        })
        .await;
        self.expire(result)?;
        Ok(write_echo(address, quantity))
    }

    pub(crate) async fn write_single_register(
        &mut self,
        address: u16,
        value: u16,
    ) -> TransportResult<Vec<u8>> {
        let timeout = self.timeout;
        let ctx = self.ctx()?;
        let result = with_timeout(timeout, async {
            flatten(ctx.write_single_register(address, value).await)
        })
        .await;
        self.expire(result)?;
        Ok(write_echo(address, value))
    }
}

impl fmt::Debug for ContextSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSession")
            .field("connected", &self.ctx.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Collapse the transport and exception layers of a `tokio-modbus` result.
fn flatten<T>(result: tokio_modbus::Result<T>) -> TransportResult<T> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(exception)) => Err(TransportError::Exception(format!("{:?}", exception))),
        Err(e) => Err(TransportError::Modbus(e.to_string())),
    }
}
