//! Modbus device connectivity.
//!
//! Turns the loosely typed protocol properties of a device definition into a
//! validated [`ConnectionInfo`], and wraps one transport session (TCP, RTU or
//! ASCII) behind [`ModbusClient`] for register and coil access.
//!
//! ```ignore
//! let info = create_connection_info(&device.protocols)?;
//! let mut client = ModbusClient::new(&info)?;
//! client.open_connection().await?;
//! let command = CommandInfo::new("HOLDING_REGISTERS".parse()?, 40, 2);
//! let bytes = client.get_value(&command).await?;
//! client.close_connection().await?;
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod transport;

pub use client::ModbusClient;
pub use command::{CommandError, CommandInfo, PrimaryTable};
pub use connection::{
    ConnectionInfo, ConnectionInfoError, Parity, Protocol, ProtocolProperties, SerialSettings,
    create_connection_info,
};
pub use transport::{ConnectionHandle, ModbusTransport, TransportError, TransportOptions};
