//! Register-range command descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Command descriptor errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unsupported primary table '{0}'")]
    UnsupportedTable(String),
}

/// Modbus addressing space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimaryTable {
    /// Discrete input contacts (read-only, 1-bit)
    #[serde(rename = "DISCRETES_INPUT", alias = "discrete")]
    DiscreteInputs,
    /// Discrete output coils (read/write, 1-bit)
    #[serde(alias = "coil")]
    Coils,
    /// Input registers (read-only, 16-bit)
    #[serde(alias = "input")]
    InputRegisters,
    /// Holding registers (read/write, 16-bit)
    #[serde(alias = "holding")]
    HoldingRegisters,
}

impl PrimaryTable {
    /// Return the canonical name for this table.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryTable::DiscreteInputs => "DISCRETES_INPUT",
            PrimaryTable::Coils => "COILS",
            PrimaryTable::InputRegisters => "INPUT_REGISTERS",
            PrimaryTable::HoldingRegisters => "HOLDING_REGISTERS",
        }
    }

    /// Returns `true` for the 1-bit tables.
    pub fn is_bit_table(&self) -> bool {
        matches!(self, PrimaryTable::DiscreteInputs | PrimaryTable::Coils)
    }
}

impl FromStr for PrimaryTable {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DISCRETES_INPUT" | "discrete" => Ok(PrimaryTable::DiscreteInputs),
            "COILS" | "coil" => Ok(PrimaryTable::Coils),
            "INPUT_REGISTERS" | "input" => Ok(PrimaryTable::InputRegisters),
            "HOLDING_REGISTERS" | "holding" => Ok(PrimaryTable::HoldingRegisters),
            other => Err(CommandError::UnsupportedTable(other.to_string())),
        }
    }
}

impl fmt::Display for PrimaryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A register or bit range on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandInfo {
    pub primary_table: PrimaryTable,
    /// Starting address (0-based)
    pub starting_address: u16,
    /// Number of registers or bits
    pub length: u16,
}

impl CommandInfo {
    pub fn new(primary_table: PrimaryTable, starting_address: u16, length: u16) -> Self {
        Self {
            primary_table,
            starting_address,
            length,
        }
    }
}

impl fmt::Display for CommandInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} x{}",
            self.primary_table, self.starting_address, self.length
        )
    }
}
