//! Connection descriptor derivation.
//!
//! Device definitions carry their Modbus settings as loosely typed string
//! properties, keyed by protocol name:
//!
//! ```text
//! modbus-tcp:   Address, Port, UnitID
//! modbus-rtu:   Address, UnitID, BaudRate, DataBits, StopBits, Parity
//! modbus-ascii: Address, UnitID, BaudRate, DataBits, StopBits, Parity
//! ```
//!
//! [`create_connection_info`] turns such a map into a validated
//! [`ConnectionInfo`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::num::{IntErrorKind, ParseIntError};
use std::str::FromStr;
use thiserror::Error;

/// Protocol key for Modbus TCP properties.
pub const PROTOCOL_TCP: &str = "modbus-tcp";
/// Protocol key for Modbus RTU properties.
pub const PROTOCOL_RTU: &str = "modbus-rtu";
/// Protocol key for Modbus ASCII properties.
pub const PROTOCOL_ASCII: &str = "modbus-ascii";

pub const ADDRESS: &str = "Address";
pub const PORT: &str = "Port";
pub const UNIT_ID: &str = "UnitID";
pub const BAUD_RATE: &str = "BaudRate";
pub const DATA_BITS: &str = "DataBits";
pub const STOP_BITS: &str = "StopBits";
pub const PARITY: &str = "Parity";

/// Flat string properties of one protocol entry.
pub type ProtocolProperties = HashMap<String, String>;

/// Errors raised while deriving a [`ConnectionInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionInfoError {
    #[error("missing protocol configuration, expected one of modbus-tcp, modbus-rtu, modbus-ascii")]
    MissingProtocol,

    #[error("missing property '{property}' for protocol {protocol}")]
    MissingProperty {
        protocol: Protocol,
        property: &'static str,
    },

    #[error("invalid {property} '{value}': value out of range")]
    OutOfRange {
        property: &'static str,
        value: String,
    },

    #[error("invalid {property} '{value}': parse error: {reason}")]
    Parse {
        property: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid parity value, it should be N(None) or O(Odd) or E(Even), got '{0}'")]
    InvalidParity(String),
}

/// Modbus framing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Rtu,
    Ascii,
}

impl Protocol {
    /// Protocol key as it appears in device definitions.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => PROTOCOL_TCP,
            Protocol::Rtu => PROTOCOL_RTU,
            Protocol::Ascii => PROTOCOL_ASCII,
        }
    }

    /// Returns `true` for the serial-line variants.
    pub fn is_serial(&self) -> bool {
        matches!(self, Protocol::Rtu | Protocol::Ascii)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serial line parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parity {
    /// `N`
    None,
    /// `O`
    Odd,
    /// `E`
    Even,
}

impl Parity {
    pub fn as_char(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }
}

impl FromStr for Parity {
    type Err = ConnectionInfoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "N" => Ok(Parity::None),
            "O" => Ok(Parity::Odd),
            "E" => Ok(Parity::Even),
            other => Err(ConnectionInfoError::InvalidParity(other.to_string())),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Serial line parameters shared by RTU and ASCII.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u32,
    pub stop_bits: u32,
    pub parity: Parity,
}

impl Default for SerialSettings {
    /// 9600 baud, 8N1.
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

/// Validated connection descriptor for one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub protocol: Protocol,
    /// Host for TCP, serial device path (plus optional `,`-separated extras) otherwise.
    pub address: String,
    /// Only set for TCP.
    pub port: Option<u16>,
    pub unit_id: u8,
    /// Only set for RTU and ASCII.
    pub serial: Option<SerialSettings>,
}

impl ConnectionInfo {
    /// Serial device path without any trailing parameters.
    pub fn serial_path(&self) -> &str {
        self.address.split(',').next().unwrap_or_default()
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.port, self.serial) {
            (Some(port), _) => write!(
                f,
                "{} {}:{} unit {}",
                self.protocol, self.address, port, self.unit_id
            ),
            (None, Some(serial)) => write!(
                f,
                "{} {} {}-{}{}{} unit {}",
                self.protocol,
                self.serial_path(),
                serial.baud_rate,
                serial.data_bits,
                serial.parity,
                serial.stop_bits,
                self.unit_id
            ),
            (None, None) => write!(f, "{} {} unit {}", self.protocol, self.address, self.unit_id),
        }
    }
}

/// Build a [`ConnectionInfo`] from protocol-keyed string properties.
///
/// The first entry found in TCP, RTU, ASCII order is used; other entries are
/// ignored.
pub fn create_connection_info(
    protocols: &HashMap<String, ProtocolProperties>,
) -> Result<ConnectionInfo, ConnectionInfoError> {
    if let Some(props) = protocols.get(PROTOCOL_TCP) {
        return tcp_connection_info(props);
    }
    if let Some(props) = protocols.get(PROTOCOL_RTU) {
        return serial_connection_info(Protocol::Rtu, props);
    }
    if let Some(props) = protocols.get(PROTOCOL_ASCII) {
        return serial_connection_info(Protocol::Ascii, props);
    }
    Err(ConnectionInfoError::MissingProtocol)
}

fn tcp_connection_info(props: &ProtocolProperties) -> Result<ConnectionInfo, ConnectionInfoError> {
    let protocol = Protocol::Tcp;
    let address = required(protocol, props, ADDRESS)?.to_string();
    let port = parse_number::<u16>(PORT, required(protocol, props, PORT)?)?;
    let unit_id = parse_number::<u8>(UNIT_ID, required(protocol, props, UNIT_ID)?)?;

    Ok(ConnectionInfo {
        protocol,
        address,
        port: Some(port),
        unit_id,
        serial: None,
    })
}

fn serial_connection_info(
    protocol: Protocol,
    props: &ProtocolProperties,
) -> Result<ConnectionInfo, ConnectionInfoError> {
    let address = required(protocol, props, ADDRESS)?.to_string();
    let unit_id = parse_number::<u8>(UNIT_ID, required(protocol, props, UNIT_ID)?)?;
    let baud_rate = parse_number::<u32>(BAUD_RATE, required(protocol, props, BAUD_RATE)?)?;
    let data_bits = parse_number::<u32>(DATA_BITS, required(protocol, props, DATA_BITS)?)?;
    let stop_bits = parse_number::<u32>(STOP_BITS, required(protocol, props, STOP_BITS)?)?;
    let parity = required(protocol, props, PARITY)?.parse::<Parity>()?;

    Ok(ConnectionInfo {
        protocol,
        address,
        port: None,
        unit_id,
        serial: Some(SerialSettings {
            baud_rate,
            data_bits,
            stop_bits,
            parity,
        }),
    })
}

fn required<'a>(
    protocol: Protocol,
    props: &'a ProtocolProperties,
    property: &'static str,
) -> Result<&'a str, ConnectionInfoError> {
    props
        .get(property)
        .map(String::as_str)
        .ok_or(ConnectionInfoError::MissingProperty { protocol, property })
}

fn parse_number<T>(property: &'static str, value: &str) -> Result<T, ConnectionInfoError>
where
    T: FromStr<Err = ParseIntError>,
{
    value.parse::<T>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => ConnectionInfoError::OutOfRange {
            property,
            value: value.to_string(),
        },
        _ => ConnectionInfoError::Parse {
            property,
            value: value.to_string(),
            reason: e.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> ProtocolProperties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn single(protocol: &str, pairs: &[(&str, &str)]) -> HashMap<String, ProtocolProperties> {
        HashMap::from([(protocol.to_string(), props(pairs))])
    }

    fn rtu_props(unit_id: &str, parity: &str) -> Vec<(&'static str, String)> {
        vec![
            (ADDRESS, "/dev/USB0tty".to_string()),
            (UNIT_ID, unit_id.to_string()),
            (BAUD_RATE, "19200".to_string()),
            (DATA_BITS, "8".to_string()),
            (STOP_BITS, "1".to_string()),
            (PARITY, parity.to_string()),
        ]
    }

    fn rtu(unit_id: &str, parity: &str) -> HashMap<String, ProtocolProperties> {
        let pairs = rtu_props(unit_id, parity);
        let pairs: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        single(PROTOCOL_RTU, &pairs)
    }

    #[test]
    fn test_ascii_data_bits_7() {
        let protocols = single(
            PROTOCOL_ASCII,
            &[
                (ADDRESS, "/dev/USB0tty"),
                (UNIT_ID, "255"),
                (BAUD_RATE, "19200"),
                (DATA_BITS, "7"),
                (STOP_BITS, "1"),
                (PARITY, "N"),
            ],
        );

        let info = create_connection_info(&protocols).unwrap();

        assert_eq!(info.protocol, Protocol::Ascii);
        assert_eq!(info.address, "/dev/USB0tty");
        assert_eq!(info.unit_id, 255);
        assert_eq!(info.port, None);
        assert_eq!(
            info.serial,
            Some(SerialSettings {
                baud_rate: 19200,
                data_bits: 7,
                stop_bits: 1,
                parity: Parity::None,
            })
        );
    }

    #[test]
    fn test_rtu_unit_id_255() {
        let info = create_connection_info(&rtu("255", "N")).unwrap();

        assert_eq!(info.protocol, Protocol::Rtu);
        assert_eq!(info.unit_id, 255);
        let serial = info.serial.unwrap();
        assert_eq!(serial.baud_rate, 19200);
        assert_eq!(serial.data_bits, 8);
        assert_eq!(serial.stop_bits, 1);
        assert_eq!(serial.parity, Parity::None);
    }

    #[test]
    fn test_rtu_unit_id_0_is_valid() {
        let info = create_connection_info(&rtu("0", "N")).unwrap();
        assert_eq!(info.unit_id, 0);
    }

    #[test]
    fn test_rtu_unit_id_out_of_range() {
        let err = create_connection_info(&rtu("256", "N")).unwrap_err();

        assert!(matches!(err, ConnectionInfoError::OutOfRange { property: UNIT_ID, .. }));
        assert!(err.to_string().contains("value out of range"));
    }

    #[test]
    fn test_rtu_all_parities() {
        for (raw, parity) in [("N", Parity::None), ("O", Parity::Odd), ("E", Parity::Even)] {
            let info = create_connection_info(&rtu("1", raw)).unwrap();
            assert_eq!(info.serial.unwrap().parity, parity);
        }
    }

    #[test]
    fn test_invalid_parity() {
        let err = create_connection_info(&rtu("1", "invalid-parity")).unwrap_err();

        assert_eq!(
            err,
            ConnectionInfoError::InvalidParity("invalid-parity".to_string())
        );
        assert!(
            err.to_string()
                .contains("invalid parity value, it should be N(None) or O(Odd) or E(Even)")
        );
    }

    #[test]
    fn test_parity_is_case_sensitive() {
        let err = create_connection_info(&rtu("1", "n")).unwrap_err();
        assert!(matches!(err, ConnectionInfoError::InvalidParity(_)));
    }

    #[test]
    fn test_tcp() {
        let protocols = single(
            PROTOCOL_TCP,
            &[(ADDRESS, "0.0.0.0"), (PORT, "502"), (UNIT_ID, "255")],
        );

        let info = create_connection_info(&protocols).unwrap();

        assert_eq!(info.protocol, Protocol::Tcp);
        assert_eq!(info.address, "0.0.0.0");
        assert_eq!(info.port, Some(502));
        assert_eq!(info.unit_id, 255);
        assert_eq!(info.serial, None);
    }

    #[test]
    fn test_tcp_unit_id_out_of_range() {
        let protocols = single(
            PROTOCOL_TCP,
            &[(ADDRESS, "0.0.0.0"), (PORT, "502"), (UNIT_ID, "256")],
        );

        let err = create_connection_info(&protocols).unwrap_err();
        assert!(err.to_string().contains("value out of range"));
    }

    #[test]
    fn test_tcp_port_out_of_range() {
        let protocols = single(
            PROTOCOL_TCP,
            &[(ADDRESS, "0.0.0.0"), (PORT, "65536"), (UNIT_ID, "1")],
        );

        let err = create_connection_info(&protocols).unwrap_err();

        assert!(matches!(err, ConnectionInfoError::OutOfRange { property: PORT, .. }));
        assert!(err.to_string().contains("value out of range"));
    }

    #[test]
    fn test_non_numeric_is_parse_error() {
        let protocols = single(
            PROTOCOL_TCP,
            &[(ADDRESS, "0.0.0.0"), (PORT, "modbus"), (UNIT_ID, "1")],
        );

        let err = create_connection_info(&protocols).unwrap_err();
        assert!(matches!(err, ConnectionInfoError::Parse { property: PORT, .. }));

        let mut protocols = rtu("1", "N");
        protocols
            .get_mut(PROTOCOL_RTU)
            .unwrap()
            .insert(BAUD_RATE.to_string(), "fast".to_string());
        let err = create_connection_info(&protocols).unwrap_err();
        assert!(matches!(err, ConnectionInfoError::Parse { property: BAUD_RATE, .. }));
    }

    #[test]
    fn test_serial_bits_have_no_builder_ceiling() {
        let mut protocols = rtu("1", "N");
        let props = protocols.get_mut(PROTOCOL_RTU).unwrap();
        props.insert(DATA_BITS.to_string(), "256".to_string());
        props.insert(STOP_BITS.to_string(), "3".to_string());

        // Line limits are checked when the port is opened.
        let serial = create_connection_info(&protocols).unwrap().serial.unwrap();
        assert_eq!(serial.data_bits, 256);
        assert_eq!(serial.stop_bits, 3);

        protocols
            .get_mut(PROTOCOL_RTU)
            .unwrap()
            .insert(DATA_BITS.to_string(), "eight".to_string());
        let err = create_connection_info(&protocols).unwrap_err();
        assert!(matches!(err, ConnectionInfoError::Parse { property: DATA_BITS, .. }));
    }

    #[test]
    fn test_missing_protocol() {
        let protocols = single("other", &[(ADDRESS, "0.0.0.0")]);
        let err = create_connection_info(&protocols).unwrap_err();

        assert_eq!(err, ConnectionInfoError::MissingProtocol);
        assert!(err.to_string().contains("missing protocol configuration"));
        assert_eq!(
            create_connection_info(&HashMap::new()),
            Err(ConnectionInfoError::MissingProtocol)
        );
    }

    #[test]
    fn test_missing_property() {
        let protocols = single(PROTOCOL_TCP, &[(ADDRESS, "0.0.0.0"), (UNIT_ID, "1")]);

        let err = create_connection_info(&protocols).unwrap_err();
        assert_eq!(
            err,
            ConnectionInfoError::MissingProperty {
                protocol: Protocol::Tcp,
                property: PORT,
            }
        );
    }

    #[test]
    fn test_tcp_takes_priority() {
        let mut protocols = rtu("1", "N");
        protocols.insert(
            PROTOCOL_TCP.to_string(),
            props(&[(ADDRESS, "10.0.0.1"), (PORT, "1502"), (UNIT_ID, "3")]),
        );

        let info = create_connection_info(&protocols).unwrap();
        assert_eq!(info.protocol, Protocol::Tcp);
        assert_eq!(info.port, Some(1502));
    }

    #[test]
    fn test_rtu_takes_priority_over_ascii() {
        let mut protocols = rtu("1", "N");
        let ascii = protocols[PROTOCOL_RTU].clone();
        protocols.insert(PROTOCOL_ASCII.to_string(), ascii);

        let info = create_connection_info(&protocols).unwrap();
        assert_eq!(info.protocol, Protocol::Rtu);
    }

    #[test]
    fn test_idempotent() {
        let protocols = rtu("17", "E");
        assert_eq!(
            create_connection_info(&protocols),
            create_connection_info(&protocols)
        );
    }

    #[test]
    fn test_serial_path_strips_parameters() {
        let mut protocols = rtu("1", "N");
        protocols
            .get_mut(PROTOCOL_RTU)
            .unwrap()
            .insert(ADDRESS.to_string(), "/dev/ttyS0,19200,8,1,N".to_string());

        let info = create_connection_info(&protocols).unwrap();
        assert_eq!(info.address, "/dev/ttyS0,19200,8,1,N");
        assert_eq!(info.serial_path(), "/dev/ttyS0");
    }

    #[test]
    fn test_display() {
        let info = create_connection_info(&rtu("9", "E")).unwrap();
        assert_eq!(info.to_string(), "modbus-rtu /dev/USB0tty 19200-8E1 unit 9");
    }
}
