//! Register map and value types of the QIPU intelligent grating.
//!
//! Every value that crosses the Modbus boundary has a dedicated type here.
//! The types know their register address, how many registers they occupy
//! and how to convert themselves from and to raw register words. Protocol
//! level integers (parity codes, baud rate divisors, the reset magic) never
//! leave this module.
//!
//! The configuration registers follow the `0xFFF1..=0xFFF4` layout of the
//! current firmware lineage.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// Errors raised while validating or decoding protocol values.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The Modbus unit address is outside of the unicast range.
    #[error("The address value {0} is outside the valid range of {min} to {max}", min = Address::MIN, max = Address::MAX)]
    AddressOutOfRange(u8),

    /// The baud rate cannot be encoded into the baud rate register.
    #[error("The baud rate {0} cannot be encoded, it must lie between {min} and {max}", min = BaudRate::MIN, max = BaudRate::MAX)]
    BaudRateOutOfRange(u32),

    /// The number of light points does not fit a single register read.
    #[error("The beam count {0} is outside the valid range of {min} to {max}", min = BeamCount::MIN, max = BeamCount::MAX)]
    BeamCountOutOfRange(u16),

    /// The device answered with a different number of registers than requested.
    #[error("Expected {expected} registers but the device returned {actual}")]
    UnexpectedRegisterCount { expected: u16, actual: usize },

    /// The parity could not be parsed from a string.
    #[error("Unknown parity '{0}', expected one of N, O or E")]
    ParityParse(String),
}

type Result<T> = std::result::Result<T, Error>;

fn check_register_count(words: &[u16], expected: u16) -> Result<()> {
    if words.len() == expected as usize {
        Ok(())
    } else {
        Err(Error::UnexpectedRegisterCount {
            expected,
            actual: words.len(),
        })
    }
}

/// The Modbus unit address of a grating.
///
/// The factory default is `0x0F`. `0x00` is the broadcast address, every
/// device on the bus executes a request sent to it without answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct Address(u8);

impl Address {
    /// Register holding the device address.
    pub const ADDRESS: u16 = 0xFFF1;
    /// Smallest assignable unicast address.
    pub const MIN: u8 = 1;
    /// Largest assignable unicast address.
    pub const MAX: u8 = 247;
    /// The broadcast address.
    pub const BROADCAST: Address = Address(0x00);

    /// Encodes the address for the address register.
    pub fn encode_for_write_register(&self) -> u16 {
        self.0 as u16
    }

    /// `true` if this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl Deref for Address {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for Address {
    fn default() -> Self {
        Self(0x0F)
    }
}

impl TryFrom<u8> for Address {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::AddressOutOfRange(value))
        }
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> u8 {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Serial bit rate of the device.
///
/// The device stores the rate divided by 100, so `115200` is written as
/// `1152`. Rates below 100 baud, or whose divisor exceeds 16 bits, cannot be
/// represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u32", into = "u32"))]
pub struct BaudRate(u32);

impl BaudRate {
    /// Register holding the baud rate divisor.
    pub const ADDRESS: u16 = 0xFFF2;
    pub const MIN: u32 = 100;
    pub const MAX: u32 = u16::MAX as u32 * 100 + 99;

    pub const B9600: BaudRate = BaudRate(9600);
    pub const B19200: BaudRate = BaudRate(19200);
    pub const B38400: BaudRate = BaudRate(38400);
    pub const B57600: BaudRate = BaudRate(57600);
    pub const B115200: BaudRate = BaudRate(115200);

    /// Encodes the rate for the baud rate register (`baud / 100`).
    pub fn encode_for_write_register(&self) -> u16 {
        (self.0 / 100) as u16
    }
}

impl Deref for BaudRate {
    type Target = u32;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        Self::B19200
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::BaudRateOutOfRange(value))
        }
    }
}

impl From<BaudRate> for u32 {
    fn from(baud_rate: BaudRate) -> u32 {
        baud_rate.0
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parity of the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Parity {
    None,
    Odd,
    #[default]
    Even,
}

impl Parity {
    /// Register holding the parity mode.
    pub const ADDRESS: u16 = 0xFFF3;

    /// Encodes the parity for the parity register.
    pub fn encode_for_write_register(&self) -> u16 {
        match self {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
        }
    }
}

impl FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "n" | "none" => Ok(Parity::None),
            "o" | "odd" => Ok(Parity::Odd),
            "e" | "even" => Ok(Parity::Even),
            _ => Err(Error::ParityParse(s.to_string())),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Parity::None => "N",
            Parity::Odd => "O",
            Parity::Even => "E",
        };
        f.write_str(name)
    }
}

/// Command restoring the factory configuration of every device on the bus.
#[derive(Debug, Clone, Copy)]
pub struct FactoryReset;

impl FactoryReset {
    pub const ADDRESS: u16 = 0xFFF4;
    const MAGIC: u16 = 0x1111;

    /// The factory reset is always sent to the broadcast address.
    pub const UNIT: Address = Address::BROADCAST;

    pub fn encode_for_write_register() -> u16 {
        Self::MAGIC
    }
}

/// Index of the lowest blocked beam.
#[derive(Debug, Clone, Copy)]
pub struct LowestBlocked;

impl LowestBlocked {
    pub const ADDRESS: u16 = 0x0040;
    pub const QUANTITY: u16 = 1;

    pub fn decode_from_holding_registers(words: &[u16]) -> Result<u16> {
        check_register_count(words, Self::QUANTITY)?;
        Ok(words[0])
    }
}

/// Index of the highest blocked beam.
#[derive(Debug, Clone, Copy)]
pub struct HighestBlocked;

impl HighestBlocked {
    pub const ADDRESS: u16 = 0x0041;
    pub const QUANTITY: u16 = 1;

    pub fn decode_from_holding_registers(words: &[u16]) -> Result<u16> {
        check_register_count(words, Self::QUANTITY)?;
        Ok(words[0])
    }
}

/// Number of blocked beams.
#[derive(Debug, Clone, Copy)]
pub struct BlockedQuantity;

impl BlockedQuantity {
    pub const ADDRESS: u16 = 0x0042;
    pub const QUANTITY: u16 = 1;

    pub fn decode_from_holding_registers(words: &[u16]) -> Result<u16> {
        check_register_count(words, Self::QUANTITY)?;
        Ok(words[0])
    }
}

/// Number of light points of a grating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u16", into = "u16"))]
pub struct BeamCount(u16);

impl BeamCount {
    pub const MIN: u16 = 1;
    /// 125 registers, the most a single read holding registers request can carry.
    pub const MAX: u16 = 125 * BeamStatus::BEAMS_PER_REGISTER;

    /// Number of status registers covering all beams.
    pub fn registers_needed(&self) -> u16 {
        self.0.div_ceil(BeamStatus::BEAMS_PER_REGISTER)
    }
}

impl Deref for BeamCount {
    type Target = u16;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for BeamCount {
    fn default() -> Self {
        Self(80)
    }
}

impl TryFrom<u16> for BeamCount {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::BeamCountOutOfRange(value))
        }
    }
}

impl From<BeamCount> for u16 {
    fn from(count: BeamCount) -> u16 {
        count.0
    }
}

impl fmt::Display for BeamCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blocked/clear state of every beam, ordered from beam 0 upwards.
///
/// `true` means the beam is blocked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BeamStatus(Vec<bool>);

impl BeamStatus {
    /// Base register of the packed status bits.
    pub const ADDRESS: u16 = 0x0000;
    pub const BEAMS_PER_REGISTER: u16 = 16;

    /// Unpacks the status registers into one flag per beam.
    ///
    /// The device transmits each status register with its bytes swapped.
    /// After swapping back, bit `n` (LSB first) of register `i` is beam
    /// `i * 16 + n`. Bits past `count` are padding and dropped.
    ///
    /// The byte order has only been validated against the swapped firmware;
    /// older units packed the bits without swapping.
    pub fn decode_from_holding_registers(words: &[u16], count: BeamCount) -> Result<Self> {
        check_register_count(words, count.registers_needed())?;
        let beams = words
            .iter()
            .map(|word| word.swap_bytes())
            .flat_map(|word| (0..Self::BEAMS_PER_REGISTER).map(move |bit| (word >> bit) & 1 == 1))
            .take(*count as usize)
            .collect();
        Ok(Self(beams))
    }

    /// `true` if the beam at `index` is blocked. Out of range beams are clear.
    pub fn is_blocked(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    /// Indices of all blocked beams in ascending order.
    pub fn blocked_beams(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(index, blocked)| blocked.then_some(index))
    }

    pub fn blocked_count(&self) -> usize {
        self.0.iter().filter(|blocked| **blocked).count()
    }

    /// The status as `1` (blocked) and `0` (clear) values.
    pub fn to_bits(&self) -> Vec<u8> {
        self.0.iter().map(|blocked| *blocked as u8).collect()
    }
}

impl Deref for BeamStatus {
    type Target = [bool];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<BeamStatus> for Vec<bool> {
    fn from(status: BeamStatus) -> Self {
        status.0
    }
}

impl fmt::Display for BeamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for blocked in &self.0 {
            f.write_str(if *blocked { "1" } else { "0" })?;
        }
        Ok(())
    }
}
