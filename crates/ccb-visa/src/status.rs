// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! IEEE 488.2 status registers.
//!
//! ```text
//! Status byte (*STB?)               Standard event status (*ESR?)
//!   bit 7  OPER  operation status     bit 7  PON  power on
//!   bit 6  RQS   request service      bit 6  URQ  user request
//!   bit 5  ESB   event summary  ───>  bit 5  CME  command error
//!   bit 4  MAV   message available    bit 4  EXE  execution error
//!   bit 3  QUES  questionable         bit 3  DDE  device dependent error
//!   bit 2  EAV   error queue          bit 2  QYE  query error
//!   bit 1        device specific      bit 1  RQC  request control
//!   bit 0        device specific      bit 0  OPC  operation complete
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Parses a register value as returned by `*STB?` / `*ESR?`.
///
/// Instruments answer with an integer, some with a `+` sign or a trailing
/// `.0`.
fn parse_register(s: &str) -> Option<u8> {
    let s = s.trim().trim_start_matches('+');
    let s = s.strip_suffix(".0").unwrap_or(s);
    s.parse::<u16>().ok().and_then(|v| u8::try_from(v).ok())
}

fn write_flags(f: &mut fmt::Formatter<'_>, bits: u8, names: &[(u8, &str)]) -> fmt::Result {
    write!(f, "0x{bits:02X}")?;
    let set: Vec<&str> = names
        .iter()
        .filter(|(mask, _)| bits & mask != 0)
        .map(|(_, name)| *name)
        .collect();
    if !set.is_empty() {
        write!(f, " [{}]", set.join("|"))?;
    }
    Ok(())
}

// =============================================================================
// StatusByte
// =============================================================================

/// Decoded status byte of a serial poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusByte(pub u8);

impl StatusByte {
    /// Error/event queue not empty.
    pub const EAV: u8 = 0x04;
    /// Questionable status summary.
    pub const QUES: u8 = 0x08;
    /// Message available in the output queue.
    pub const MAV: u8 = 0x10;
    /// Standard event status summary.
    pub const ESB: u8 = 0x20;
    /// Request service / master summary status.
    pub const RQS: u8 = 0x40;
    /// Operation status summary.
    pub const OPER: u8 = 0x80;

    const NAMES: [(u8, &'static str); 6] = [
        (Self::OPER, "OPER"),
        (Self::RQS, "RQS"),
        (Self::ESB, "ESB"),
        (Self::MAV, "MAV"),
        (Self::QUES, "QUES"),
        (Self::EAV, "EAV"),
    ];

    /// Raw register value.
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Returns `true` if all bits of `mask` are set.
    pub const fn contains(&self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    /// A message is waiting to be read.
    pub const fn message_available(&self) -> bool {
        self.contains(Self::MAV)
    }

    /// A standard event is pending; read `*ESR?` for details.
    pub const fn event_summary(&self) -> bool {
        self.contains(Self::ESB)
    }

    /// The instrument requests service.
    pub const fn request_service(&self) -> bool {
        self.contains(Self::RQS)
    }

    /// The error queue is not empty.
    pub const fn error_available(&self) -> bool {
        self.contains(Self::EAV)
    }

    /// Questionable status summary is set.
    pub const fn questionable(&self) -> bool {
        self.contains(Self::QUES)
    }

    /// Operation status summary is set.
    pub const fn operation(&self) -> bool {
        self.contains(Self::OPER)
    }
}

impl FromStr for StatusByte {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_register(s)
            .map(Self)
            .ok_or_else(|| format!("'{s}' is not a status byte"))
    }
}

impl fmt::Display for StatusByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flags(f, self.0, &Self::NAMES)
    }
}

// =============================================================================
// EventStatus
// =============================================================================

/// Decoded standard event status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventStatus(pub u8);

impl EventStatus {
    /// Operation complete.
    pub const OPC: u8 = 0x01;
    /// Request control.
    pub const RQC: u8 = 0x02;
    /// Query error.
    pub const QYE: u8 = 0x04;
    /// Device dependent error.
    pub const DDE: u8 = 0x08;
    /// Execution error.
    pub const EXE: u8 = 0x10;
    /// Command error.
    pub const CME: u8 = 0x20;
    /// User request.
    pub const URQ: u8 = 0x40;
    /// Power on.
    pub const PON: u8 = 0x80;

    const ERRORS: u8 = Self::QYE | Self::DDE | Self::EXE | Self::CME;

    const NAMES: [(u8, &'static str); 8] = [
        (Self::PON, "PON"),
        (Self::URQ, "URQ"),
        (Self::CME, "CME"),
        (Self::EXE, "EXE"),
        (Self::DDE, "DDE"),
        (Self::QYE, "QYE"),
        (Self::RQC, "RQC"),
        (Self::OPC, "OPC"),
    ];

    /// Raw register value.
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Returns `true` if all bits of `mask` are set.
    pub const fn contains(&self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    /// Operation complete.
    pub const fn operation_complete(&self) -> bool {
        self.contains(Self::OPC)
    }

    /// Any of the query, device, execution or command error bits is set.
    pub const fn has_error(&self) -> bool {
        self.0 & Self::ERRORS != 0
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_register(s)
            .map(Self)
            .ok_or_else(|| format!("'{s}' is not an event status register"))
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_flags(f, self.0, &Self::NAMES)
    }
}
