//! S7comm protocol definitions.
//!
//! Constants and small value types shared by the codec layers:
//! - S7 header identifiers and function codes
//! - TPKT / COTP framing constants (RFC 1006 / ISO 8073)
//! - memory area and transport size enumerations
//!
//! The frame builders and parsers live in the `iso` and `pdu` modules.

use crate::error::S7Error;

/// S7 protocol identifier, first byte of every S7 header.
pub const S7_PROTOCOL_ID: u8 = 0x32;

/// S7 PDU type: job request (client to PLC).
pub const S7_PDU_TYPE_REQUEST: u8 = 0x01;
/// S7 PDU type: acknowledgement with data (PLC to client).
pub const S7_PDU_TYPE_RESPONSE: u8 = 0x03;

/// Function code: Setup Communication.
pub const S7_FUNC_SETUP_COMM: u8 = 0xF0;
/// Function code: Read Var.
pub const S7_FUNC_READ_VAR: u8 = 0x04;
/// Function code: Write Var.
pub const S7_FUNC_WRITE_VAR: u8 = 0x05;

/// Variable specification type used in Read/Write Var item descriptors.
pub const S7_SPEC_TYPE_VAR: u8 = 0x12;
/// Length of the addressing part following the spec type byte.
pub const S7_SPEC_LENGTH: u8 = 0x0A;
/// Syntax id for S7-Any addressing.
pub const S7_SYNTAX_ID_S7ANY: u8 = 0x10;

/// Item return code signalling success.
pub const S7_RET_SUCCESS: u8 = 0xFF;

/// Data-section transport class for a single bit (length counted in bits).
pub const S7_TS_RES_BIT: u8 = 0x03;
/// Data-section transport class for byte/word data (length counted in bits).
pub const S7_TS_RES_BYTE: u8 = 0x04;

/// S7 request header length (no error fields).
pub const S7_REQ_HEADER_LEN: usize = 10;
/// S7 response header length (includes error class + error code).
pub const S7_RES_HEADER_LEN: usize = 12;
/// Fixed size of one Read/Write Var item descriptor in the parameter section.
pub const S7_ITEM_SPEC_LEN: usize = 12;

/// TPKT version byte (RFC 1006).
pub const TPKT_VERSION: u8 = 0x03;
/// TPKT header length in bytes.
pub const TPKT_HEADER_LEN: usize = 4;

/// COTP TPDU code: Connection Request.
pub const COTP_CR: u8 = 0xE0;
/// COTP TPDU code: Connection Confirm.
pub const COTP_CC: u8 = 0xD0;
/// COTP TPDU code: Data.
pub const COTP_DT: u8 = 0xF0;
/// End-of-transmission flag set on the last (and, here, only) Data TPDU.
pub const COTP_EOT: u8 = 0x80;
/// COTP Data TPDU header length (length indicator + code byte).
pub const COTP_DT_HEADER_LEN: usize = 2;

/// COTP CR/CC parameter code: proposed maximum TPDU size.
pub const COTP_PARAM_TPDU_SIZE: u8 = 0xC0;
/// COTP CR/CC parameter code: calling (source) TSAP.
pub const COTP_PARAM_SRC_TSAP: u8 = 0xC1;
/// COTP CR/CC parameter code: called (destination) TSAP.
pub const COTP_PARAM_DST_TSAP: u8 = 0xC2;

/// Proposed TPDU size exponent (2^10 = 1024 bytes).
pub const COTP_TPDU_SIZE_1024: u8 = 0x0A;

/// Local TSAP used by S7 clients.
pub const S7_LOCAL_TSAP: u16 = 0x0100;

/// Connection type: programming device (default).
pub const CT_PG: u16 = 0x0001;
/// Connection type: operator panel / HMI.
pub const CT_OP: u16 = 0x0002;
/// Connection type: generic S7 basic communication.
pub const CT_S7: u16 = 0x0003;

/// Standard S7comm TCP port.
pub const S7_PORT: u16 = 102;

/// PDU size proposed to the device when the caller does not override it.
pub const DEFAULT_PDU_SIZE: u16 = 960;
/// Default calling/called max AMQ (outstanding request limit).
pub const DEFAULT_MAX_AMQ: u16 = 1;

/// PLC memory area selector, as carried in the item descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    /// Process inputs (I / E), area byte 0x81.
    Input,
    /// Process outputs (Q / A), area byte 0x82.
    Output,
    /// Flag memory (M), area byte 0x83.
    Marker,
    /// Data blocks (DB), area byte 0x84. Carries a 2-byte block number.
    DataBlock,
}

impl MemoryArea {
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Input => 0x81,
            Self::Output => 0x82,
            Self::Marker => 0x83,
            Self::DataBlock => 0x84,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, S7Error> {
        match b {
            0x81 => Ok(Self::Input),
            0x82 => Ok(Self::Output),
            0x83 => Ok(Self::Marker),
            0x84 => Ok(Self::DataBlock),
            other => Err(S7Error::InvalidAddress(format!(
                "unknown area byte: 0x{other:02X}"
            ))),
        }
    }
}

/// Transport size of one addressed element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TransportSize {
    Bit,
    #[default]
    Byte,
    Word,
    DWord,
}

impl TransportSize {
    /// Transport size byte used in the Read/Write Var item descriptor.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Bit => 0x01,
            Self::Byte => 0x02,
            Self::Word => 0x04,
            Self::DWord => 0x06,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, S7Error> {
        match b {
            0x01 => Ok(Self::Bit),
            0x02 => Ok(Self::Byte),
            0x04 => Ok(Self::Word),
            0x06 => Ok(Self::DWord),
            other => Err(S7Error::Protocol(format!(
                "unknown transport size byte: 0x{other:02X}"
            ))),
        }
    }

    /// Width in bytes of one element of this size on the wire.
    #[must_use]
    pub const fn width_bytes(self) -> usize {
        match self {
            Self::Bit | Self::Byte => 1,
            Self::Word => 2,
            Self::DWord => 4,
        }
    }
}
