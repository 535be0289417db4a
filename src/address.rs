//! PLC memory addressing model.
//!
//! A `MemoryAddress` is an immutable descriptor of one addressable run of
//! elements in a PLC memory area: area, optional data-block number, byte
//! offset, bit offset and transport size, plus the element count requested
//! by a read or written by a write.
//!
//! On the wire the start address is packed as `byte_offset * 8 + bit_offset`
//! into three big-endian bytes; the byte offset itself is limited to 21 bits
//! so the packed value fits. `pack_wire_address` / `unpack_wire_address` are
//! the pure helpers for that arithmetic, used by the PDU codec.

use crate::error::S7Error;
use crate::s7_define::{MemoryArea, TransportSize};

/// Maximum representable byte offset (exclusive): 21-bit field.
pub const MAX_BYTE_OFFSET: u32 = 1 << 21;

/// Immutable descriptor of a memory location and element count.
///
/// Build with the area constructors and refine with the `with_*` methods:
///
/// ```
/// use s7comm::address::MemoryAddress;
///
/// // QB0, 4 bytes
/// let run = MemoryAddress::output(0).with_count(4);
/// // DB100.DBX2.5
/// let flag = MemoryAddress::data_block(100, 2).bit(5).unwrap();
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryAddress {
    pub area: MemoryArea,
    /// Data-block number; 0 for non-DB areas.
    pub db_number: u16,
    pub byte_offset: u32,
    /// Meaningful only when `size` is `TransportSize::Bit`.
    pub bit_offset: u8,
    pub size: TransportSize,
    /// Number of elements of `size` to read or write.
    pub count: u16,
}

impl MemoryAddress {
    #[must_use]
    pub const fn input(byte_offset: u32) -> Self {
        Self::new(MemoryArea::Input, 0, byte_offset)
    }

    #[must_use]
    pub const fn output(byte_offset: u32) -> Self {
        Self::new(MemoryArea::Output, 0, byte_offset)
    }

    #[must_use]
    pub const fn marker(byte_offset: u32) -> Self {
        Self::new(MemoryArea::Marker, 0, byte_offset)
    }

    #[must_use]
    pub const fn data_block(db_number: u16, byte_offset: u32) -> Self {
        Self::new(MemoryArea::DataBlock, db_number, byte_offset)
    }

    const fn new(area: MemoryArea, db_number: u16, byte_offset: u32) -> Self {
        Self {
            area,
            db_number,
            byte_offset,
            bit_offset: 0,
            size: TransportSize::Byte,
            count: 1,
        }
    }

    /// Narrow the address to a single bit inside the byte.
    pub fn bit(mut self, bit_offset: u8) -> Result<Self, S7Error> {
        if bit_offset > 7 {
            return Err(S7Error::InvalidAddress(format!(
                "bit offset out of range: {bit_offset}"
            )));
        }
        self.bit_offset = bit_offset;
        self.size = TransportSize::Bit;
        Ok(self)
    }

    #[must_use]
    pub const fn with_size(mut self, size: TransportSize) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub const fn with_count(mut self, count: u16) -> Self {
        self.count = count;
        self
    }

    /// Validate the field-width invariants before any bytes are built.
    pub fn validate(&self) -> Result<(), S7Error> {
        if self.byte_offset >= MAX_BYTE_OFFSET {
            return Err(S7Error::InvalidAddress(format!(
                "byte offset {} exceeds 21-bit field",
                self.byte_offset
            )));
        }
        if self.bit_offset > 7 {
            return Err(S7Error::InvalidAddress(format!(
                "bit offset out of range: {}",
                self.bit_offset
            )));
        }
        if self.bit_offset != 0 && self.size != TransportSize::Bit {
            return Err(S7Error::InvalidAddress(
                "bit offset is only meaningful for bit transport size".into(),
            ));
        }
        if self.count == 0 {
            return Err(S7Error::InvalidAddress("element count must be > 0".into()));
        }
        if self.size == TransportSize::Bit && self.count != 1 {
            return Err(S7Error::InvalidAddress(
                "bit access addresses exactly one element".into(),
            ));
        }
        if self.area != MemoryArea::DataBlock && self.db_number != 0 {
            return Err(S7Error::InvalidAddress(
                "db number is only meaningful for the data-block area".into(),
            ));
        }
        Ok(())
    }

    /// The 3-byte packed start address for the item descriptor.
    pub fn wire_address(&self) -> Result<[u8; 3], S7Error> {
        self.validate()?;
        Ok(pack_wire_address(self.byte_offset, self.bit_offset))
    }

    /// Total payload bytes this address covers (`count` elements).
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.size.width_bytes() * usize::from(self.count)
    }
}

/// Pack a byte/bit offset pair into the 3-byte big-endian wire address.
///
/// Callers must have validated the ranges; the value is
/// `byte_offset * 8 + bit_offset`.
#[must_use]
pub fn pack_wire_address(byte_offset: u32, bit_offset: u8) -> [u8; 3] {
    let packed = (byte_offset << 3) | u32::from(bit_offset);
    [
        ((packed >> 16) & 0xFF) as u8,
        ((packed >> 8) & 0xFF) as u8,
        (packed & 0xFF) as u8,
    ]
}

/// Inverse of `pack_wire_address`.
#[must_use]
pub fn unpack_wire_address(bytes: [u8; 3]) -> (u32, u8) {
    let packed =
        (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2]);
    ((packed >> 3), (packed & 0x07) as u8)
}
