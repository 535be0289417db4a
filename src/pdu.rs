//! S7 PDU codec: Setup Communication, Read Var and Write Var.
//!
//! Builders produce the bare S7 PDU (header + parameter + data sections);
//! the `iso` module wraps it for the wire. Parsers verify the response
//! header (protocol id, PDU type, reference echo, error class) before
//! taking the parameter and data sections apart.
//!
//! A reference mismatch or an item-count mismatch means the session has
//! lost request/response pairing and is reported as `ProtocolDesync`;
//! everything else is a recoverable `Protocol` or per-item error.

use crate::address::MemoryAddress;
use crate::error::S7Error;
use crate::error_codes;
use crate::s7_define::{
    S7_FUNC_READ_VAR, S7_FUNC_SETUP_COMM, S7_FUNC_WRITE_VAR, S7_ITEM_SPEC_LEN, S7_PDU_TYPE_REQUEST,
    S7_PDU_TYPE_RESPONSE, S7_PROTOCOL_ID, S7_REQ_HEADER_LEN, S7_RES_HEADER_LEN, S7_RET_SUCCESS,
    S7_SPEC_LENGTH, S7_SPEC_TYPE_VAR, S7_SYNTAX_ID_S7ANY, S7_TS_RES_BIT, S7_TS_RES_BYTE,
    TransportSize,
};
use std::fmt;

/// Per-item failure reported by the device inside an otherwise good response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemError {
    pub code: u8,
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match error_codes::return_code_name(self.code) {
            Some(name) => write!(f, "item error 0x{:02X} ({name})", self.code),
            None => write!(f, "item error 0x{:02X}", self.code),
        }
    }
}

impl std::error::Error for ItemError {}

/// Values reported by the device in a Setup Communication response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupResult {
    pub pdu_length: u16,
    pub amq_calling: u16,
    pub amq_called: u16,
}

fn push_request_header(pdu: &mut Vec<u8>, pdu_ref: u16, param_len: u16, data_len: u16) {
    pdu.push(S7_PROTOCOL_ID);
    pdu.push(S7_PDU_TYPE_REQUEST);
    pdu.extend_from_slice(&[0x00, 0x00]); // redundancy id, unused
    pdu.extend_from_slice(&pdu_ref.to_be_bytes());
    pdu.extend_from_slice(&param_len.to_be_bytes());
    pdu.extend_from_slice(&data_len.to_be_bytes());
}

/// Verify the response header and return the parameter and data sections.
fn split_response(pdu: &[u8], pdu_ref: u16, function: u8) -> Result<(&[u8], &[u8]), S7Error> {
    if pdu.len() < S7_RES_HEADER_LEN {
        return Err(S7Error::FrameTruncated {
            declared: S7_RES_HEADER_LEN,
            actual: pdu.len(),
        });
    }
    if pdu[0] != S7_PROTOCOL_ID {
        return Err(S7Error::Protocol(format!(
            "bad S7 protocol id: 0x{:02X}",
            pdu[0]
        )));
    }
    if pdu[1] != S7_PDU_TYPE_RESPONSE {
        return Err(S7Error::Protocol(format!(
            "expected ack-data PDU, got type 0x{:02X}",
            pdu[1]
        )));
    }
    let echoed_ref = u16::from_be_bytes([pdu[4], pdu[5]]);
    if echoed_ref != pdu_ref {
        return Err(S7Error::ProtocolDesync(format!(
            "PDU reference mismatch: sent {pdu_ref}, got {echoed_ref}"
        )));
    }
    let param_len = u16::from_be_bytes([pdu[6], pdu[7]]) as usize;
    let data_len = u16::from_be_bytes([pdu[8], pdu[9]]) as usize;
    let error_class = pdu[10];
    let error_code = pdu[11];
    if error_class != 0x00 {
        let name = error_codes::error_class_name(error_class).unwrap_or("unknown");
        return Err(S7Error::Protocol(format!(
            "device reported error class 0x{error_class:02X} ({name}), code 0x{error_code:02X}"
        )));
    }
    let param_end = S7_RES_HEADER_LEN + param_len;
    let data_end = param_end + data_len;
    if pdu.len() < data_end {
        return Err(S7Error::FrameTruncated {
            declared: data_end,
            actual: pdu.len(),
        });
    }
    let param = &pdu[S7_RES_HEADER_LEN..param_end];
    if param.is_empty() || param[0] != function {
        return Err(S7Error::ProtocolDesync(format!(
            "response function mismatch: expected 0x{function:02X}"
        )));
    }
    Ok((param, &pdu[param_end..data_end]))
}

/// Build a Setup Communication request proposing `pdu_length` and `max_amq`.
pub fn build_setup_communication(pdu_ref: u16, pdu_length: u16, max_amq: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(S7_REQ_HEADER_LEN + 8);
    push_request_header(&mut pdu, pdu_ref, 8, 0);
    pdu.push(S7_FUNC_SETUP_COMM);
    pdu.push(0x00); // reserved
    pdu.extend_from_slice(&max_amq.to_be_bytes()); // max AMQ calling
    pdu.extend_from_slice(&max_amq.to_be_bytes()); // max AMQ called
    pdu.extend_from_slice(&pdu_length.to_be_bytes());
    pdu
}

/// Parse the Setup Communication response.
pub fn parse_setup_response(pdu: &[u8], pdu_ref: u16) -> Result<SetupResult, S7Error> {
    let (param, _data) = split_response(pdu, pdu_ref, S7_FUNC_SETUP_COMM)?;
    if param.len() < 8 {
        return Err(S7Error::FrameTruncated {
            declared: 8,
            actual: param.len(),
        });
    }
    let amq_calling = u16::from_be_bytes([param[2], param[3]]);
    let amq_called = u16::from_be_bytes([param[4], param[5]]);
    let pdu_length = u16::from_be_bytes([param[6], param[7]]);
    if pdu_length == 0 {
        return Err(S7Error::Protocol(
            "device reported a PDU length of 0".into(),
        ));
    }
    Ok(SetupResult {
        pdu_length,
        amq_calling,
        amq_called,
    })
}

fn push_item_spec(pdu: &mut Vec<u8>, addr: &MemoryAddress) -> Result<(), S7Error> {
    let wire = addr.wire_address()?;
    pdu.push(S7_SPEC_TYPE_VAR);
    pdu.push(S7_SPEC_LENGTH);
    pdu.push(S7_SYNTAX_ID_S7ANY);
    pdu.push(addr.size.as_byte());
    pdu.extend_from_slice(&addr.count.to_be_bytes());
    pdu.extend_from_slice(&addr.db_number.to_be_bytes());
    pdu.push(addr.area.as_byte());
    pdu.extend_from_slice(&wire);
    Ok(())
}

/// Build a Read Var request for `addrs`.
pub fn build_read_var(pdu_ref: u16, addrs: &[MemoryAddress]) -> Result<Vec<u8>, S7Error> {
    let item_count = u8::try_from(addrs.len())
        .map_err(|_| S7Error::Protocol(format!("too many items in one request: {}", addrs.len())))?;
    if item_count == 0 {
        return Err(S7Error::Protocol("empty read request".into()));
    }
    let param_len = 2 + addrs.len() * S7_ITEM_SPEC_LEN;
    let param_len = u16::try_from(param_len)
        .map_err(|_| S7Error::Protocol(format!("parameter section too large: {param_len}")))?;
    let mut pdu = Vec::with_capacity(S7_REQ_HEADER_LEN + param_len as usize);
    push_request_header(&mut pdu, pdu_ref, param_len, 0);
    pdu.push(S7_FUNC_READ_VAR);
    pdu.push(item_count);
    for addr in addrs {
        push_item_spec(&mut pdu, addr)?;
    }
    Ok(pdu)
}

/// Number of payload bytes the data section declares for one item.
fn data_section_len(transport_class: u8, length_field: u16) -> Result<usize, S7Error> {
    match transport_class {
        // length counted in bits
        S7_TS_RES_BIT => Ok((usize::from(length_field) + 7) / 8),
        S7_TS_RES_BYTE => {
            if length_field % 8 != 0 {
                return Err(S7Error::Protocol(format!(
                    "byte-class data length is not a whole number of bytes: {length_field} bits"
                )));
            }
            Ok(usize::from(length_field) / 8)
        }
        // octet string, length counted in bytes
        0x09 => Ok(usize::from(length_field)),
        other => Err(S7Error::Protocol(format!(
            "unknown data transport class: 0x{other:02X}"
        ))),
    }
}

/// Parse a Read Var response into one result per requested item.
pub fn parse_read_response(
    pdu: &[u8],
    pdu_ref: u16,
    expected_items: usize,
) -> Result<Vec<Result<Vec<u8>, ItemError>>, S7Error> {
    let (param, data) = split_response(pdu, pdu_ref, S7_FUNC_READ_VAR)?;
    if param.len() < 2 {
        return Err(S7Error::FrameTruncated {
            declared: 2,
            actual: param.len(),
        });
    }
    let item_count = usize::from(param[1]);
    if item_count != expected_items {
        return Err(S7Error::ProtocolDesync(format!(
            "read item count mismatch: requested {expected_items}, response carries {item_count}"
        )));
    }

    let mut results = Vec::with_capacity(item_count);
    let mut pos = 0usize;
    for i in 0..item_count {
        if pos + 4 > data.len() {
            return Err(S7Error::FrameTruncated {
                declared: pos + 4,
                actual: data.len(),
            });
        }
        let ret = data[pos];
        let transport_class = data[pos + 1];
        let length_field = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);
        pos += 4;
        if ret != S7_RET_SUCCESS {
            results.push(Err(ItemError { code: ret }));
            continue;
        }
        let len = data_section_len(transport_class, length_field)?;
        if pos + len > data.len() {
            return Err(S7Error::FrameTruncated {
                declared: pos + len,
                actual: data.len(),
            });
        }
        results.push(Ok(data[pos..pos + len].to_vec()));
        pos += len;
        // odd payloads are padded to even, except after the last item
        if len % 2 == 1 && i + 1 < item_count {
            pos += 1;
        }
    }
    Ok(results)
}

/// Build a Write Var request for `(address, value bytes)` pairs.
pub fn build_write_var(
    pdu_ref: u16,
    items: &[(MemoryAddress, Vec<u8>)],
) -> Result<Vec<u8>, S7Error> {
    let item_count = u8::try_from(items.len())
        .map_err(|_| S7Error::Protocol(format!("too many items in one request: {}", items.len())))?;
    if item_count == 0 {
        return Err(S7Error::Protocol("empty write request".into()));
    }
    for (addr, value) in items {
        addr.validate()?;
        if value.len() != addr.payload_len() {
            return Err(S7Error::InvalidAddress(format!(
                "write value length {} does not match address span {}",
                value.len(),
                addr.payload_len()
            )));
        }
    }

    let param_len = 2 + items.len() * S7_ITEM_SPEC_LEN;
    let mut data_len = 0usize;
    for (i, (_, value)) in items.iter().enumerate() {
        data_len += 4 + value.len();
        if value.len() % 2 == 1 && i + 1 < items.len() {
            data_len += 1;
        }
    }
    let param_len = u16::try_from(param_len)
        .map_err(|_| S7Error::Protocol(format!("parameter section too large: {param_len}")))?;
    let data_len = u16::try_from(data_len)
        .map_err(|_| S7Error::Protocol(format!("data section too large: {data_len}")))?;

    let mut pdu =
        Vec::with_capacity(S7_REQ_HEADER_LEN + param_len as usize + data_len as usize);
    push_request_header(&mut pdu, pdu_ref, param_len, data_len);
    pdu.push(S7_FUNC_WRITE_VAR);
    pdu.push(item_count);
    for (addr, _) in items {
        push_item_spec(&mut pdu, addr)?;
    }
    for (i, (addr, value)) in items.iter().enumerate() {
        pdu.push(0x00); // reserved
        if addr.size == TransportSize::Bit {
            pdu.push(S7_TS_RES_BIT);
            pdu.extend_from_slice(&addr.count.to_be_bytes()); // length in bits
        } else {
            pdu.push(S7_TS_RES_BYTE);
            let bits = u16::try_from(value.len() * 8).map_err(|_| {
                S7Error::Protocol(format!("write value too large: {} bytes", value.len()))
            })?;
            pdu.extend_from_slice(&bits.to_be_bytes());
        }
        pdu.extend_from_slice(value);
        if value.len() % 2 == 1 && i + 1 < items.len() {
            pdu.push(0x00);
        }
    }
    Ok(pdu)
}

/// Parse a Write Var response: one return code per written item.
pub fn parse_write_response(
    pdu: &[u8],
    pdu_ref: u16,
    expected_items: usize,
) -> Result<Vec<Result<(), ItemError>>, S7Error> {
    let (param, data) = split_response(pdu, pdu_ref, S7_FUNC_WRITE_VAR)?;
    if param.len() < 2 {
        return Err(S7Error::FrameTruncated {
            declared: 2,
            actual: param.len(),
        });
    }
    let item_count = usize::from(param[1]);
    if item_count != expected_items {
        return Err(S7Error::ProtocolDesync(format!(
            "write item count mismatch: requested {expected_items}, response carries {item_count}"
        )));
    }
    if data.len() < item_count {
        return Err(S7Error::FrameTruncated {
            declared: item_count,
            actual: data.len(),
        });
    }
    Ok(data[..item_count]
        .iter()
        .map(|&ret| {
            if ret == S7_RET_SUCCESS {
                Ok(())
            } else {
                Err(ItemError { code: ret })
            }
        })
        .collect())
}

/// Bytes a Read Var request for `n` items occupies inside the S7 PDU.
#[must_use]
pub fn read_request_len(n: usize) -> usize {
    S7_REQ_HEADER_LEN + 2 + n * S7_ITEM_SPEC_LEN
}

/// Worst-case bytes the matching Read Var response occupies.
#[must_use]
pub fn read_response_len(addrs: &[MemoryAddress]) -> usize {
    let data: usize = addrs
        .iter()
        .map(|a| {
            let len = a.payload_len();
            4 + len + len % 2
        })
        .sum();
    S7_RES_HEADER_LEN + 2 + data
}

/// Bytes a Write Var request occupies inside the S7 PDU.
#[must_use]
pub fn write_request_len(items: &[(MemoryAddress, Vec<u8>)]) -> usize {
    let data: usize = items
        .iter()
        .map(|(_, v)| 4 + v.len() + v.len() % 2)
        .sum();
    S7_REQ_HEADER_LEN + 2 + items.len() * S7_ITEM_SPEC_LEN + data
}
