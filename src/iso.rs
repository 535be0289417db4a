//! ISO-on-TCP framing (RFC 1006 TPKT + ISO 8073 COTP).
//!
//! Every S7 PDU travels inside a COTP Data TPDU, which in turn travels
//! inside a TPKT packet. The connection is opened with a COTP Connection
//! Request / Connection Confirm exchange carrying the TSAP parameters that
//! select the CPU rack and slot.
//!
//! Builders return complete TPKT-framed byte vectors; parsers take the full
//! framed bytes back apart and verify the envelope before handing the inner
//! payload to the `pdu` module.

use crate::error::S7Error;
use crate::s7_define::{
    COTP_CC, COTP_CR, COTP_DT, COTP_DT_HEADER_LEN, COTP_EOT, COTP_PARAM_DST_TSAP,
    COTP_PARAM_SRC_TSAP, COTP_PARAM_TPDU_SIZE, COTP_TPDU_SIZE_1024, TPKT_HEADER_LEN, TPKT_VERSION,
};

/// Fields of a parsed COTP Connection Confirm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CotpConfirm {
    /// Reference chosen by the peer for this transport connection.
    pub src_ref: u16,
    /// Echo of the reference we sent in the Connection Request.
    pub dst_ref: u16,
    /// TPDU size exponent accepted by the peer, when it echoed the parameter.
    pub tpdu_size: Option<u8>,
}

/// Prefix `payload` with a TPKT header (version 3, big-endian total length).
pub fn build_tpkt(payload: &[u8]) -> Result<Vec<u8>, S7Error> {
    let total = TPKT_HEADER_LEN + payload.len();
    let total = u16::try_from(total)
        .map_err(|_| S7Error::Protocol(format!("frame too large for TPKT: {total} bytes")))?;
    let mut out = Vec::with_capacity(total as usize);
    out.push(TPKT_VERSION);
    out.push(0x00);
    out.extend_from_slice(&total.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Build the TPKT-framed COTP Connection Request.
///
/// Carries three parameters: proposed TPDU size (1024), the calling TSAP
/// and the called TSAP. `src_ref` is our reference for the transport
/// connection, echoed back in the Connection Confirm.
pub fn build_connection_request(
    local_tsap: u16,
    remote_tsap: u16,
    src_ref: u16,
) -> Result<Vec<u8>, S7Error> {
    let mut cotp = Vec::with_capacity(18);
    cotp.push(0x11); // length indicator: 17 bytes follow
    cotp.push(COTP_CR);
    cotp.extend_from_slice(&[0x00, 0x00]); // dst-ref, unknown until confirm
    cotp.extend_from_slice(&src_ref.to_be_bytes());
    cotp.push(0x00); // class 0, no options
    cotp.extend_from_slice(&[COTP_PARAM_TPDU_SIZE, 0x01, COTP_TPDU_SIZE_1024]);
    cotp.push(COTP_PARAM_SRC_TSAP);
    cotp.push(0x02);
    cotp.extend_from_slice(&local_tsap.to_be_bytes());
    cotp.push(COTP_PARAM_DST_TSAP);
    cotp.push(0x02);
    cotp.extend_from_slice(&remote_tsap.to_be_bytes());
    build_tpkt(&cotp)
}

/// Parse a TPKT-framed COTP Connection Confirm.
///
/// `expected_dst_ref` is the reference we chose in the Connection Request;
/// a confirm that echoes anything else belongs to a different connection
/// and is rejected.
pub fn parse_connection_confirm(
    frame: &[u8],
    expected_dst_ref: u16,
) -> Result<CotpConfirm, S7Error> {
    let payload = unwrap_tpkt(frame)?;
    if payload.len() < 7 {
        return Err(S7Error::FrameTruncated {
            declared: 7,
            actual: payload.len(),
        });
    }
    let li = payload[0] as usize;
    if payload[1] != COTP_CC {
        return Err(S7Error::Protocol(format!(
            "expected COTP CC (0x{COTP_CC:02X}), got 0x{:02X}",
            payload[1]
        )));
    }
    if payload.len() < li + 1 {
        return Err(S7Error::FrameTruncated {
            declared: li + 1,
            actual: payload.len(),
        });
    }
    let dst_ref = u16::from_be_bytes([payload[2], payload[3]]);
    let src_ref = u16::from_be_bytes([payload[4], payload[5]]);
    if dst_ref != expected_dst_ref {
        return Err(S7Error::Protocol(format!(
            "COTP CC echoes reference 0x{dst_ref:04X}, expected 0x{expected_dst_ref:04X}"
        )));
    }

    // Scan the variable part for an echoed TPDU size parameter.
    let mut tpdu_size = None;
    let mut pos = 7;
    while pos + 2 <= li + 1 {
        let code = payload[pos];
        let plen = payload[pos + 1] as usize;
        if pos + 2 + plen > li + 1 {
            break;
        }
        if code == COTP_PARAM_TPDU_SIZE && plen == 1 {
            tpdu_size = Some(payload[pos + 2]);
        }
        pos += 2 + plen;
    }

    Ok(CotpConfirm {
        src_ref,
        dst_ref,
        tpdu_size,
    })
}

/// Wrap an S7 PDU into a COTP Data TPDU and a TPKT header.
pub fn wrap_data(pdu: &[u8]) -> Result<Vec<u8>, S7Error> {
    let mut cotp = Vec::with_capacity(COTP_DT_HEADER_LEN + 1 + pdu.len());
    cotp.push(0x02); // length indicator: code + EOT byte
    cotp.push(COTP_DT);
    cotp.push(COTP_EOT); // single TPDU, last in sequence
    cotp.extend_from_slice(pdu);
    build_tpkt(&cotp)
}

/// Strip the TPKT envelope, verifying version and declared length.
fn unwrap_tpkt(frame: &[u8]) -> Result<&[u8], S7Error> {
    if frame.len() < TPKT_HEADER_LEN {
        return Err(S7Error::FrameTruncated {
            declared: TPKT_HEADER_LEN,
            actual: frame.len(),
        });
    }
    if frame[0] != TPKT_VERSION {
        return Err(S7Error::Protocol(format!(
            "bad TPKT version: 0x{:02X}",
            frame[0]
        )));
    }
    let declared = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    if declared < TPKT_HEADER_LEN {
        return Err(S7Error::Protocol(format!(
            "TPKT length below header size: {declared}"
        )));
    }
    if frame.len() < declared {
        return Err(S7Error::FrameTruncated {
            declared,
            actual: frame.len(),
        });
    }
    Ok(&frame[TPKT_HEADER_LEN..declared])
}

/// Strip TPKT and COTP Data headers, returning the inner S7 PDU bytes.
pub fn unwrap_data(frame: &[u8]) -> Result<Vec<u8>, S7Error> {
    let payload = unwrap_tpkt(frame)?;
    if payload.len() < 3 {
        return Err(S7Error::FrameTruncated {
            declared: 3,
            actual: payload.len(),
        });
    }
    let li = payload[0] as usize;
    if payload[1] != COTP_DT {
        return Err(S7Error::Protocol(format!(
            "expected COTP DT (0x{COTP_DT:02X}), got 0x{:02X}",
            payload[1]
        )));
    }
    if payload[2] & COTP_EOT == 0 {
        // Reassembly of multi-TPDU messages is out of scope for S7; every
        // peer observed sends a single DT with EOT set.
        return Err(S7Error::Protocol("COTP DT without EOT flag".into()));
    }
    if li + 1 > payload.len() {
        return Err(S7Error::FrameTruncated {
            declared: li + 1,
            actual: payload.len(),
        });
    }
    Ok(payload[li + 1..].to_vec())
}

/// Try to determine the full frame length from a (possibly partial) buffer.
///
/// Returns `Ok(Some(frame_len))` once the TPKT header is complete,
/// `Ok(None)` when more bytes are needed, and `Err` on a malformed header.
pub fn detect_frame(buf: &[u8]) -> Result<Option<usize>, S7Error> {
    if buf.len() < TPKT_HEADER_LEN {
        return Ok(None);
    }
    if buf[0] != TPKT_VERSION {
        return Err(S7Error::Protocol(format!(
            "bad TPKT version: 0x{:02X}",
            buf[0]
        )));
    }
    let declared = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if declared < TPKT_HEADER_LEN {
        return Err(S7Error::Protocol(format!(
            "TPKT length below header size: {declared}"
        )));
    }
    Ok(Some(declared))
}
