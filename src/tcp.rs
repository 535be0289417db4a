//! Manual TCP session engine.
//!
//! The S7 exchange runs over a raw link that carries whole TCP segments;
//! this module owns the segment codec and a small, pure state machine for
//! one connection: three-way handshake, data transfer with cumulative
//! acknowledgements, and an active close.
//!
//! `TcpSession::handle` never touches a socket. It consumes an event and
//! returns at most one segment to transmit, so the whole engine can be
//! tested without I/O. Receive-side sequence numbers advance only by the
//! actual payload length of each decoded segment.

use crate::error::S7Error;

pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;

const TCP_HEADER_LEN: usize = 20;
const TCP_WINDOW: u16 = 8192;

/// One TCP segment: fixed 20-byte header plus payload.
///
/// The checksum field is emitted as zero; the link layer underneath is
/// responsible for it (or ignores it, as the in-process test link does).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSegment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TCP_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.push(0x50); // data offset 5 words, no options
        out.push(self.flags);
        out.extend_from_slice(&self.window.to_be_bytes());
        out.extend_from_slice(&[0x00, 0x00]); // checksum, filled in below us
        out.extend_from_slice(&[0x00, 0x00]); // urgent pointer
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, S7Error> {
        if bytes.len() < TCP_HEADER_LEN {
            return Err(S7Error::FrameTruncated {
                declared: TCP_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let data_offset = usize::from(bytes[12] >> 4) * 4;
        if data_offset < TCP_HEADER_LEN || bytes.len() < data_offset {
            return Err(S7Error::FrameTruncated {
                declared: data_offset.max(TCP_HEADER_LEN),
                actual: bytes.len(),
            });
        }
        Ok(Self {
            src_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dst_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            seq: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ack: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            flags: bytes[13],
            window: u16::from_be_bytes([bytes[14], bytes[15]]),
            payload: bytes[data_offset..].to_vec(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    SynSent,
    Established,
    Closing,
}

/// Input to the state machine.
#[derive(Debug)]
pub enum TcpEvent<'a> {
    /// Start the three-way handshake.
    Open,
    /// Transmit application bytes on an established connection.
    Send(&'a [u8]),
    /// A segment arrived from the peer.
    Recv(&'a TcpSegment),
    /// Begin an active close.
    Close,
}

/// Pure TCP connection state for one client-side session.
#[derive(Debug)]
pub struct TcpSession {
    local_port: u16,
    remote_port: u16,
    state: TcpState,
    /// Next sequence number we will send.
    snd_nxt: u32,
    /// Next sequence number we expect from the peer.
    rcv_nxt: u32,
}

impl TcpSession {
    #[must_use]
    pub fn new(local_port: u16, remote_port: u16) -> Self {
        Self {
            local_port,
            remote_port,
            state: TcpState::Closed,
            snd_nxt: 0,
            rcv_nxt: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> TcpState {
        self.state
    }

    fn segment(&self, seq: u32, flags: u8, payload: Vec<u8>) -> TcpSegment {
        TcpSegment {
            src_port: self.local_port,
            dst_port: self.remote_port,
            seq,
            ack: self.rcv_nxt,
            flags,
            window: TCP_WINDOW,
            payload,
        }
    }

    /// Advance the state machine; returns the segment to transmit, if any.
    pub fn handle(&mut self, event: TcpEvent<'_>) -> Result<Option<TcpSegment>, S7Error> {
        match (self.state, event) {
            (TcpState::Closed, TcpEvent::Open) => {
                let iss: u32 = rand::random();
                self.snd_nxt = iss.wrapping_add(1);
                self.rcv_nxt = 0;
                self.state = TcpState::SynSent;
                let mut syn = self.segment(iss, TCP_SYN, Vec::new());
                syn.ack = 0;
                Ok(Some(syn))
            }
            (TcpState::SynSent, TcpEvent::Recv(seg)) => {
                if seg.flags & TCP_RST != 0 {
                    self.state = TcpState::Closed;
                    return Err(S7Error::Protocol("connection reset during handshake".into()));
                }
                if seg.flags & (TCP_SYN | TCP_ACK) != (TCP_SYN | TCP_ACK) {
                    return Err(S7Error::Protocol(format!(
                        "expected SYN-ACK, got flags 0x{:02X}",
                        seg.flags
                    )));
                }
                if seg.ack != self.snd_nxt {
                    return Err(S7Error::Protocol(format!(
                        "SYN-ACK acknowledges {} instead of {}",
                        seg.ack, self.snd_nxt
                    )));
                }
                self.rcv_nxt = seg.seq.wrapping_add(1);
                self.state = TcpState::Established;
                Ok(Some(self.segment(self.snd_nxt, TCP_ACK, Vec::new())))
            }
            (TcpState::Established, TcpEvent::Send(payload)) => {
                let seg = self.segment(self.snd_nxt, TCP_PSH | TCP_ACK, payload.to_vec());
                self.snd_nxt = self.snd_nxt.wrapping_add(payload.len() as u32);
                Ok(Some(seg))
            }
            (TcpState::Established, TcpEvent::Recv(seg)) => {
                if seg.flags & TCP_RST != 0 {
                    self.state = TcpState::Closed;
                    return Err(S7Error::Protocol("connection reset by peer".into()));
                }
                // advance only by what actually arrived
                let mut advanced = seg.payload.len() as u32;
                if seg.flags & TCP_FIN != 0 {
                    advanced = advanced.wrapping_add(1);
                    self.state = TcpState::Closing;
                }
                if advanced == 0 {
                    // pure ACK, nothing to acknowledge back
                    return Ok(None);
                }
                self.rcv_nxt = seg.seq.wrapping_add(advanced);
                Ok(Some(self.segment(self.snd_nxt, TCP_ACK, Vec::new())))
            }
            (TcpState::Established, TcpEvent::Close) => {
                let seg = self.segment(self.snd_nxt, TCP_FIN | TCP_ACK, Vec::new());
                self.snd_nxt = self.snd_nxt.wrapping_add(1);
                self.state = TcpState::Closing;
                Ok(Some(seg))
            }
            (TcpState::Closing, TcpEvent::Recv(seg)) => {
                if seg.flags & TCP_RST != 0 {
                    self.state = TcpState::Closed;
                    return Ok(None);
                }
                if seg.flags & TCP_FIN != 0 {
                    self.rcv_nxt = seg.seq.wrapping_add(seg.payload.len() as u32).wrapping_add(1);
                    self.state = TcpState::Closed;
                    return Ok(Some(self.segment(self.snd_nxt, TCP_ACK, Vec::new())));
                }
                if seg.flags & TCP_ACK != 0 && seg.ack == self.snd_nxt {
                    self.state = TcpState::Closed;
                }
                Ok(None)
            }
            (TcpState::Closed, TcpEvent::Recv(_)) => Ok(None),
            (state, event) => Err(S7Error::Protocol(format!(
                "event {event:?} not valid in TCP state {state:?}"
            ))),
        }
    }
}
