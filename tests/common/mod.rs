#![allow(dead_code)]
//! In-process PLC peer used by the integration tests.
//!
//! The peer owns one end of a `ChannelLink` and plays the server side of
//! the whole stack: TCP handshake, COTP connection, Setup Communication
//! and Read/Write Var against a small per-area memory image. Fault modes
//! let individual tests exercise the client's failure handling.

use std::collections::HashMap;
use std::time::Duration;

use s7comm::link::{ChannelLink, RawLink};
use s7comm::tcp::{TcpSegment, TCP_ACK, TCP_FIN, TCP_PSH, TCP_RST, TCP_SYN};

const AREA_MEM_LEN: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerMode {
    /// Answer everything correctly.
    Normal,
    /// Never send a single segment.
    Silent,
    /// Answer reads with a wrong item count in the parameter section.
    WrongItemCount,
    /// Answer the connection sequence, then ignore all Read/Write Var
    /// requests.
    SilentAfterSetup,
    /// Answer reads with an item whose header declares more data bytes
    /// than the body carries.
    TruncatedItem,
}

pub struct PeerConfig {
    pub reported_pdu: u16,
    pub mode: PeerMode,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            reported_pdu: 240,
            mode: PeerMode::Normal,
        }
    }
}

/// Spawn the peer on its own task and return the client-side link.
pub fn spawn_peer(config: PeerConfig) -> ChannelLink {
    let _ = env_logger::builder().is_test(true).try_init();
    let (client_link, peer_link) = ChannelLink::pair();
    tokio::spawn(run_peer(peer_link, config));
    client_link
}

struct Peer {
    link: ChannelLink,
    config: PeerConfig,
    snd_nxt: u32,
    rcv_nxt: u32,
    /// (area byte, db number) -> bytes
    memory: HashMap<(u8, u16), Vec<u8>>,
}

async fn run_peer(link: ChannelLink, config: PeerConfig) {
    let mut memory = HashMap::new();
    memory.insert((0x81, 0), vec![0u8; AREA_MEM_LEN]); // inputs
    memory.insert((0x82, 0), vec![0u8; AREA_MEM_LEN]); // outputs
    memory.insert((0x83, 0), vec![0u8; AREA_MEM_LEN]); // markers
    memory.insert((0x84, 1), vec![0u8; AREA_MEM_LEN]); // DB1
    let mut peer = Peer {
        link,
        config,
        snd_nxt: 0x4000_0000,
        rcv_nxt: 0,
        memory,
    };
    peer.run().await;
}

impl Peer {
    async fn run(&mut self) {
        loop {
            let bytes = match self.link.recv_segment(Duration::from_secs(2)).await {
                Ok(bytes) => bytes,
                Err(_) => return,
            };
            if self.config.mode == PeerMode::Silent {
                continue;
            }
            let Ok(seg) = TcpSegment::parse(&bytes) else {
                continue;
            };
            if seg.flags & TCP_RST != 0 {
                return;
            }
            if seg.flags & TCP_SYN != 0 {
                self.rcv_nxt = seg.seq.wrapping_add(1);
                let iss = self.snd_nxt;
                self.snd_nxt = iss.wrapping_add(1);
                self.send(iss, TCP_SYN | TCP_ACK, Vec::new()).await;
                continue;
            }
            if seg.flags & TCP_FIN != 0 {
                self.rcv_nxt = seg
                    .seq
                    .wrapping_add(seg.payload.len() as u32)
                    .wrapping_add(1);
                let seq = self.snd_nxt;
                self.snd_nxt = seq.wrapping_add(1);
                self.send(seq, TCP_FIN | TCP_ACK, Vec::new()).await;
                continue;
            }
            if seg.payload.is_empty() {
                continue; // pure ACK
            }
            self.rcv_nxt = seg.seq.wrapping_add(seg.payload.len() as u32);
            if let Some(response) = self.respond(&seg.payload) {
                let seq = self.snd_nxt;
                self.snd_nxt = seq.wrapping_add(response.len() as u32);
                self.send(seq, TCP_PSH | TCP_ACK, response).await;
            }
        }
    }

    async fn send(&mut self, seq: u32, flags: u8, payload: Vec<u8>) {
        let seg = TcpSegment {
            src_port: 102,
            dst_port: 49_152,
            seq,
            ack: self.rcv_nxt,
            flags,
            window: 8192,
            payload,
        };
        let _ = self.link.send_segment(&seg.to_bytes()).await;
    }

    /// Handle one TPKT frame and produce the framed response, if any.
    fn respond(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < 6 || frame[0] != 0x03 {
            return None;
        }
        let cotp_code = frame[5];
        // COTP Connection Request -> Connection Confirm
        if cotp_code == 0xE0 {
            let src_ref = [frame[8], frame[9]];
            let cc = vec![
                0x11, 0xD0, src_ref[0], src_ref[1], 0x43, 0x21, 0x00, // fixed part
                0xC0, 0x01, 0x0A, // TPDU size
                0xC1, 0x02, 0x01, 0x00, // src TSAP
                0xC2, 0x02, 0x01, 0x01, // dst TSAP
            ];
            return Some(tpkt(&cc));
        }
        if cotp_code != 0xF0 {
            return None;
        }
        let pdu = &frame[7..];
        if pdu.len() < 10 || pdu[0] != 0x32 || pdu[1] != 0x01 {
            return None;
        }
        let pdu_ref = [pdu[4], pdu[5]];
        let func = pdu[10];
        match func {
            0xF0 => Some(tpkt(&cotp_dt(&self.setup_response(pdu_ref)))),
            0x04 | 0x05 if self.config.mode == PeerMode::SilentAfterSetup => None,
            0x04 => Some(tpkt(&cotp_dt(&self.read_response(pdu, pdu_ref)))),
            0x05 => Some(tpkt(&cotp_dt(&self.write_response(pdu, pdu_ref)))),
            _ => None,
        }
    }

    fn setup_response(&self, pdu_ref: [u8; 2]) -> Vec<u8> {
        let mut out = response_header(pdu_ref, 8, 0);
        out.extend_from_slice(&[0xF0, 0x00, 0x00, 0x01, 0x00, 0x01]);
        out.extend_from_slice(&self.config.reported_pdu.to_be_bytes());
        out
    }

    fn read_response(&mut self, pdu: &[u8], pdu_ref: [u8; 2]) -> Vec<u8> {
        let count = usize::from(pdu[11]);
        let mut data = Vec::new();
        for i in 0..count {
            let item = &pdu[12 + i * 12..12 + (i + 1) * 12];
            if data.len() % 2 == 1 {
                data.push(0x00);
            }
            data.extend_from_slice(&self.read_item(item));
        }
        if self.config.mode == PeerMode::TruncatedItem {
            // header says 0x18 bits (3 bytes), body carries 1
            data = vec![0xFF, 0x04, 0x00, 0x18, 0x00];
        }
        let reported = if self.config.mode == PeerMode::WrongItemCount {
            count + 1
        } else {
            count
        };
        let mut out = response_header(pdu_ref, 2, data.len() as u16);
        out.push(0x04);
        out.push(reported as u8);
        out.extend_from_slice(&data);
        out
    }

    fn read_item(&self, item: &[u8]) -> Vec<u8> {
        let transport = item[3];
        let count = u16::from_be_bytes([item[4], item[5]]);
        let db = u16::from_be_bytes([item[6], item[7]]);
        let area = item[8];
        let packed =
            (u32::from(item[9]) << 16) | (u32::from(item[10]) << 8) | u32::from(item[11]);
        let byte_offset = (packed >> 3) as usize;
        let bit_offset = (packed & 0x07) as u8;

        let Some(mem) = self.memory.get(&(area, db)) else {
            return vec![0x0A, 0x00, 0x00, 0x00]; // object does not exist
        };
        if transport == 0x01 {
            let Some(&byte) = mem.get(byte_offset) else {
                return vec![0x05, 0x00, 0x00, 0x00]; // out of range
            };
            let bit = (byte >> bit_offset) & 0x01;
            return vec![0xFF, 0x03, 0x00, 0x01, bit];
        }
        let width = match transport {
            0x02 => 1,
            0x04 => 2,
            0x06 => 4,
            _ => return vec![0x06, 0x00, 0x00, 0x00],
        };
        let len = usize::from(count) * width;
        let Some(slice) = mem.get(byte_offset..byte_offset + len) else {
            return vec![0x05, 0x00, 0x00, 0x00];
        };
        let bits = (len * 8) as u16;
        let mut out = vec![0xFF, 0x04];
        out.extend_from_slice(&bits.to_be_bytes());
        out.extend_from_slice(slice);
        out
    }

    fn write_response(&mut self, pdu: &[u8], pdu_ref: [u8; 2]) -> Vec<u8> {
        let count = usize::from(pdu[11]);
        let mut rets = Vec::with_capacity(count);
        let mut pos = 12 + count * 12; // start of the data section
        for i in 0..count {
            let item = pdu[12 + i * 12..12 + (i + 1) * 12].to_vec();
            let class = pdu[pos + 1];
            let bits = u16::from_be_bytes([pdu[pos + 2], pdu[pos + 3]]);
            let len = match class {
                0x03 => (usize::from(bits) + 7) / 8,
                _ => usize::from(bits) / 8,
            };
            let value = pdu[pos + 4..pos + 4 + len].to_vec();
            pos += 4 + len;
            if len % 2 == 1 && i + 1 < count {
                pos += 1;
            }
            rets.push(self.write_item(&item, &value));
        }
        let mut out = response_header(pdu_ref, 2, rets.len() as u16);
        out.push(0x05);
        out.push(count as u8);
        out.extend_from_slice(&rets);
        out
    }

    fn write_item(&mut self, item: &[u8], value: &[u8]) -> u8 {
        let transport = item[3];
        let db = u16::from_be_bytes([item[6], item[7]]);
        let area = item[8];
        let packed =
            (u32::from(item[9]) << 16) | (u32::from(item[10]) << 8) | u32::from(item[11]);
        let byte_offset = (packed >> 3) as usize;
        let bit_offset = (packed & 0x07) as u8;

        let Some(mem) = self.memory.get_mut(&(area, db)) else {
            return 0x0A;
        };
        if transport == 0x01 {
            let Some(byte) = mem.get_mut(byte_offset) else {
                return 0x05;
            };
            if value.first().is_some_and(|&v| v != 0) {
                *byte |= 1 << bit_offset;
            } else {
                *byte &= !(1 << bit_offset);
            }
            return 0xFF;
        }
        let Some(slice) = mem.get_mut(byte_offset..byte_offset + value.len()) else {
            return 0x05;
        };
        slice.copy_from_slice(value);
        0xFF
    }
}

fn tpkt(payload: &[u8]) -> Vec<u8> {
    let total = (4 + payload.len()) as u16;
    let mut out = vec![0x03, 0x00];
    out.extend_from_slice(&total.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn cotp_dt(pdu: &[u8]) -> Vec<u8> {
    let mut out = vec![0x02, 0xF0, 0x80];
    out.extend_from_slice(pdu);
    out
}

fn response_header(pdu_ref: [u8; 2], param_len: u16, data_len: u16) -> Vec<u8> {
    let mut out = vec![0x32, 0x03, 0x00, 0x00, pdu_ref[0], pdu_ref[1]];
    out.extend_from_slice(&param_len.to_be_bytes());
    out.extend_from_slice(&data_len.to_be_bytes());
    out.extend_from_slice(&[0x00, 0x00]);
    out
}
