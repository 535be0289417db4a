//! S7 session orchestrator.
//!
//! `S7Client` drives one connection through its stages: TCP handshake over
//! the raw link, COTP connection with the rack/slot TSAP, Setup
//! Communication to negotiate the PDU size, then Read/Write Var traffic.
//!
//! The client never retries and never reconnects on its own. Address
//! validation problems and per-item device errors leave the session usable;
//! anything that breaks request/response pairing (a reference or item-count
//! mismatch, a transport failure mid-exchange) moves it to `Faulted`, after
//! which only `close` is accepted.

use std::time::Duration;

use crate::address::MemoryAddress;
use crate::config::config as global_config;
use crate::error::S7Error;
use crate::iso;
use crate::link::RawLink;
use crate::pdu::{self, ItemError};
use crate::s7_define::{
    CT_PG, DEFAULT_MAX_AMQ, DEFAULT_PDU_SIZE, MemoryArea, S7_ITEM_SPEC_LEN, S7_LOCAL_TSAP,
    S7_PORT, S7_REQ_HEADER_LEN, S7_RES_HEADER_LEN, TransportSize,
};
use crate::tcp::{TcpEvent, TcpSegment, TcpSession, TcpState};

const MAX_FRAME_LEN: usize = 65_535;

/// Chunk start address for an area transfer, guarding against the sum
/// running off the end of the 32-bit address space.
fn area_byte_offset(start: u32, offset: usize) -> Result<u32, S7Error> {
    u32::try_from(offset)
        .ok()
        .and_then(|o| start.checked_add(o))
        .ok_or_else(|| {
            S7Error::InvalidAddress(format!(
                "area transfer overflows the address space: {start} + {offset}"
            ))
        })
}

/// Lifecycle of one client session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    TcpHandshaking,
    CotpConnecting,
    SettingUpCommunication,
    Ready,
    Closed,
    /// Request/response pairing lost; reconnect with a fresh client.
    Faulted,
}

/// Connection parameters. Defaults target rack 0 / slot 1 on port 102
/// with a PG connection and a 960-byte PDU proposal.
#[derive(Clone, Copy, Debug)]
pub struct ConnectOptions {
    pub rack: u16,
    pub slot: u16,
    pub port: u16,
    pub local_port: u16,
    pub connection_type: u16,
    pub pdu_size: u16,
    pub max_amq: u16,
    pub step_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            rack: 0,
            slot: 1,
            port: S7_PORT,
            local_port: 49_152,
            connection_type: CT_PG,
            pdu_size: DEFAULT_PDU_SIZE,
            max_amq: DEFAULT_MAX_AMQ,
            step_timeout: Duration::from_millis(global_config().s7_step_timeout_ms),
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn with_rack_slot(mut self, rack: u16, slot: u16) -> Self {
        self.rack = rack;
        self.slot = slot;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = local_port;
        self
    }

    #[must_use]
    pub fn with_connection_type(mut self, connection_type: u16) -> Self {
        self.connection_type = connection_type;
        self
    }

    #[must_use]
    pub fn with_pdu_size(mut self, pdu_size: u16) -> Self {
        self.pdu_size = pdu_size;
        self
    }

    #[must_use]
    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    /// Called TSAP selecting the CPU: connection type in the high byte,
    /// rack and slot packed into the low byte.
    #[must_use]
    pub fn remote_tsap(&self) -> u16 {
        (self.connection_type << 8) | (self.rack * 0x20 + self.slot)
    }
}

/// One S7 client session over a raw segment link.
pub struct S7Client<L: RawLink> {
    link: L,
    opts: ConnectOptions,
    state: SessionState,
    tcp: TcpSession,
    /// Reassembly buffer for the inbound TPKT byte stream.
    rx_buf: Vec<u8>,
    /// COTP references, fixed once the Connection Confirm arrives.
    cotp: Option<iso::CotpConfirm>,
    next_ref: u16,
    pdu_length: u16,
    amq_calling: u16,
    amq_called: u16,
}

impl<L: RawLink> S7Client<L> {
    #[must_use]
    pub fn new(link: L, opts: ConnectOptions) -> Self {
        let tcp = TcpSession::new(opts.local_port, opts.port);
        Self {
            link,
            opts,
            state: SessionState::Disconnected,
            tcp,
            rx_buf: Vec::new(),
            cotp: None,
            next_ref: 0,
            pdu_length: 0,
            amq_calling: 0,
            amq_called: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// PDU size agreed with the device; 0 before `connect` completes.
    #[must_use]
    pub fn negotiated_pdu_length(&self) -> u16 {
        self.pdu_length
    }

    #[must_use]
    pub fn negotiated_amq(&self) -> (u16, u16) {
        (self.amq_calling, self.amq_called)
    }

    /// COTP connection references; `None` before the confirm arrives.
    #[must_use]
    pub fn cotp_references(&self) -> Option<iso::CotpConfirm> {
        self.cotp
    }

    fn next_pdu_ref(&mut self) -> u16 {
        let r = self.next_ref;
        self.next_ref = self.next_ref.wrapping_add(1);
        r
    }

    fn fault(&mut self, err: S7Error) -> S7Error {
        log::debug!("[S7] session faulted: {err}");
        self.state = SessionState::Faulted;
        err
    }

    async fn transmit(&mut self, seg: &TcpSegment) -> Result<(), S7Error> {
        self.link.send_segment(&seg.to_bytes()).await
    }

    /// Feed one inbound segment through the state machine; any ACK it
    /// produces goes straight back out.
    async fn absorb(&mut self, seg: &TcpSegment) -> Result<(), S7Error> {
        if let Some(reply) = self.tcp.handle(TcpEvent::Recv(seg))? {
            self.transmit(&reply).await?;
        }
        self.rx_buf.extend_from_slice(&seg.payload);
        Ok(())
    }

    /// Receive until one complete TPKT frame can be taken off the stream.
    async fn recv_frame(&mut self) -> Result<Vec<u8>, S7Error> {
        loop {
            if let Some(frame_len) = iso::detect_frame(&self.rx_buf)? {
                if frame_len > MAX_FRAME_LEN {
                    return Err(S7Error::Protocol(format!(
                        "frame length out of range: {frame_len}"
                    )));
                }
                if self.rx_buf.len() >= frame_len {
                    return Ok(self.rx_buf.drain(..frame_len).collect());
                }
            }
            let bytes = self.link.recv_segment(self.opts.step_timeout).await?;
            let seg = TcpSegment::parse(&bytes)?;
            self.absorb(&seg).await?;
        }
    }

    /// Send one framed request and wait for the next framed response.
    async fn exchange(&mut self, frame: Vec<u8>) -> Result<Vec<u8>, S7Error> {
        if let Some(seg) = self.tcp.handle(TcpEvent::Send(&frame))? {
            self.transmit(&seg).await?;
        }
        self.recv_frame().await
    }

    /// Run the full connection sequence: TCP handshake, COTP connect,
    /// Setup Communication. On success the session is `Ready`.
    pub async fn connect(&mut self) -> Result<(), S7Error> {
        if self.state != SessionState::Disconnected {
            return Err(S7Error::Protocol(format!(
                "connect is only valid when disconnected, state is {:?}",
                self.state
            )));
        }

        // --- TCP handshake ---
        self.state = SessionState::TcpHandshaking;
        if let Err(e) = self.tcp_handshake().await {
            // nothing was established yet, a retry with the same client is fine
            self.state = SessionState::Disconnected;
            self.tcp = TcpSession::new(self.opts.local_port, self.opts.port);
            self.rx_buf.clear();
            return Err(e);
        }
        log::debug!("[S7] TCP established");

        // --- COTP connection ---
        self.state = SessionState::CotpConnecting;
        match self.cotp_connect().await {
            Ok(confirm) => {
                log::debug!(
                    "[S7] COTP connected, peer ref 0x{:04X}",
                    confirm.src_ref
                );
                self.cotp = Some(confirm);
            }
            Err(e) => return Err(self.fault(e)),
        }

        // --- Setup Communication ---
        self.state = SessionState::SettingUpCommunication;
        match self.setup_communication().await {
            Ok(()) => {
                log::debug!(
                    "[S7] communication set up, PDU length {}, AMQ {}/{}",
                    self.pdu_length,
                    self.amq_calling,
                    self.amq_called
                );
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => Err(self.fault(e)),
        }
    }

    async fn tcp_handshake(&mut self) -> Result<(), S7Error> {
        if let Some(syn) = self.tcp.handle(TcpEvent::Open)? {
            self.transmit(&syn).await?;
        }
        while self.tcp.state() != TcpState::Established {
            let bytes = self.link.recv_segment(self.opts.step_timeout).await?;
            let seg = TcpSegment::parse(&bytes)?;
            if let Some(reply) = self.tcp.handle(TcpEvent::Recv(&seg))? {
                self.transmit(&reply).await?;
            }
        }
        Ok(())
    }

    async fn cotp_connect(&mut self) -> Result<iso::CotpConfirm, S7Error> {
        let src_ref = 0x0001;
        let cr = iso::build_connection_request(S7_LOCAL_TSAP, self.opts.remote_tsap(), src_ref)?;
        let frame = self.exchange(cr).await?;
        iso::parse_connection_confirm(&frame, src_ref)
    }

    async fn setup_communication(&mut self) -> Result<(), S7Error> {
        let pdu_ref = self.next_pdu_ref();
        let request = pdu::build_setup_communication(pdu_ref, self.opts.pdu_size, self.opts.max_amq);
        let frame = self.exchange(iso::wrap_data(&request)?).await?;
        let response = iso::unwrap_data(&frame)?;
        let setup = pdu::parse_setup_response(&response, pdu_ref)?;
        self.pdu_length = self.opts.pdu_size.min(setup.pdu_length);
        self.amq_calling = setup.amq_calling;
        self.amq_called = setup.amq_called;
        Ok(())
    }

    fn require_ready(&self) -> Result<(), S7Error> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(S7Error::NotConnected)
        }
    }

    /// One Read/Write Var round trip. Transport and pairing failures fault
    /// the session because there is no way to resynchronize mid-stream.
    async fn request(&mut self, s7_pdu: Vec<u8>) -> Result<Vec<u8>, S7Error> {
        let framed = iso::wrap_data(&s7_pdu)?;
        let frame = match self.exchange(framed).await {
            Ok(frame) => frame,
            Err(e) => return Err(self.fault(e)),
        };
        match iso::unwrap_data(&frame) {
            Ok(pdu) => Ok(pdu),
            Err(e) => {
                if global_config().s7_dump_on_error {
                    log::error!("[S7] unparsable frame: {}", crate::link::hex_dump(&frame));
                }
                Err(self.fault(e))
            }
        }
    }

    /// A response that cannot be taken apart leaves the pairing with the
    /// outstanding request unknown, so any shape error is session-fatal.
    /// Per-item device return codes pass through untouched.
    fn check_parse<T>(&mut self, res: Result<T, S7Error>) -> Result<T, S7Error> {
        match res {
            Err(
                e @ (S7Error::ProtocolDesync(_)
                | S7Error::FrameTruncated { .. }
                | S7Error::Protocol(_)),
            ) => Err(self.fault(e)),
            other => other,
        }
    }

    /// Read a batch of addresses, splitting into as many Read Var requests
    /// as the negotiated PDU size demands. Results are in request order;
    /// device-side failures are reported per item.
    pub async fn read_variables(
        &mut self,
        addrs: &[MemoryAddress],
    ) -> Result<Vec<Result<Vec<u8>, ItemError>>, S7Error> {
        self.require_ready()?;
        for addr in addrs {
            addr.validate()?;
        }
        let budget = usize::from(self.pdu_length);

        let mut results = Vec::with_capacity(addrs.len());
        let mut batch: Vec<MemoryAddress> = Vec::new();
        for &addr in addrs {
            let single_req = pdu::read_request_len(1);
            let single_res = pdu::read_response_len(&[addr]);
            if single_req > budget || single_res > budget {
                return Err(S7Error::PduTooLarge {
                    required: single_req.max(single_res),
                    negotiated: budget,
                });
            }
            batch.push(addr);
            if pdu::read_request_len(batch.len()) > budget
                || pdu::read_response_len(&batch) > budget
            {
                let last = batch.pop();
                self.read_batch(&batch, &mut results).await?;
                batch.clear();
                if let Some(last) = last {
                    batch.push(last);
                }
            }
        }
        if !batch.is_empty() {
            self.read_batch(&batch, &mut results).await?;
        }
        Ok(results)
    }

    async fn read_batch(
        &mut self,
        batch: &[MemoryAddress],
        results: &mut Vec<Result<Vec<u8>, ItemError>>,
    ) -> Result<(), S7Error> {
        let pdu_ref = self.next_pdu_ref();
        let request = pdu::build_read_var(pdu_ref, batch)?;
        let response = self.request(request).await?;
        let parsed =
            self.check_parse(pdu::parse_read_response(&response, pdu_ref, batch.len()))?;
        results.extend(parsed);
        Ok(())
    }

    /// Write a batch of `(address, value)` pairs, splitting by PDU size.
    pub async fn write_variables(
        &mut self,
        items: &[(MemoryAddress, Vec<u8>)],
    ) -> Result<Vec<Result<(), ItemError>>, S7Error> {
        self.require_ready()?;
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
        let budget = usize::from(self.pdu_length);

        let mut results = Vec::with_capacity(items.len());
        let mut batch: Vec<(MemoryAddress, Vec<u8>)> = Vec::new();
        for item in items {
            let single = pdu::write_request_len(std::slice::from_ref(item));
            if single > budget {
                return Err(S7Error::PduTooLarge {
                    required: single,
                    negotiated: budget,
                });
            }
            batch.push(item.clone());
            if pdu::write_request_len(&batch) > budget {
                let last = batch.pop();
                self.write_batch(&batch, &mut results).await?;
                batch.clear();
                if let Some(last) = last {
                    batch.push(last);
                }
            }
        }
        if !batch.is_empty() {
            self.write_batch(&batch, &mut results).await?;
        }
        Ok(results)
    }

    async fn write_batch(
        &mut self,
        batch: &[(MemoryAddress, Vec<u8>)],
        results: &mut Vec<Result<(), ItemError>>,
    ) -> Result<(), S7Error> {
        let pdu_ref = self.next_pdu_ref();
        let request = pdu::build_write_var(pdu_ref, batch)?;
        let response = self.request(request).await?;
        let parsed =
            self.check_parse(pdu::parse_write_response(&response, pdu_ref, batch.len()))?;
        results.extend(parsed);
        Ok(())
    }

    /// Largest contiguous byte run one Read Var response can carry.
    fn read_chunk_capacity(&self) -> Result<usize, S7Error> {
        let overhead = S7_RES_HEADER_LEN + 2 + 4;
        match usize::from(self.pdu_length).checked_sub(overhead) {
            Some(n) if n > 0 => Ok(n),
            _ => Err(S7Error::PduTooLarge {
                required: overhead + 1,
                negotiated: usize::from(self.pdu_length),
            }),
        }
    }

    /// Largest contiguous byte run one Write Var request can carry.
    fn write_chunk_capacity(&self) -> Result<usize, S7Error> {
        let overhead = S7_REQ_HEADER_LEN + 2 + S7_ITEM_SPEC_LEN + 4;
        match usize::from(self.pdu_length).checked_sub(overhead) {
            Some(n) if n > 0 => Ok(n),
            _ => Err(S7Error::PduTooLarge {
                required: overhead + 1,
                negotiated: usize::from(self.pdu_length),
            }),
        }
    }

    /// Read a contiguous byte run of arbitrary length, splitting it into
    /// as many requests as the negotiated PDU size requires.
    pub async fn read_area(
        &mut self,
        area: MemoryArea,
        db_number: u16,
        start: u32,
        len: usize,
    ) -> Result<Vec<u8>, S7Error> {
        self.require_ready()?;
        let chunk = self.read_chunk_capacity()?;
        let mut out = Vec::with_capacity(len);
        let mut offset = 0usize;
        while offset < len {
            let take = chunk.min(len - offset);
            let count = u16::try_from(take).map_err(|_| S7Error::PduTooLarge {
                required: take,
                negotiated: usize::from(self.pdu_length),
            })?;
            let byte_offset = area_byte_offset(start, offset)?;
            let addr = MemoryAddress {
                area,
                db_number,
                byte_offset,
                bit_offset: 0,
                size: TransportSize::Byte,
                count,
            };
            let mut items = self.read_variables(&[addr]).await?;
            match items.remove(0) {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(e) => {
                    return Err(S7Error::Protocol(format!(
                        "area read failed at byte {byte_offset}: {e}"
                    )));
                }
            }
            offset += take;
        }
        Ok(out)
    }

    /// Write a contiguous byte run of arbitrary length, chunked to fit the
    /// negotiated PDU size.
    pub async fn write_area(
        &mut self,
        area: MemoryArea,
        db_number: u16,
        start: u32,
        data: &[u8],
    ) -> Result<(), S7Error> {
        self.require_ready()?;
        let chunk = self.write_chunk_capacity()?;
        let mut offset = 0usize;
        while offset < data.len() {
            let take = chunk.min(data.len() - offset);
            let count = u16::try_from(take).map_err(|_| S7Error::PduTooLarge {
                required: take,
                negotiated: usize::from(self.pdu_length),
            })?;
            let byte_offset = area_byte_offset(start, offset)?;
            let addr = MemoryAddress {
                area,
                db_number,
                byte_offset,
                bit_offset: 0,
                size: TransportSize::Byte,
                count,
            };
            let slice = data[offset..offset + take].to_vec();
            let mut items = self.write_variables(&[(addr, slice)]).await?;
            if let Err(e) = items.remove(0) {
                return Err(S7Error::Protocol(format!(
                    "area write failed at byte {byte_offset}: {e}"
                )));
            }
            offset += take;
        }
        Ok(())
    }

    /// Read one bit; `addr` must be a bit-sized address.
    pub async fn read_bit(&mut self, addr: MemoryAddress) -> Result<bool, S7Error> {
        if addr.size != TransportSize::Bit {
            return Err(S7Error::InvalidAddress(
                "read_bit requires a bit-sized address".into(),
            ));
        }
        let mut items = self.read_variables(&[addr]).await?;
        match items.remove(0) {
            Ok(bytes) => Ok(bytes.first().is_some_and(|&b| b != 0)),
            Err(e) => Err(S7Error::Protocol(format!("bit read failed: {e}"))),
        }
    }

    /// Write one bit; `addr` must be a bit-sized address.
    pub async fn write_bit(&mut self, addr: MemoryAddress, value: bool) -> Result<(), S7Error> {
        if addr.size != TransportSize::Bit {
            return Err(S7Error::InvalidAddress(
                "write_bit requires a bit-sized address".into(),
            ));
        }
        let mut items = self
            .write_variables(&[(addr, vec![u8::from(value)])])
            .await?;
        match items.remove(0) {
            Ok(()) => Ok(()),
            Err(e) => Err(S7Error::Protocol(format!("bit write failed: {e}"))),
        }
    }

    /// Close the session. Idempotent; a best-effort FIN exchange runs when
    /// the TCP connection is still up, and any late traffic is discarded.
    pub async fn close(&mut self) -> Result<(), S7Error> {
        if self.state == SessionState::Closed || self.state == SessionState::Disconnected {
            self.state = SessionState::Closed;
            return Ok(());
        }
        if self.tcp.state() == TcpState::Established {
            if let Ok(Some(fin)) = self.tcp.handle(TcpEvent::Close) {
                let _ = self.transmit(&fin).await;
            }
            // drain until the peer finishes its side or goes quiet
            while self.tcp.state() != TcpState::Closed {
                let bytes = match self.link.recv_segment(self.opts.step_timeout).await {
                    Ok(bytes) => bytes,
                    Err(_) => break,
                };
                let Ok(seg) = TcpSegment::parse(&bytes) else {
                    continue;
                };
                match self.tcp.handle(TcpEvent::Recv(&seg)) {
                    Ok(Some(reply)) => {
                        let _ = self.transmit(&reply).await;
                    }
                    Ok(None) => {}
                    Err(_) => break,
                }
            }
        }
        self.rx_buf.clear();
        self.state = SessionState::Closed;
        log::debug!("[S7] session closed");
        Ok(())
    }
}
