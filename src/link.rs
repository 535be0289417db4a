//! Raw segment link.
//!
//! The session engine in `tcp` produces and consumes whole TCP segments;
//! `RawLink` is the seam that carries those segment bytes to a peer. The
//! in-process `ChannelLink` implementation backs the test harness and any
//! embedding that provides its own packet transport (raw sockets, a
//! userspace network stack, a capture replay).

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout as tokio_timeout;

use crate::config::config as global_config;
use crate::error::S7Error;

/// Render bytes as spaced uppercase hex for the payload logs.
#[must_use]
pub fn hex_dump(b: &[u8]) -> String {
    b.iter()
        .map(|x| format!("{x:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Transport for raw TCP segment bytes, one datagram per call.
pub trait RawLink: Send {
    /// Hand one complete segment to the peer.
    fn send_segment(
        &mut self,
        bytes: &[u8],
    ) -> impl std::future::Future<Output = Result<(), S7Error>> + Send;

    /// Wait up to `timeout` for the next segment from the peer.
    fn recv_segment(
        &mut self,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, S7Error>> + Send;
}

/// In-process link over a pair of unbounded channels.
pub struct ChannelLink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelLink {
    /// Two connected endpoints; segments sent on one arrive on the other.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: b_rx },
            Self { tx: b_tx, rx: a_rx },
        )
    }
}

impl RawLink for ChannelLink {
    async fn send_segment(&mut self, bytes: &[u8]) -> Result<(), S7Error> {
        if global_config().log_s7_payloads {
            log::debug!("[S7 link send] {}", hex_dump(bytes));
        }
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| S7Error::Protocol("link closed by peer".into()))
    }

    async fn recv_segment(&mut self, timeout: Duration) -> Result<Vec<u8>, S7Error> {
        let bytes = match tokio_timeout(timeout, self.rx.recv()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(S7Error::NoResponse),
            Err(_) => return Err(S7Error::Timeout),
        };
        if global_config().log_s7_payloads {
            log::debug!("[S7 link recv] {}", hex_dump(&bytes));
        }
        Ok(bytes)
    }
}
