//! S7comm client over a manually driven TCP session.
//!
//! This crate speaks the Siemens S7 protocol (Read Var, Write Var, Setup
//! Communication) inside ISO-on-TCP framing, with its own TCP state machine
//! on top of a raw segment link instead of a kernel socket. That makes the
//! whole stack, from the three-way handshake to the S7 item codec, pure
//! and testable in-process.
//!
//! Typical use:
//!
//! ```no_run
//! use s7comm::{ChannelLink, ConnectOptions, MemoryAddress, S7Client};
//!
//! # async fn run() -> Result<(), s7comm::S7Error> {
//! let (link, _peer) = ChannelLink::pair();
//! let mut client = S7Client::new(link, ConnectOptions::default().with_rack_slot(0, 1));
//! client.connect().await?;
//! let values = client
//!     .read_variables(&[MemoryAddress::output(1), MemoryAddress::marker(0).with_count(4)])
//!     .await?;
//! # let _ = values;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod client;
pub mod config;
pub mod error;
pub mod error_codes;
pub mod iso;
pub mod link;
pub mod pdu;
pub mod s7_define;
pub mod tcp;

pub use address::MemoryAddress;
pub use client::{ConnectOptions, S7Client, SessionState};
pub use error::S7Error;
pub use link::{ChannelLink, RawLink};
pub use pdu::ItemError;
pub use s7_define::{MemoryArea, TransportSize};
