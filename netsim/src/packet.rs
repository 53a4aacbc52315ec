//! Fixed-size unit of data moved between tasks.

use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of the serialized header (sequence, length, destination, sender).
pub const HEADER_SIZE: usize = 4 + 2 + 1 + 1;

/// A packet travelling from a sender to a receiver.
///
/// A packet has exactly one owner at a time and is intentionally not `Clone`:
/// handing it to a channel moves it and dropping it destroys it.
pub struct Packet {
    sequence: u32,
    length: u16,
    dest: u8,
    sender: u8,
    payload: Vec<u8>,
}

impl Packet {
    /// Allocate a packet whose serialized form is exactly `size` bytes.
    ///
    /// The payload is zeroed. Allocation is fallible so that a sender can skip
    /// a period instead of aborting the process.
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than [HEADER_SIZE] or larger than `u16::MAX`
    /// (rejected earlier by [crate::Config::validate]).
    pub fn new(sender: u8, dest: u8, sequence: u32, size: usize) -> Result<Self, Error> {
        let length = u16::try_from(size).expect("packet size exceeds u16::MAX");
        let filler = size
            .checked_sub(HEADER_SIZE)
            .expect("packet size smaller than header");
        Ok(Self {
            sequence,
            length,
            dest,
            sender,
            payload: zeroed(filler)?,
        })
    }

    /// Per-(sender, destination) sequence number.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Address of the receiver this packet is destined for.
    pub fn dest(&self) -> u8 {
        self.dest
    }

    /// Address of the sender that generated this packet.
    pub fn sender(&self) -> u8 {
        self.sender
    }

    /// Declared length of the packet.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Serialized size of the packet.
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Always `false`: every packet carries at least a header.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Serialize the packet (big-endian header followed by the payload).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        buf.put_u32(self.sequence);
        buf.put_u16(self.length);
        buf.put_u8(self.dest);
        buf.put_u8(self.sender);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("sequence", &self.sequence)
            .field("length", &self.length)
            .field("dest", &self.dest)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// Allocate a zeroed buffer of `len` bytes without aborting on failure.
fn zeroed(len: usize) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::new();
    payload.try_reserve_exact(len)?;
    payload.resize(len, 0);
    Ok(payload)
}
