//! Bounded FIFO of packets between exactly one producer and one consumer.
//!
//! Built on [futures::channel::mpsc]. An `mpsc` channel created with `buffer`
//! holds `buffer + senders` messages, so [bounded] creates it with
//! `capacity - 1` and never hands out more than one (non-cloneable) [Producer].

use crate::Packet;
use futures::{
    channel::mpsc::{self, TrySendError},
    future::poll_fn,
    StreamExt,
};
use thiserror::Error;

/// Errors returned when a packet cannot be enqueued.
///
/// The rejected packet is handed back so the caller decides when it is destroyed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("channel full")]
    Full(Packet),
    #[error("channel closed")]
    Closed(Packet),
}

impl Error {
    /// Take back ownership of the rejected packet.
    pub fn into_packet(self) -> Packet {
        match self {
            Error::Full(packet) | Error::Closed(packet) => packet,
        }
    }
}

/// Errors returned when no packet can be dequeued without waiting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryRecvError {
    #[error("channel empty")]
    Empty,
    #[error("channel closed")]
    Closed,
}

/// Create a channel that holds at most `capacity` packets.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded(capacity: usize) -> (Producer, Consumer) {
    assert!(capacity > 0, "channel capacity must be non-zero");
    let (sender, receiver) = mpsc::channel(capacity - 1);
    (Producer { sender }, Consumer { receiver })
}

/// Enqueuing end of a channel.
pub struct Producer {
    sender: mpsc::Sender<Packet>,
}

impl Producer {
    /// Enqueue a packet if there is room, without waiting.
    pub fn try_send(&mut self, packet: Packet) -> Result<(), Error> {
        self.sender.try_send(packet).map_err(reject)
    }

    /// Wait until the channel has room for another packet.
    ///
    /// Returns `false` if the consumer is gone.
    pub async fn ready(&mut self) -> bool {
        poll_fn(|cx| self.sender.poll_ready(cx)).await.is_ok()
    }

    /// Enqueue a packet, waiting for room if the channel is full.
    pub async fn send(&mut self, packet: Packet) -> Result<(), Error> {
        if !self.ready().await {
            return Err(Error::Closed(packet));
        }
        self.try_send(packet)
    }

    /// Returns whether the consumer is gone.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Dequeuing end of a channel.
pub struct Consumer {
    receiver: mpsc::Receiver<Packet>,
}

impl Consumer {
    /// Wait for the next packet.
    ///
    /// Returns `None` once the producer is gone and the channel is drained.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.receiver.next().await
    }

    /// Dequeue the next packet if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Result<Packet, TryRecvError> {
        match self.receiver.try_next() {
            Ok(Some(packet)) => Ok(packet),
            Ok(None) => Err(TryRecvError::Closed),
            Err(_) => Err(TryRecvError::Empty),
        }
    }
}

fn reject(err: TrySendError<Packet>) -> Error {
    if err.is_full() {
        Error::Full(err.into_inner())
    } else {
        Error::Closed(err.into_inner())
    }
}
