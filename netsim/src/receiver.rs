//! Consume packets and infer loss from sequence gaps.

use crate::{channel::Consumer, Completion, Packet};
use commonware_runtime::{Handle, Metrics, Spawner};
use prometheus_client::metrics::counter::Counter;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error, info, warn};

/// Final totals of a receiver that reached its stop threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    /// Address of the receiver.
    pub receiver: u8,

    /// Packets counted (always equal to the stop threshold).
    pub received: u32,

    /// Packets inferred lost from sequence gaps.
    pub lost: u32,

    /// Last sequence number seen from each sender.
    pub last_seen: BTreeMap<u8, u32>,
}

/// What a [Ledger] did with a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The packet was addressed to another receiver and was not counted.
    Misrouted,

    /// The stop threshold was already reached and the packet was not counted.
    Ignored,

    /// The packet was counted.
    Counted {
        /// Packets missing between the last one seen from this sender and this one.
        gap: u32,

        /// Whether this packet brought the receiver to its stop threshold.
        finished: bool,
    },
}

/// Per-receiver bookkeeping, owned by a single receiver.
pub struct Ledger {
    address: u8,
    threshold: u32,

    received: u32,
    lost: u32,
    last_seen: BTreeMap<u8, u32>,
}

impl Ledger {
    pub fn new(address: u8, threshold: u32) -> Self {
        Self {
            address,
            threshold,
            received: 0,
            lost: 0,
            last_seen: BTreeMap::new(),
        }
    }

    /// Account for a packet taken off the receiver's channel.
    ///
    /// Only a sequence number larger than the one expected (last seen plus one)
    /// is treated as loss. A duplicate or reordered packet is counted as received
    /// without any loss correction and still overwrites the last sequence seen.
    /// A sender never seen before is treated as if sequence 0 had been seen.
    pub fn record(&mut self, packet: &Packet) -> Outcome {
        if packet.dest() != self.address {
            return Outcome::Misrouted;
        }
        if self.finished() {
            return Outcome::Ignored;
        }
        self.received += 1;
        let last_seen = self.last_seen.entry(packet.sender()).or_insert(0);
        let expected = last_seen.wrapping_add(1);
        let gap = packet.sequence().saturating_sub(expected);
        self.lost = self.lost.saturating_add(gap);
        *last_seen = packet.sequence();
        Outcome::Counted {
            gap,
            finished: self.finished(),
        }
    }

    /// Returns whether the stop threshold has been reached.
    pub fn finished(&self) -> bool {
        self.received >= self.threshold
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn lost(&self) -> u32 {
        self.lost
    }

    /// Last sequence number seen from `sender`, if any.
    pub fn last_seen(&self, sender: u8) -> Option<u32> {
        self.last_seen.get(&sender).copied()
    }

    /// Snapshot the current totals.
    pub fn report(&self) -> Report {
        Report {
            receiver: self.address,
            received: self.received,
            lost: self.lost,
            last_seen: self.last_seen.clone(),
        }
    }
}

/// Task that drains its channel and tracks loss per sender.
///
/// Once its threshold is reached the receiver reports to the shared
/// [Completion] and keeps discarding packets, so a full channel never stalls
/// the switch while other receivers are still counting.
pub struct Receiver<E: Spawner + Metrics> {
    context: E,
    ledger: Ledger,
    inbox: Consumer,
    completion: Arc<Completion>,

    received: Counter,
    lost: Counter,
    misrouted: Counter,
    discarded: Counter,
}

impl<E: Spawner + Metrics> Receiver<E> {
    pub fn new(
        context: E,
        address: u8,
        threshold: u32,
        inbox: Consumer,
        completion: Arc<Completion>,
    ) -> Self {
        let received = Counter::default();
        let lost = Counter::default();
        let misrouted = Counter::default();
        let discarded = Counter::default();
        context.register("received", "packets counted", received.clone());
        context.register("lost", "packets inferred lost", lost.clone());
        context.register(
            "misrouted",
            "packets addressed to another receiver",
            misrouted.clone(),
        );
        context.register(
            "discarded",
            "packets discarded after the stop threshold",
            discarded.clone(),
        );

        Self {
            context,
            ledger: Ledger::new(address, threshold),
            inbox,
            completion,
            received,
            lost,
            misrouted,
            discarded,
        }
    }

    /// Start consuming packets until the channel closes or the task is aborted.
    pub fn start(self) -> Handle<()> {
        self.context.clone().spawn(|_| self.run())
    }

    /// Consume packets until the channel closes.
    ///
    /// Past the stop threshold packets are still taken off the channel and
    /// destroyed uncounted ([crate::Phase::Draining]) so the switch never
    /// blocks on a finished receiver.
    async fn run(mut self) {
        while let Some(packet) = self.inbox.recv().await {
            self.handle(&packet);
        }
        debug!(receiver = self.ledger.address, "channel closed");
    }

    fn handle(&mut self, packet: &Packet) {
        let receiver = self.ledger.address;
        let (sender, seq) = (packet.sender(), packet.sequence());
        match self.ledger.record(packet) {
            Outcome::Misrouted => {
                self.misrouted.inc();
                error!(
                    receiver,
                    dest = packet.dest(),
                    sender,
                    seq,
                    "received packet for another receiver",
                );
            }
            Outcome::Ignored => {
                self.discarded.inc();
                debug!(receiver, sender, seq, "discarding packet after threshold");
            }
            Outcome::Counted { gap, finished } => {
                self.received.inc();
                if gap > 0 {
                    self.lost.inc_by(gap.into());
                    warn!(receiver, sender, gap, "detected lost packets");
                }
                info!(
                    receiver,
                    sender,
                    seq,
                    total = self.ledger.received(),
                    lost = self.ledger.lost(),
                    "received packet",
                );
                if finished {
                    info!(
                        receiver,
                        total = self.ledger.received(),
                        lost = self.ledger.lost(),
                        "reached stop threshold",
                    );
                    if self.completion.finish(self.ledger.report()) {
                        info!(receiver, "last receiver finished");
                    }
                }
            }
        }
    }
}
