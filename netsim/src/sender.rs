//! Generate packets on a fixed period.

use crate::{
    channel::{self, Producer},
    Error, Packet, RECEIVERS,
};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use prometheus_client::metrics::counter::Counter;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Duration;
use tracing::{error, info, warn};

/// Allocates a packet from (sender, destination, sequence, size).
pub type Allocate = fn(u8, u8, u32, usize) -> Result<Packet, Error>;

/// Configuration for a [Sender].
pub struct Config {
    /// Address stamped on every generated packet.
    pub address: u8,

    /// Seed of the generator picking destinations.
    pub seed: u64,

    /// Serialized size of every generated packet.
    pub packet_size: usize,

    /// Period between two generated packets.
    pub period: Duration,

    /// How long to wait for room in a full channel before destroying the packet
    /// (`None` waits indefinitely).
    pub enqueue_timeout: Option<Duration>,

    /// Allocator of new packets (usually [Packet::new]).
    pub allocate: Allocate,
}

/// Task that generates one packet per period, addressed to a random receiver.
///
/// Sequence numbers are tracked per destination, so each receiver sees a
/// contiguous sequence from this sender unless packets are lost.
pub struct Sender<E: Spawner + Clock + Metrics> {
    context: E,
    rng: StdRng,
    address: u8,
    packet_size: usize,
    period: Duration,
    enqueue_timeout: Option<Duration>,
    allocate: Allocate,

    outbox: Producer,
    sequences: [u32; RECEIVERS.len()],

    generated: Counter,
    rejected: Counter,
    allocation_failures: Counter,
}

impl<E: Spawner + Clock + Metrics> Sender<E> {
    pub fn new(context: E, cfg: Config, outbox: Producer) -> Self {
        let generated = Counter::default();
        let rejected = Counter::default();
        let allocation_failures = Counter::default();
        context.register("generated", "packets generated", generated.clone());
        context.register(
            "rejected",
            "packets destroyed because they could not be enqueued",
            rejected.clone(),
        );
        context.register(
            "allocation_failures",
            "periods skipped because a packet could not be allocated",
            allocation_failures.clone(),
        );

        Self {
            context,
            rng: StdRng::seed_from_u64(cfg.seed),
            address: cfg.address,
            packet_size: cfg.packet_size,
            period: cfg.period,
            enqueue_timeout: cfg.enqueue_timeout,
            allocate: cfg.allocate,
            outbox,
            sequences: [0; RECEIVERS.len()],
            generated,
            rejected,
            allocation_failures,
        }
    }

    /// Start generating packets until the task is aborted.
    pub fn start(self) -> Handle<()> {
        self.context.clone().spawn(|_| self.run())
    }

    async fn run(mut self) {
        // Deadlines are absolute so time spent blocked on the channel does not
        // push later packets back
        let mut deadline = self.context.current();
        loop {
            self.generate().await;
            deadline += self.period;
            self.context.sleep_until(deadline).await;
        }
    }

    async fn generate(&mut self) {
        let index = self.rng.gen_range(0..RECEIVERS.len());
        let dest = RECEIVERS[index];
        let seq = self.sequences[index];
        let packet = match (self.allocate)(self.address, dest, seq, self.packet_size) {
            Ok(packet) => packet,
            Err(err) => {
                self.allocation_failures.inc();
                error!(sender = self.address, ?err, "failed to allocate packet");
                return;
            }
        };
        self.sequences[index] = seq.wrapping_add(1);
        self.generated.inc();
        info!(sender = self.address, dest, seq, "generated packet");

        if let Err(err) = self.enqueue(packet).await {
            self.rejected.inc();
            warn!(
                sender = self.address,
                dest,
                seq,
                reason = %err,
                "failed to enqueue packet",
            );
            drop(err.into_packet());
        }
    }

    async fn enqueue(&mut self, packet: Packet) -> Result<(), channel::Error> {
        let packet = match self.outbox.try_send(packet) {
            Err(channel::Error::Full(packet)) => packet,
            result => return result,
        };
        let Some(timeout) = self.enqueue_timeout else {
            return self.outbox.send(packet).await;
        };
        let ready = select! {
            ready = self.outbox.ready() => {
                Some(ready)
            },
            _ = self.context.sleep(timeout) => {
                None
            },
        };
        match ready {
            Some(true) => self.outbox.try_send(packet),
            Some(false) => Err(channel::Error::Closed(packet)),
            None => Err(channel::Error::Full(packet)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{bounded, TryRecvError};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use std::{
        collections::BTreeMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    fn config(enqueue_timeout: Option<Duration>) -> Config {
        Config {
            address: 1,
            seed: 0,
            packet_size: 1000,
            period: Duration::from_millis(200),
            enqueue_timeout,
            allocate: Packet::new,
        }
    }

    /// Fails the second allocation it is asked for, succeeds otherwise.
    fn fail_second(sender: u8, dest: u8, sequence: u32, size: usize) -> Result<Packet, Error> {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        if CALLS.fetch_add(1, Ordering::Relaxed) == 1 {
            let mut buf = Vec::<u8>::new();
            return Err(buf.try_reserve_exact(usize::MAX).unwrap_err().into());
        }
        Packet::new(sender, dest, sequence, size)
    }

    #[test_traced]
    fn test_period_and_sequences() {
        let executor = deterministic::Runner::seeded(7);
        executor.start(|context| async move {
            let (producer, mut consumer) = bounded(100);
            Sender::new(context.with_label("sender"), config(None), producer).start();

            // Packets are generated at 0, 200, 400, 600 and 800ms
            context.sleep(Duration::from_millis(900)).await;
            let mut next = BTreeMap::new();
            let mut count = 0;
            while let Ok(packet) = consumer.try_recv() {
                assert_eq!(packet.sender(), 1);
                assert_eq!(packet.len(), 1000);
                assert!(RECEIVERS.contains(&packet.dest()));

                // Each destination has its own contiguous sequence
                let expected = next.entry(packet.dest()).or_insert(0u32);
                assert_eq!(packet.sequence(), *expected);
                *expected += 1;
                count += 1;
            }
            assert_eq!(count, 5);
        });
    }

    #[test_traced]
    fn test_skips_period_on_allocation_failure() {
        let executor = deterministic::Runner::seeded(0);
        executor.start(|context| async move {
            let (producer, mut consumer) = bounded(100);
            let cfg = Config {
                allocate: fail_second,
                ..config(None)
            };
            Sender::new(context.with_label("sender"), cfg, producer).start();

            // Periods at 0, 200, 400, 600 and 800ms, the one at 200ms fails
            context.sleep(Duration::from_millis(900)).await;
            let mut next = BTreeMap::new();
            let mut count = 0;
            while let Ok(packet) = consumer.try_recv() {
                // The failed period does not consume a sequence number
                let expected = next.entry(packet.dest()).or_insert(0u32);
                assert_eq!(packet.sequence(), *expected);
                *expected += 1;
                count += 1;
            }
            assert_eq!(count, 4);

            let metrics = context.encode();
            assert!(metrics.contains("sender_allocation_failures_total 1"));
            assert!(metrics.contains("sender_generated_total 4"));
            assert!(metrics.contains("sender_rejected_total 0"));
        });
    }

    #[test_traced]
    fn test_both_destinations_chosen() {
        let executor = deterministic::Runner::seeded(11);
        executor.start(|context| async move {
            let (producer, mut consumer) = bounded(100);
            Sender::new(context.with_label("sender"), config(None), producer).start();
            context.sleep(Duration::from_secs(10)).await;

            let mut seen = BTreeMap::new();
            while let Ok(packet) = consumer.try_recv() {
                *seen.entry(packet.dest()).or_insert(0) += 1;
            }
            assert_eq!(seen.len(), RECEIVERS.len());
            assert_eq!(seen.values().sum::<u32>(), 50);
        });
    }

    #[test_traced]
    fn test_destinations_follow_seed() {
        // The runtime seed changes scheduling, not the destinations picked
        let destinations = |runtime_seed: u64, seed: u64| {
            let executor = deterministic::Runner::seeded(runtime_seed);
            executor.start(|context| async move {
                let (producer, mut consumer) = bounded(100);
                let cfg = Config {
                    seed,
                    ..config(None)
                };
                Sender::new(context.with_label("sender"), cfg, producer).start();
                context.sleep(Duration::from_secs(5)).await;

                let mut destinations = Vec::new();
                while let Ok(packet) = consumer.try_recv() {
                    destinations.push(packet.dest());
                }
                destinations
            })
        };
        let first = destinations(1, 42);
        assert_eq!(first.len(), 25);
        assert_eq!(first, destinations(2, 42));
        assert_ne!(first, destinations(1, 43));
    }

    #[test_traced]
    fn test_blocks_when_full() {
        let executor = deterministic::Runner::seeded(3);
        executor.start(|context| async move {
            let (producer, mut consumer) = bounded(1);
            Sender::new(context.with_label("sender"), config(None), producer).start();

            // Nothing is consumed for a while: the sender waits instead of dropping
            context.sleep(Duration::from_secs(2)).await;
            let mut next = BTreeMap::new();
            for _ in 0..20 {
                let packet = consumer.recv().await.unwrap();
                let expected = next.entry(packet.dest()).or_insert(0u32);
                assert_eq!(packet.sequence(), *expected);
                *expected += 1;
            }
            assert!(context.encode().contains("sender_rejected_total 0"));
        });
    }

    #[test_traced]
    fn test_rejects_after_timeout() {
        let executor = deterministic::Runner::seeded(3);
        executor.start(|context| async move {
            let (producer, mut consumer) = bounded(1);
            Sender::new(
                context.with_label("sender"),
                config(Some(Duration::from_millis(10))),
                producer,
            )
            .start();
            context.sleep(Duration::from_millis(1_100)).await;

            // First packet is held, the next five are destroyed
            assert_eq!(consumer.try_recv().unwrap().sequence(), 0);
            assert_eq!(consumer.try_recv().unwrap_err(), TryRecvError::Empty);
            let metrics = context.encode();
            assert!(metrics.contains("sender_generated_total 6"));
            assert!(metrics.contains("sender_rejected_total 5"));
        });
    }

    #[test_traced]
    fn test_rejects_when_closed() {
        let executor = deterministic::Runner::seeded(5);
        executor.start(|context| async move {
            let (producer, consumer) = bounded(4);
            drop(consumer);
            Sender::new(context.with_label("sender"), config(None), producer).start();
            context.sleep(Duration::from_millis(500)).await;

            let metrics = context.encode();
            assert!(metrics.contains("sender_generated_total 3"));
            assert!(metrics.contains("sender_rejected_total 3"));
        });
    }
}
