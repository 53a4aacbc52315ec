//! Relay packets from senders to receivers with random drops and a fixed delay.

use crate::{
    channel::{Consumer, Producer, TryRecvError},
    metrics::Route,
    receiver_index, Packet,
};
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use futures::future::select_all;
use prometheus_client::metrics::{counter::Counter, family::Family};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Configuration for a [Switch].
pub struct Config {
    /// Seed of the generator deciding drops.
    pub seed: u64,

    /// Probability (in range [0,1]) that a packet is dropped.
    pub drop_probability: f64,

    /// Delay applied to every forwarded packet.
    pub forward_delay: Duration,
}

/// Task relaying packets from sender channels to receiver channels.
///
/// Sender channels are polled in order, taking at most one packet from each per
/// pass, so a busy sender cannot starve the other. Packets are forwarded one at
/// a time: a full receiver channel blocks the switch, which in turn lets sender
/// channels fill up.
pub struct Switch<E: Spawner + Clock + Metrics> {
    context: E,
    rng: StdRng,
    drop_probability: f64,
    forward_delay: Duration,

    inputs: Vec<Consumer>,
    outputs: Vec<Producer>,

    dropped: Family<Route, Counter>,
    forwarded: Family<Route, Counter>,
    invalid: Counter,
    undeliverable: Counter,
}

impl<E: Spawner + Clock + Metrics> Switch<E> {
    /// Create a switch reading from `inputs` (one per sender) and writing to
    /// `outputs` (one per receiver, in the order of [crate::RECEIVERS]).
    pub fn new(context: E, cfg: Config, inputs: Vec<Consumer>, outputs: Vec<Producer>) -> Self {
        let dropped = Family::<Route, Counter>::default();
        let forwarded = Family::<Route, Counter>::default();
        let invalid = Counter::default();
        let undeliverable = Counter::default();
        context.register("dropped", "packets dropped", dropped.clone());
        context.register("forwarded", "packets forwarded", forwarded.clone());
        context.register(
            "invalid",
            "packets with an invalid destination",
            invalid.clone(),
        );
        context.register(
            "undeliverable",
            "packets whose receiver channel was closed",
            undeliverable.clone(),
        );

        Self {
            context,
            rng: StdRng::seed_from_u64(cfg.seed),
            drop_probability: cfg.drop_probability,
            forward_delay: cfg.forward_delay,
            inputs,
            outputs,
            dropped,
            forwarded,
            invalid,
            undeliverable,
        }
    }

    /// Start relaying packets until every sender channel is closed or the task
    /// is aborted.
    pub fn start(self) -> Handle<()> {
        self.context.clone().spawn(|_| self.run())
    }

    async fn run(mut self) {
        let mut open = vec![true; self.inputs.len()];
        loop {
            // Take at most one packet from each sender
            let mut idle = true;
            for index in 0..self.inputs.len() {
                if !open[index] {
                    continue;
                }
                match self.inputs[index].try_recv() {
                    Ok(packet) => {
                        idle = false;
                        self.process(packet).await;
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Closed) => {
                        debug!(input = index, "sender channel closed");
                        open[index] = false;
                    }
                }
            }
            if !idle {
                continue;
            }

            // Nothing was ready, so wait for the first sender to produce
            if !open.iter().any(|open| *open) {
                info!("all sender channels closed");
                return;
            }
            let (index, packet) = {
                let pending = self
                    .inputs
                    .iter_mut()
                    .enumerate()
                    .filter(|(index, _)| open[*index])
                    .map(|(index, input)| Box::pin(async move { (index, input.recv().await) }));
                select_all(pending).await.0
            };
            match packet {
                Some(packet) => self.process(packet).await,
                None => {
                    debug!(input = index, "sender channel closed");
                    open[index] = false;
                }
            }
        }
    }

    async fn process(&mut self, packet: Packet) {
        let (sender, dest, seq) = (packet.sender(), packet.dest(), packet.sequence());
        if self.rng.gen::<f64>() < self.drop_probability {
            self.dropped.get_or_create(&Route::new(sender, dest)).inc();
            info!(sender, dest, seq, "dropped packet");
            return;
        }
        self.context.sleep(self.forward_delay).await;

        let Some(output) = receiver_index(dest).and_then(|index| self.outputs.get_mut(index))
        else {
            self.invalid.inc();
            error!(sender, dest, seq, "invalid destination");
            return;
        };
        info!(sender, dest, seq, "forwarding packet");
        if let Err(err) = output.send(packet).await {
            self.undeliverable.inc();
            warn!(sender, dest, seq, reason = %err, "failed to forward packet");
            drop(err.into_packet());
            return;
        }
        self.forwarded.get_or_create(&Route::new(sender, dest)).inc();
    }
}
