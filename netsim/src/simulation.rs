use crate::{
    channel::bounded,
    receiver::Receiver,
    sender::{self, Sender},
    switch::{self, Switch},
    terminator::Terminator,
    Completion, Config, Error, Packet, Summary, RECEIVERS, SENDERS,
};
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use tracing::info;

/// A single run of the simulated network.
pub struct Simulation<E: Spawner + Clock + Rng + Metrics> {
    context: E,
    cfg: Config,
    seed: u64,
}

impl<E: Spawner + Clock + Rng + Metrics> Simulation<E> {
    /// Create a simulation, rejecting an invalid configuration.
    ///
    /// If the configuration has no seed, one is drawn from `context`.
    pub fn new(mut context: E, cfg: Config) -> Result<Self, Error> {
        cfg.validate()?;
        let seed = cfg.seed.unwrap_or_else(|| context.gen());
        Ok(Self { context, cfg, seed })
    }

    /// Seed of every random decision in this run.
    ///
    /// Running again with this seed (on the `deterministic` runtime) replays
    /// the same destinations and drops.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Create every channel and spawn every task.
    ///
    /// Returns the terminator's handle, which resolves once every receiver has
    /// reached its stop threshold and all tasks have been aborted, and the shared
    /// [Completion] (to observe the [crate::Phase] of the run).
    pub fn start(self) -> (Handle<Summary>, Arc<Completion>) {
        let (completion, signal) = Completion::new(RECEIVERS.len());
        let mut seeds = StdRng::seed_from_u64(self.seed);
        let mut tasks = Vec::with_capacity(SENDERS.len() + 1 + RECEIVERS.len());

        // Senders feed the switch
        let mut inputs = Vec::with_capacity(SENDERS.len());
        for address in SENDERS {
            let (producer, consumer) = bounded(self.cfg.sender_capacity);
            inputs.push(consumer);
            let name = format!("sender_{address}");
            let sender = Sender::new(
                self.context.with_label(&name),
                sender::Config {
                    address,
                    seed: seeds.gen(),
                    packet_size: self.cfg.packet_size,
                    period: self.cfg.sender_period,
                    enqueue_timeout: self.cfg.enqueue_timeout,
                    allocate: Packet::new,
                },
                producer,
            );
            tasks.push((name, sender.start()));
        }

        // The switch feeds the receivers
        let mut outputs = Vec::with_capacity(RECEIVERS.len());
        for address in RECEIVERS {
            let (producer, consumer) = bounded(self.cfg.receiver_capacity);
            outputs.push(producer);
            let name = format!("receiver_{address}");
            let receiver = Receiver::new(
                self.context.with_label(&name),
                address,
                self.cfg.stop_threshold,
                consumer,
                completion.clone(),
            );
            tasks.push((name, receiver.start()));
        }
        let switch = Switch::new(
            self.context.with_label("switch"),
            switch::Config {
                seed: seeds.gen(),
                drop_probability: self.cfg.drop_probability,
                forward_delay: self.cfg.forward_delay,
            },
            inputs,
            outputs,
        );
        tasks.push(("switch".to_string(), switch.start()));

        info!(cfg = ?self.cfg, "simulation started");
        let terminator = Terminator::new(
            self.context.with_label("terminator"),
            completion.clone(),
            signal,
            tasks,
        );
        (terminator.start(), completion)
    }
}
