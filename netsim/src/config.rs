use crate::{packet::HEADER_SIZE, Error};
use std::time::Duration;

/// Size of every packet (in bytes).
const DEFAULT_PACKET_SIZE: usize = 1000;

/// How often each sender generates a packet.
const DEFAULT_SENDER_PERIOD: Duration = Duration::from_millis(200);

/// How long the switch holds each packet before forwarding it.
const DEFAULT_FORWARD_DELAY: Duration = Duration::from_millis(200);

/// Probability that the switch drops a packet.
const DEFAULT_DROP_PROBABILITY: f64 = 0.01;

/// Capacity of every channel.
const DEFAULT_CAPACITY: usize = 20;

/// Number of packets each receiver counts before finishing.
const DEFAULT_STOP_THRESHOLD: u32 = 200;

/// Configuration for a [crate::Simulation].
#[derive(Clone, Debug)]
pub struct Config {
    /// Serialized size of every packet (header included).
    pub packet_size: usize,

    /// Period between two packets generated by the same sender.
    pub sender_period: Duration,

    /// Delay applied by the switch to every packet it forwards.
    pub forward_delay: Duration,

    /// Probability (in range [0,1]) that the switch drops a packet.
    pub drop_probability: f64,

    /// Capacity of each sender to switch channel.
    pub sender_capacity: usize,

    /// Capacity of each switch to receiver channel.
    pub receiver_capacity: usize,

    /// Number of packets each receiver counts before it finishes.
    pub stop_threshold: u32,

    /// How long a sender waits for room in a full channel before destroying
    /// the packet.
    ///
    /// If `None`, the sender waits indefinitely.
    pub enqueue_timeout: Option<Duration>,

    /// Seed of every random decision (destinations and drops).
    ///
    /// If `None`, a seed is drawn from the runtime when the simulation is
    /// created.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            sender_period: DEFAULT_SENDER_PERIOD,
            forward_delay: DEFAULT_FORWARD_DELAY,
            drop_probability: DEFAULT_DROP_PROBABILITY,
            sender_capacity: DEFAULT_CAPACITY,
            receiver_capacity: DEFAULT_CAPACITY,
            stop_threshold: DEFAULT_STOP_THRESHOLD,
            enqueue_timeout: None,
            seed: None,
        }
    }
}

impl Config {
    /// Ensure the configuration describes a runnable simulation.
    pub fn validate(&self) -> Result<(), Error> {
        if self.packet_size < HEADER_SIZE || self.packet_size > u16::MAX as usize {
            return Err(Error::InvalidPacketSize(self.packet_size));
        }
        if !(0.0..=1.0).contains(&self.drop_probability) {
            return Err(Error::InvalidDropProbability(self.drop_probability));
        }
        if self.sender_capacity == 0 {
            return Err(Error::InvalidCapacity(self.sender_capacity));
        }
        if self.receiver_capacity == 0 {
            return Err(Error::InvalidCapacity(self.receiver_capacity));
        }
        if self.stop_threshold == 0 {
            return Err(Error::InvalidThreshold(self.stop_threshold));
        }
        if self.sender_period.is_zero() {
            return Err(Error::InvalidPeriod);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.packet_size, 1000);
        assert_eq!(cfg.sender_period, Duration::from_millis(200));
        assert_eq!(cfg.forward_delay, Duration::from_millis(200));
        assert_eq!(cfg.drop_probability, 0.01);
        assert_eq!(cfg.sender_capacity, 20);
        assert_eq!(cfg.receiver_capacity, 20);
        assert_eq!(cfg.stop_threshold, 200);
        assert!(cfg.enqueue_timeout.is_none());
        assert!(cfg.seed.is_none());
    }

    #[test]
    fn test_invalid_packet_size() {
        let cfg = Config {
            packet_size: HEADER_SIZE - 1,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidPacketSize(7))));

        let cfg = Config {
            packet_size: u16::MAX as usize + 1,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidPacketSize(_))));

        let cfg = Config {
            packet_size: HEADER_SIZE,
            ..Config::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn test_invalid_drop_probability() {
        for probability in [-0.1, 1.1, f64::NAN] {
            let cfg = Config {
                drop_probability: probability,
                ..Config::default()
            };
            assert!(matches!(
                cfg.validate(),
                Err(Error::InvalidDropProbability(_))
            ));
        }
        for probability in [0.0, 1.0] {
            let cfg = Config {
                drop_probability: probability,
                ..Config::default()
            };
            cfg.validate().unwrap();
        }
    }

    #[test]
    fn test_invalid_capacity() {
        let cfg = Config {
            sender_capacity: 0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidCapacity(0))));

        let cfg = Config {
            receiver_capacity: 0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidCapacity(0))));
    }

    #[test]
    fn test_invalid_threshold_and_period() {
        let cfg = Config {
            stop_threshold: 0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidThreshold(0))));

        let cfg = Config {
            sender_period: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidPeriod)));
    }
}
