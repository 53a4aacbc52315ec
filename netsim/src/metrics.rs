//! Label sets for metrics recorded per route.

use prometheus_client::encoding::EncodeLabelSet;

/// A (sender, receiver) pair a packet travels between.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Route {
    pub sender: u32,
    pub receiver: u32,
}

impl Route {
    pub fn new(sender: u8, receiver: u8) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
        }
    }
}
