//! Command line interface for the `dissemination-sim` binary.
//!
//! The simulator fragments a batch of messages, loses some of them on a
//! lossy link, and lets the request cycle recover the rest.

use clap::{Parser, ValueEnum};

/// Delivery discipline the simulated subscriber asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Ordering {
    /// In order, requesting anything missing.
    SequencedReliable,
    /// In order, dropping anything late.
    SequencedUnreliable,
    /// As it arrives, requesting anything missing.
    Reliable,
    /// As it arrives, once per message.
    BestEffort,
}

impl Ordering {
    /// Sequencing and reliability flags for this discipline.
    #[must_use]
    pub const fn flags(self) -> (bool, bool) {
        match self {
            Self::SequencedReliable => (true, true),
            Self::SequencedUnreliable => (true, false),
            Self::Reliable => (false, true),
            Self::BestEffort => (false, false),
        }
    }
}

/// Command line arguments for the `dissemination-sim` binary.
#[derive(Debug, Parser)]
#[command(
    name = "dissemination-sim",
    version,
    about = "Simulate fragment loss and recovery on a broadcast link"
)]
pub struct Cli {
    /// Number of messages the publisher sends.
    #[arg(short, long, default_value_t = 8)]
    pub messages: u32,

    /// Payload size of each message in bytes.
    #[arg(long, default_value_t = 1_000)]
    pub size: u32,

    /// Largest fragment payload the link carries.
    #[arg(long, default_value_t = 256)]
    pub mtu: u32,

    /// Percent of fragments lost on first transmission.
    #[arg(long, default_value_t = 30)]
    pub loss: u8,

    /// Seed for the loss pattern and request jitter.
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Request cycles to run before giving up.
    #[arg(long, default_value_t = 10)]
    pub cycles: u32,

    /// Delivery discipline of the subscriber.
    #[arg(long, value_enum, default_value_t = Ordering::SequencedReliable)]
    pub ordering: Ordering,
}
