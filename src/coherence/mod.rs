mod bus;
mod cache;
mod common;
mod processor;
mod protocol;
mod sim;

pub use bus::Bus;
pub use cache::{Cache, CacheLine, CacheSet, CacheStats};
pub use common::*;
pub use processor::{ProcState, ProcStats, Processor};
pub use protocol::*;
pub use sim::Simulator;

pub const NUM_PROCS: usize = 4;
