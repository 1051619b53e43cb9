//! A cycle-accurate simulator of snooping cache coherence (MSI, MESI and Dragon)
//! for a small shared-bus multiprocessor.

pub mod coherence;
pub mod commons;
pub mod report;
pub mod utils;

pub use coherence::Simulator;
pub use commons::{Addr, Protocol, SystemSpec};
pub use report::Report;
