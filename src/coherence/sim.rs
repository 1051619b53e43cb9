use log::{info, warn};

use super::bus::Bus;
use super::cache::Cache;
use super::processor::Processor;
use super::protocol::ProtocolError;
use crate::commons::{ConfigError, SystemSpec};
use crate::utils::Trace;

/// The cycle loop: every cycle all caches snoop, then each core is stepped in
/// order, then the bus.
pub struct Simulator {
    specs: SystemSpec,
    cycle: u64,
    procs: Vec<Processor>,
    caches: Vec<Cache>,
    bus: Bus,
}

impl Simulator {
    pub fn new(specs: SystemSpec, traces: Vec<Trace>) -> Result<Self, ConfigError> {
        specs.validate()?;
        let geo = specs.geometry();
        info!(
            "{} protocol, {} byte {}-way cache, {} byte blocks ({} offset / {} index / {} tag bits)",
            specs.protocol,
            specs.cache_size,
            specs.cache_assoc,
            specs.block_size,
            geo.offset_bits,
            geo.index_bits,
            geo.tag_bits
        );
        let procs = traces
            .into_iter()
            .enumerate()
            .map(|(i, t)| Processor::new(i, t))
            .collect::<Vec<_>>();
        let caches = (0..procs.len()).map(|i| Cache::new(i, &specs)).collect();
        Ok(Simulator {
            specs,
            cycle: 0,
            procs,
            caches,
            bus: Bus::new(specs),
        })
    }

    /// simulate one cycle; returns whether the run is over
    pub fn step(&mut self) -> Result<bool, ProtocolError> {
        let cycle = self.cycle;
        // peers see the active request before its owner can resolve it
        for cache in self.caches.iter_mut() {
            cache.snoop(&mut self.bus)?;
        }
        for (proc, cache) in self.procs.iter_mut().zip(self.caches.iter_mut()) {
            proc.tick(cycle, cache, &mut self.bus)?;
        }
        self.bus.tick(cycle);
        self.cycle += 1;
        Ok(self.is_done())
    }

    /// every core has reached the end of its stream; traffic still in flight
    /// does not hold the run open
    pub fn is_done(&self) -> bool {
        self.procs.iter().all(|p| p.is_done())
    }

    /// run to completion (or until `max_cycles`); returns the last simulated cycle
    pub fn run(&mut self, max_cycles: Option<u64>) -> Result<u64, ProtocolError> {
        while !self.step()? {
            if max_cycles.map_or(false, |max| self.cycle >= max) {
                warn!("stopping after {} cycles, cores still running", self.cycle);
                break;
            }
        }
        info!("finished simulation in {} cycles", self.cycle);
        Ok(self.cycle - 1)
    }

    /// number of simulated cycles
    pub fn cycles(&self) -> u64 {
        self.cycle
    }
    pub fn specs(&self) -> &SystemSpec {
        &self.specs
    }
    pub fn processors(&self) -> &[Processor] {
        &self.procs
    }
    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }
    pub fn bus(&self) -> &Bus {
        &self.bus
    }
}
