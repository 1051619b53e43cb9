use std::fmt;

use crate::coherence::{CacheStats, ProcStats, Simulator};
use crate::commons::{Protocol, SystemSpec};

/// Counters of one core and its cache.
#[derive(Clone, Copy, Debug)]
pub struct CoreReport {
    pub proc: ProcStats,
    pub cache: CacheStats,
}

/// Aggregate statistics of a finished run.
#[derive(Clone, Debug)]
pub struct Report {
    pub specs: SystemSpec,
    pub cycles: u64,
    pub cores: Vec<CoreReport>,
    pub bus_traffic: u64,
    pub bus_transactions: u64,
}

impl Report {
    pub fn new(sim: &Simulator) -> Self {
        let cores = sim
            .processors()
            .iter()
            .zip(sim.caches())
            .map(|(p, c)| CoreReport { proc: *p.stats(), cache: *c.stats() })
            .collect();
        Report {
            specs: *sim.specs(),
            cycles: sim.cycles(),
            cores,
            bus_traffic: sim.bus().traffic(),
            bus_transactions: sim.bus().transactions(),
        }
    }

    fn sum(&self, f: impl Fn(&CacheStats) -> u64) -> u64 {
        self.cores.iter().map(|c| f(&c.cache)).sum()
    }

    pub fn invalidations(&self) -> u64 {
        self.sum(|c| c.invalidations)
    }
    pub fn updates(&self) -> u64 {
        self.sum(|c| c.updates)
    }
    pub fn private_accesses(&self) -> u64 {
        self.sum(|c| c.private_accesses)
    }
    pub fn shared_accesses(&self) -> u64 {
        self.sum(|c| c.shared_accesses)
    }

    /// average cycles per access: hits cost one cycle, peer fills one transfer
    /// (a word under Dragon, a block otherwise), memory fills the memory latency
    pub fn average_latency(&self) -> f64 {
        let accesses = self.sum(|c| c.accesses);
        if accesses == 0 {
            return 0.0;
        }
        let transfer = match self.specs.protocol {
            Protocol::Dragon => self.specs.t_word_transfer(),
            Protocol::MSI | Protocol::MESI => self.specs.t_block_transfer(),
        };
        let cycles = self.sum(|c| c.hits())
            + self.sum(|c| c.peer_fills) * transfer as u64
            + self.sum(|c| c.memory_accesses) * self.specs.t_mem_fetch() as u64;
        cycles as f64 / accesses as f64
    }
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 { 0.0 } else { 100.0 * n as f64 / d as f64 }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} | {} B cache, {}-way, {} B blocks",
            self.specs.protocol, self.specs.cache_size, self.specs.cache_assoc, self.specs.block_size
        )?;
        writeln!(f, "overall execution cycles: {}", self.cycles)?;
        writeln!(
            f,
            "{:>4} {:>10} {:>10} {:>10} {:>9} {:>9} {:>8} {:>8} {:>8}",
            "core", "finished", "compute", "idle", "loads", "stores", "miss %", "peer", "memory"
        )?;
        for (i, c) in self.cores.iter().enumerate() {
            let finished = c.proc.finished_at.map_or("-".to_string(), |t| t.to_string());
            writeln!(
                f,
                "{:>4} {:>10} {:>10} {:>10} {:>9} {:>9} {:>8.2} {:>8} {:>8}",
                i,
                finished,
                c.proc.compute_cycles,
                c.proc.idle_cycles,
                c.proc.load_count,
                c.proc.store_count,
                ratio(c.cache.misses(), c.cache.accesses),
                c.cache.peer_fills,
                c.cache.memory_accesses,
            )?;
        }
        writeln!(f, "bus traffic: {} bytes in {} transactions", self.bus_traffic, self.bus_transactions)?;
        writeln!(f, "invalidations: {}, updates: {}", self.invalidations(), self.updates())?;
        let private = self.private_accesses();
        let shared = self.shared_accesses();
        writeln!(
            f,
            "private accesses: {} ({:.2}%), shared accesses: {} ({:.2}%)",
            private,
            ratio(private, private + shared),
            shared,
            ratio(shared, private + shared)
        )?;
        write!(f, "average access latency: {:.2} cycles", self.average_latency())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(protocol: Protocol) -> Report {
        let cache = CacheStats {
            accesses: 4,
            read_hits: 1,
            read_misses: 2,
            write_misses: 1,
            peer_fills: 2,
            memory_accesses: 1,
            ..Default::default()
        };
        Report {
            specs: SystemSpec { protocol, ..Default::default() },
            cycles: 0,
            cores: vec![CoreReport { proc: ProcStats::default(), cache }],
            bus_traffic: 0,
            bus_transactions: 0,
        }
    }

    #[test]
    fn peer_fills_cost_one_transfer() {
        // 1 hit, 2 peer fills, 1 memory fill
        assert_eq!(report(Protocol::MESI).average_latency(), (1.0 + 2.0 * 8.0 + 100.0) / 4.0);
        assert_eq!(report(Protocol::Dragon).average_latency(), (1.0 + 2.0 * 1.0 + 100.0) / 4.0);
    }

    #[test]
    fn no_accesses_no_latency() {
        let mut r = report(Protocol::MSI);
        r.cores.clear();
        assert_eq!(r.average_latency(), 0.0);
    }
}
