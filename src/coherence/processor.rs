use log::debug;

use super::bus::Bus;
use super::cache::Cache;
use super::common::CoreId;
use super::protocol::ProtocolError;
use crate::commons::Instr;
use crate::utils::Trace;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ProcState {
    #[default]
    Ready,
    ExecutingOther,
    WaitingForCache,
    Done,
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct ProcStats {
    // cycle counters
    pub compute_cycles: u64,
    pub idle_cycles: u64,
    /// cycle in which the end of the stream was reached
    pub finished_at: Option<u64>,

    // instruction counters
    pub load_count: u64,
    pub store_count: u64,
}

pub struct Processor {
    pub id: CoreId,
    pub state: ProcState,
    trace: Trace,
    stats: ProcStats,
}

impl Processor {
    pub fn new(id: CoreId, trace: Trace) -> Self {
        Processor {
            id,
            state: ProcState::Ready,
            trace,
            stats: ProcStats::default(),
        }
    }

    pub fn stats(&self) -> &ProcStats {
        &self.stats
    }

    pub fn is_done(&self) -> bool {
        self.state == ProcState::Done
    }

    /// one cycle of this core: the cache picks up its own completed request,
    /// and unless the core is stalled or done it then executes the next instruction
    pub fn tick(&mut self, cycle: u64, cache: &mut Cache, bus: &mut Bus) -> Result<(), ProtocolError> {
        let stalled = cache.is_stalled();
        cache.poll(cycle, bus)?;
        if self.state == ProcState::Done {
            return Ok(());
        }
        if stalled {
            self.stats.idle_cycles += 1;
            self.state = ProcState::WaitingForCache;
            return Ok(());
        }
        self.state = match self.trace.next_instr() {
            Instr::Read(addr) => {
                self.stats.load_count += 1;
                cache.load(addr, bus)?;
                ProcState::Ready
            }
            Instr::Write(addr) => {
                self.stats.store_count += 1;
                cache.store(addr, bus)?;
                ProcState::Ready
            }
            Instr::Other => {
                self.stats.compute_cycles += 1;
                ProcState::ExecutingOther
            }
            Instr::End => {
                debug!("core {}: done at cycle {}", self.id, cycle);
                self.stats.finished_at = Some(cycle);
                ProcState::Done
            }
        };
        Ok(())
    }
}
