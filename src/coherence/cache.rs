use log::{debug, trace};

use super::bus::Bus;
use super::common::*;
use super::protocol::{Access, CoherenceProtocol, ProtocolError, WriteHit};
use crate::commons::{Addr, Geometry, SystemSpec};

// data cache

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CacheLine {
    pub tag: u32,
    pub state: LineState,
}

/// One set of `ways` lines, kept in LRU order (front is least recently used).
#[derive(Clone, Debug)]
pub struct CacheSet {
    lines: Vec<CacheLine>,
    ways: usize,
}

impl CacheSet {
    pub fn new(ways: usize) -> Self {
        CacheSet { lines: Vec::with_capacity(ways), ways }
    }
    fn position(&self, tag: u32) -> Option<usize> {
        self.lines.iter().position(|l| l.tag == tag)
    }
    pub fn contains(&self, tag: u32) -> bool {
        self.position(tag).is_some()
    }
    pub fn state(&self, tag: u32) -> Option<LineState> {
        self.lines.iter().find(|l| l.tag == tag).map(|l| l.state)
    }
    pub fn set_state(&mut self, tag: u32, state: LineState) {
        if let Some(line) = self.lines.iter_mut().find(|l| l.tag == tag) {
            line.state = state;
        }
    }
    /// move the line to the most recently used position
    pub fn touch(&mut self, tag: u32) {
        if let Some(i) = self.position(tag) {
            let line = self.lines.remove(i);
            self.lines.push(line);
        }
    }
    /// place `tag` as most recently used; when the set is full an invalid line
    /// is reused first, otherwise the least recently used one is evicted
    pub fn insert_or_evict(&mut self, tag: u32, state: LineState) -> Option<CacheLine> {
        let mut evicted = None;
        if let Some(i) = self.position(tag) {
            self.lines.remove(i);
        } else if self.lines.len() == self.ways {
            let victim = self.lines
                .iter()
                .position(|l| l.state == LineState::Invalid)
                .unwrap_or(0);
            evicted = Some(self.lines.remove(victim));
        }
        self.lines.push(CacheLine { tag, state });
        evicted
    }
    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct CacheStats {
    pub accesses: u64,
    pub read_hits: u64,
    pub read_misses: u64,
    pub write_hits: u64,
    pub write_misses: u64,
    /// requests that fell through to main memory
    pub memory_accesses: u64,
    /// requests answered by a peer cache
    pub peer_fills: u64,
    /// store hits that still needed a trip to main memory
    pub write_hits_from_memory: u64,
    pub private_accesses: u64,
    pub shared_accesses: u64,
    pub invalidations: u64,
    pub updates: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.read_hits + self.write_hits
    }
    pub fn misses(&self) -> u64 {
        self.read_misses + self.write_misses
    }
}

// the request this cache is stalled on
#[derive(Clone, Copy, Debug)]
struct Outstanding {
    id: u64,
    write_hit: bool,
    from_memory: bool,
}

pub struct Cache {
    pub id: CoreId,
    protocol: &'static dyn CoherenceProtocol,
    geo: Geometry,
    data: Vec<CacheSet>,
    stalled: bool,
    outstanding: Option<Outstanding>,
    deferred: Option<BusRequest>,
    last_seen: Option<u64>,
    stats: CacheStats,
}

impl Cache {
    pub fn new(id: CoreId, specs: &SystemSpec) -> Self {
        let geo = specs.geometry();
        Cache {
            id,
            protocol: specs.protocol.table(),
            geo,
            data: (0..geo.sets).map(|_| CacheSet::new(geo.ways)).collect(),
            stalled: false,
            outstanding: None,
            deferred: None,
            last_seen: None,
            stats: CacheStats::default(),
        }
    }

    // helper functions

    fn set_and_tag_of(&self, addr: &Addr) -> (&CacheSet, u32) {
        let (index, tag) = addr.pos(&self.geo);
        (&self.data[index], tag)
    }
    fn set_and_tag_of_mut(&mut self, addr: &Addr) -> (&mut CacheSet, u32) {
        let (index, tag) = addr.pos(&self.geo);
        (&mut self.data[index], tag)
    }
    pub fn state_of(&self, addr: Addr) -> Option<LineState> {
        let (set, tag) = self.set_and_tag_of(&addr);
        set.state(tag)
    }
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }
    /// resident lines as (block address, state)
    pub fn lines(&self) -> impl Iterator<Item = (Addr, LineState)> + '_ {
        let geo = self.geo;
        self.data.iter().enumerate().flat_map(move |(index, set)| {
            set.lines().iter().map(move |l| {
                let block = (l.tag << geo.index_bits << geo.offset_bits)
                    | ((index as u32) << geo.offset_bits);
                (Addr(block), l.state)
            })
        })
    }

    fn classify(&mut self, state: LineState) {
        if state.is_private() {
            self.stats.private_accesses += 1;
        } else {
            self.stats.shared_accesses += 1;
        }
    }
    fn issue(&mut self, kind: BusTransactionKind, addr: Addr, write_hit: bool, bus: &mut Bus) {
        let id = bus.enqueue(BusRequest::new(kind, self.id, addr.block(&self.geo)));
        debug!("cache {}: stalled on {:?}({}) #{}", self.id, kind, addr, id);
        self.outstanding = Some(Outstanding { id, write_hit, from_memory: false });
        self.stalled = true;
    }
    fn install(&mut self, addr: Addr, state: LineState) {
        let id = self.id;
        let (set, tag) = self.set_and_tag_of_mut(&addr);
        if let Some(victim) = set.insert_or_evict(tag, state) {
            if victim.state.is_dirty() {
                debug!("cache {}: evicted dirty line tag {:#x} ({})", id, victim.tag, victim.state);
            }
        }
    }

    // processor side

    pub fn load(&mut self, addr: Addr, bus: &mut Bus) -> Result<(), ProtocolError> {
        self.access(Access::Load, addr, bus)
    }

    pub fn store(&mut self, addr: Addr, bus: &mut Bus) -> Result<(), ProtocolError> {
        self.access(Access::Store, addr, bus)
    }

    fn access(&mut self, access: Access, addr: Addr, bus: &mut Bus) -> Result<(), ProtocolError> {
        self.stats.accesses += 1;
        let protocol = self.protocol;
        let (set, tag) = self.set_and_tag_of(&addr);
        let hit = set.state(tag).filter(|&s| protocol.is_valid(s));
        match (access, hit) {
            // read hit
            (Access::Load, Some(state)) => {
                self.stats.read_hits += 1;
                self.classify(state);
                self.set_and_tag_of_mut(&addr).0.touch(tag);
            }
            // write hit
            (Access::Store, Some(state)) => {
                self.stats.write_hits += 1;
                self.classify(state);
                let (set, tag) = self.set_and_tag_of_mut(&addr);
                set.touch(tag);
                match protocol.on_local_hit_for_write(state)? {
                    WriteHit::Silent(next) => set.set_state(tag, next),
                    WriteHit::Bus(kind) => self.issue(kind, addr, true, bus),
                }
            }
            // read miss
            (Access::Load, None) => {
                self.stats.read_misses += 1;
                self.issue(protocol.on_local_miss(access), addr, false, bus);
            }
            // write miss
            (Access::Store, None) => {
                self.stats.write_misses += 1;
                self.issue(protocol.on_local_miss(access), addr, false, bus);
            }
        }
        Ok(())
    }

    // bus side

    /// observe other cores' traffic; called every cycle for every cache before
    /// any core looks at its own request, also while stalled or done
    pub fn snoop(&mut self, bus: &mut Bus) -> Result<(), ProtocolError> {
        if let Some(req) = self.deferred.take() {
            let _ = bus.enqueue(req);
        }
        let Some(req) = bus.active().copied() else {
            return Ok(());
        };
        if req.core != self.id && self.last_seen != Some(req.id) {
            self.last_seen = Some(req.id);
            if req.kind != BusTransactionKind::BusFlush {
                self.observe(req, bus)?;
            }
        }
        Ok(())
    }

    /// pick up the result of this cache's own request once the bus completed it
    pub fn poll(&mut self, cycle: u64, bus: &mut Bus) -> Result<(), ProtocolError> {
        match bus.active().copied() {
            Some(req) if req.core == self.id && bus.is_completed() => {
                self.on_own_completed(req, cycle, bus)
            }
            _ => Ok(()),
        }
    }

    fn on_own_completed(&mut self, req: BusRequest, cycle: u64, bus: &mut Bus) -> Result<(), ProtocolError> {
        match req.kind {
            BusTransactionKind::BusFlush => bus.acknowledge(),
            BusTransactionKind::BusUpdate => self.resolve(req, bus)?,
            _ if bus.has_result() => self.resolve(req, bus)?,
            _ => {
                // nobody could answer, go to memory
                self.stats.memory_accesses += 1;
                if let Some(o) = self.outstanding.as_mut().filter(|o| o.id == req.id) {
                    o.from_memory = true;
                    if o.write_hit {
                        self.stats.write_hits_from_memory += 1;
                    }
                }
                bus.extend_for_memory(cycle);
                debug!("cache {}: {} goes to memory at cycle {}", self.id, req, cycle);
            }
        }
        Ok(())
    }

    fn resolve(&mut self, req: BusRequest, bus: &mut Bus) -> Result<(), ProtocolError> {
        let resolution = self.protocol.on_self_resolved(req.kind, bus.peer_response())?;
        if req.kind.is_fill() {
            self.install(req.addr, resolution.state);
        } else {
            // an update only touches a line that is still resident
            let (set, tag) = self.set_and_tag_of_mut(&req.addr);
            set.set_state(tag, resolution.state);
        }
        if resolution.deferred_update {
            self.deferred = Some(BusRequest::new(BusTransactionKind::BusUpdate, self.id, req.addr));
        }
        if let Some(o) = self.outstanding.filter(|o| o.id == req.id) {
            if req.kind.is_fill() && !o.from_memory {
                self.stats.peer_fills += 1;
            }
            self.outstanding = None;
            self.stalled = false;
        }
        debug!("cache {}: resolved {} -> {}", self.id, req, resolution.state);
        bus.acknowledge();
        Ok(())
    }

    fn observe(&mut self, req: BusRequest, bus: &mut Bus) -> Result<(), ProtocolError> {
        let (index, tag) = req.addr.pos(&self.geo);
        let Some(state) = self.data[index].state(tag) else {
            return Ok(());
        };
        let action = self.protocol.on_foreign_transaction(state, req.kind)?;
        if self.protocol.is_valid(state) {
            bus.assert_shared();
        }
        if action.supply {
            bus.supply();
        }
        if action.flush {
            let _ = bus.flush(self.id, req.addr);
        }
        if action.update {
            bus.acknowledge_update();
            self.stats.updates += 1;
        }
        if action.invalidate {
            self.stats.invalidations += 1;
        }
        self.data[index].set_state(tag, action.state);
        trace!("cache {}: observed {}, {} -> {}", self.id, req, state, action.state);
        Ok(())
    }
}
