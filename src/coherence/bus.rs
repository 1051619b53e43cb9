use std::collections::VecDeque;

use log::trace;

use super::common::*;
use super::protocol::PeerResponse;
use crate::commons::{Addr, Protocol, SystemSpec};

/// The shared bus. Requests are serviced one at a time in arrival order, except
/// flushes which jump the queue. The next request is only taken once the owner
/// of the active one has acknowledged it.
#[derive(Debug)]
pub struct Bus {
    specs: SystemSpec,
    pending: VecDeque<BusRequest>,
    active: Option<BusRequest>,
    completed: bool,
    has_result: bool,               // a peer (or memory) can answer the active request
    shared: bool,                   // some peer holds a valid copy (wired OR)
    update_acked: bool,
    expected_completion: u64,
    dequeued_at: u64,
    next_id: u64,
    // stats
    traffic: u64,
    transactions: u64,
}

impl Bus {
    pub fn new(specs: SystemSpec) -> Self {
        Bus {
            specs,
            pending: VecDeque::new(),
            active: None,
            completed: true,
            has_result: false,
            shared: false,
            update_acked: false,
            expected_completion: 0,
            dequeued_at: 0,
            next_id: 0,
            traffic: 0,
            transactions: 0,
        }
    }

    // timing

    fn cost(&self, kind: BusTransactionKind) -> u64 {
        let t = match (self.specs.protocol, kind) {
            (Protocol::Dragon, _) => self.specs.t_word_transfer(),
            (_, BusTransactionKind::BusFlush) => self.specs.t_flush(),
            _ => self.specs.t_block_transfer(),
        };
        t.max(1) as u64
    }
    fn bytes(&self, kind: BusTransactionKind) -> u64 {
        match kind {
            k if k.is_fill() => self.specs.block_size as u64,
            BusTransactionKind::BusUpdate => self.specs.word_size as u64,
            _ => 0,
        }
    }

    // requests

    pub fn enqueue(&mut self, mut req: BusRequest) -> u64 {
        self.next_id += 1;
        req.id = self.next_id;
        trace!("bus: queued {}", req);
        self.pending.push_back(req);
        req.id
    }

    /// queue a write-back ahead of everything else; it also answers the active request
    pub fn flush(&mut self, core: CoreId, addr: Addr) -> u64 {
        self.next_id += 1;
        let mut req = BusRequest::new(BusTransactionKind::BusFlush, core, addr);
        req.id = self.next_id;
        trace!("bus: queued {} ahead", req);
        self.pending.push_front(req);
        self.supply();
        req.id
    }

    // signals from snooping caches

    pub fn supply(&mut self) {
        self.has_result = true;
        self.shared = true;
    }
    pub fn assert_shared(&mut self) {
        self.shared = true;
    }
    pub fn acknowledge_update(&mut self) {
        self.update_acked = true;
    }

    // signals from the requesting cache

    /// the owner of the active request has taken the result
    pub fn acknowledge(&mut self) {
        if let Some(req) = self.active.take() {
            self.traffic += self.bytes(req.kind);
            self.transactions += 1;
            trace!("bus: {} acknowledged", req);
        }
    }

    /// nobody answered, the request is served by memory instead; the trip
    /// ends `mem_lat` cycles after the request got the bus
    pub fn extend_for_memory(&mut self, cycle: u64) {
        let done = self.dequeued_at + self.specs.t_mem_fetch() as u64;
        self.expected_completion = done.max(cycle);
        self.completed = false;
        self.has_result = true;
    }

    /// advance one cycle
    pub fn tick(&mut self, cycle: u64) {
        if self.active.is_some() {
            self.completed = cycle >= self.expected_completion;
            return;
        }
        if let Some(req) = self.pending.pop_front() {
            self.has_result = false;
            self.shared = false;
            self.update_acked = false;
            self.dequeued_at = cycle;
            self.expected_completion = cycle + self.cost(req.kind) - 1;
            self.completed = cycle >= self.expected_completion;
            trace!("bus: cycle {} running {} until {}", cycle, req, self.expected_completion);
            self.active = Some(req);
        }
    }

    // state

    pub fn active(&self) -> Option<&BusRequest> {
        self.active.as_ref()
    }
    pub fn is_completed(&self) -> bool {
        self.completed
    }
    pub fn has_result(&self) -> bool {
        self.has_result
    }
    pub fn peer_response(&self) -> PeerResponse {
        PeerResponse {
            had_copy: self.shared,
            update_acked: self.update_acked,
        }
    }
    pub fn expected_completion(&self) -> u64 {
        self.expected_completion
    }
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.pending.is_empty()
    }
    /// bytes moved over the bus so far
    pub fn traffic(&self) -> u64 {
        self.traffic
    }
    pub fn transactions(&self) -> u64 {
        self.transactions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BusTransactionKind::*;

    fn bus(protocol: Protocol) -> Bus {
        Bus::new(SystemSpec { protocol, ..Default::default() })
    }

    #[test]
    fn fifo_order() {
        let mut bus = bus(Protocol::MSI);
        let a = bus.enqueue(BusRequest::new(BusRead, 0, Addr(0)));
        let b = bus.enqueue(BusRequest::new(BusRead, 1, Addr(64)));
        assert!(a < b);
        bus.tick(0);
        assert_eq!(bus.active().map(|r| r.id), Some(a));
        // not taken until acknowledged
        bus.tick(100);
        assert_eq!(bus.active().map(|r| r.id), Some(a));
        bus.acknowledge();
        bus.tick(101);
        assert_eq!(bus.active().map(|r| r.id), Some(b));
    }

    #[test]
    fn flush_jumps_the_queue() {
        let mut bus = bus(Protocol::MSI);
        let _ = bus.enqueue(BusRequest::new(BusRead, 0, Addr(0)));
        bus.tick(0);
        let _ = bus.enqueue(BusRequest::new(BusReadExclusive, 2, Addr(128)));
        let f = bus.flush(1, Addr(0));
        assert!(bus.has_result());
        bus.acknowledge();
        bus.tick(1);
        assert_eq!(bus.active().map(|r| r.id), Some(f));
        assert_eq!(bus.expected_completion(), 1 + 100 - 1);
        assert_eq!(bus.pending(), 1);
    }

    #[test]
    fn block_transfer_timing() {
        // 32 byte blocks, 8 words, 1 cycle per word
        let mut bus = bus(Protocol::MESI);
        let _ = bus.enqueue(BusRequest::new(BusRead, 0, Addr(0)));
        bus.tick(10);
        assert!(!bus.is_completed());
        assert_eq!(bus.expected_completion(), 17);
        for cycle in 11..17 {
            bus.tick(cycle);
            assert!(!bus.is_completed(), "cycle {cycle}");
        }
        bus.tick(17);
        assert!(bus.is_completed());
    }

    #[test]
    fn memory_is_an_extension() {
        let mut bus = bus(Protocol::MSI);
        let _ = bus.enqueue(BusRequest::new(BusRead, 0, Addr(0)));
        bus.tick(0);
        for cycle in 1..8 {
            bus.tick(cycle);
        }
        assert!(bus.is_completed());
        // requester notices at cycle 8 that nobody answered
        bus.extend_for_memory(8);
        assert!(!bus.is_completed());
        assert!(bus.has_result());
        assert_eq!(bus.expected_completion(), 100);
    }

    #[test]
    fn dragon_is_word_granular() {
        let mut bus = bus(Protocol::Dragon);
        let _ = bus.enqueue(BusRequest::new(ProcessorReadMiss, 3, Addr(0)));
        bus.tick(5);
        assert_eq!(bus.expected_completion(), 5);
        // a single word is done as soon as it is on the bus
        assert!(bus.is_completed());
        bus.extend_for_memory(6);
        assert!(!bus.is_completed());
        assert_eq!(bus.expected_completion(), 5 + 100);
    }

    #[test]
    fn memory_time_counts_from_dequeue() {
        // the same deadline whatever the transfer granularity
        for protocol in [Protocol::MSI, Protocol::MESI, Protocol::Dragon] {
            let mut bus = bus(protocol);
            let _ = bus.enqueue(BusRequest::new(BusRead, 0, Addr(0)));
            bus.tick(20);
            let mut cycle = 21;
            while !bus.is_completed() {
                bus.tick(cycle);
                cycle += 1;
            }
            bus.extend_for_memory(cycle);
            assert_eq!(bus.expected_completion(), 120, "{protocol}");
        }
    }

    #[test]
    fn signals_reset_per_request() {
        let mut bus = bus(Protocol::Dragon);
        let _ = bus.enqueue(BusRequest::new(BusUpdate, 0, Addr(0)));
        let _ = bus.enqueue(BusRequest::new(BusUpdate, 0, Addr(0)));
        bus.tick(0);
        bus.supply();
        bus.acknowledge_update();
        assert_eq!(bus.peer_response(), PeerResponse { had_copy: true, update_acked: true });
        bus.acknowledge();
        bus.tick(1);
        assert_eq!(bus.peer_response(), PeerResponse::default());
        assert!(!bus.has_result());
    }

    #[test]
    fn traffic_counts_blocks_and_words() {
        let mut bus = bus(Protocol::Dragon);
        let _ = bus.enqueue(BusRequest::new(ProcessorWriteMiss, 0, Addr(0)));
        let _ = bus.enqueue(BusRequest::new(BusUpdate, 0, Addr(0)));
        let _ = bus.flush(1, Addr(0));
        for cycle in 0..3 {
            bus.tick(cycle);
            bus.acknowledge();
        }
        assert_eq!(bus.traffic(), 32 + 4);
        assert_eq!(bus.transactions(), 3);
        assert!(bus.is_idle());
    }
}
