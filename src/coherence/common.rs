use std::fmt;

use crate::commons::Addr;

/// Coherence state of a resident cache line.
///
/// Which states are reachable depends on the protocol: MSI uses `Modified`,
/// `SharedClean` and `Invalid`, MESI adds `Exclusive`, Dragon replaces `Invalid`
/// with `SharedModified`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum LineState {
    Modified,
    SharedClean,
    Invalid,
    Exclusive,
    SharedModified,
}

impl LineState {
    /// the line is owned by this cache alone
    pub fn is_private(&self) -> bool {
        matches!(self, LineState::Modified | LineState::Exclusive)
    }
    /// the line differs from memory
    pub fn is_dirty(&self) -> bool {
        matches!(self, LineState::Modified | LineState::SharedModified)
    }
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LineState::Modified => "M",
            LineState::SharedClean => "Sc",
            LineState::Invalid => "I",
            LineState::Exclusive => "E",
            LineState::SharedModified => "Sm",
        };
        f.write_str(s)
    }
}

// the transactions that appear on the bus as defined by the protocols
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BusTransactionKind {
    ProcessorReadMiss,      // Dragon read miss
    ProcessorWriteMiss,     // Dragon write miss
    BusRead,
    BusReadExclusive,
    BusUpdate,
    BusFlush,
}

impl BusTransactionKind {
    /// transactions that move a whole block to the requester
    pub fn is_fill(&self) -> bool {
        matches!(
            self,
            BusTransactionKind::BusRead
                | BusTransactionKind::BusReadExclusive
                | BusTransactionKind::ProcessorReadMiss
                | BusTransactionKind::ProcessorWriteMiss
        )
    }
}

pub type CoreId = usize;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BusRequest {
    /// assigned by the bus on enqueue, unique per run
    pub id: u64,
    pub kind: BusTransactionKind,
    pub core: CoreId,
    pub addr: Addr,
}

impl BusRequest {
    pub fn new(kind: BusTransactionKind, core: CoreId, addr: Addr) -> Self {
        BusRequest { id: 0, kind, core, addr }
    }
}

impl fmt::Display for BusRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {:?}({}) from core {}", self.id, self.kind, self.addr, self.core)
    }
}
