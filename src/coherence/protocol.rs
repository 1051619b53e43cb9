// Transition tables of the three coherence protocols.
//
// Each protocol is a stateless table behind `CoherenceProtocol`; a cache picks
// one at construction and never branches on the protocol itself.

use std::fmt::Debug;

use thiserror::Error;

use super::common::{BusTransactionKind, LineState};
use crate::commons::Protocol;

use BusTransactionKind::*;
use LineState::*;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{protocol}: no transition for a line in state {state:?} observing {kind:?}")]
    NoForeignTransition {
        protocol: &'static str,
        state: LineState,
        kind: BusTransactionKind,
    },
    #[error("{protocol}: cannot resolve own {kind:?} request")]
    NoSelfTransition {
        protocol: &'static str,
        kind: BusTransactionKind,
    },
    #[error("{protocol}: write hit on a line in state {state:?}")]
    NoWriteHitTransition {
        protocol: &'static str,
        state: LineState,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Access {
    Load,
    Store,
}

/// What a store hit does to the line.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WriteHit {
    /// change state locally, no bus traffic
    Silent(LineState),
    /// the store must go over the bus first
    Bus(BusTransactionKind),
}

/// What the requester learned from the bus while its request was serviced.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct PeerResponse {
    /// some peer held a valid copy of the block
    pub had_copy: bool,
    /// some peer acknowledged a `BusUpdate`
    pub update_acked: bool,
}

/// Outcome of the requester's own transaction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Resolution {
    pub state: LineState,
    /// Dragon: broadcast the written word once the block has arrived
    pub deferred_update: bool,
}

impl Resolution {
    fn to(state: LineState) -> Self {
        Resolution { state, deferred_update: false }
    }
}

/// What a cache does about a transaction of another core on a line it holds.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SnoopAction {
    pub state: LineState,
    /// this cache can answer the request (no memory trip needed)
    pub supply: bool,
    /// write the dirty block back
    pub flush: bool,
    pub invalidate: bool,
    /// this cache took a word update (and acknowledges it)
    pub update: bool,
}

impl SnoopAction {
    fn stay(state: LineState) -> Self {
        SnoopAction { state, supply: false, flush: false, invalidate: false, update: false }
    }
    fn to(state: LineState) -> Self {
        Self::stay(state)
    }
    fn supply(mut self) -> Self {
        self.supply = true;
        self
    }
    fn flush(mut self) -> Self {
        self.flush = true;
        self.supply = true;
        self
    }
    fn invalidate(mut self) -> Self {
        self.invalidate = true;
        self
    }
    fn update(mut self) -> Self {
        self.update = true;
        self
    }
}

pub trait CoherenceProtocol: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// states a resident line may be in under this protocol
    fn states(&self) -> &'static [LineState];

    /// a resident line in `state` can serve an access
    fn is_valid(&self, state: LineState) -> bool {
        state != Invalid
    }

    /// the transaction issued when the block is not present
    fn on_local_miss(&self, access: Access) -> BusTransactionKind;

    fn on_local_hit_for_write(&self, state: LineState) -> Result<WriteHit, ProtocolError>;

    /// new state of the requester's line once its own request completed
    fn on_self_resolved(
        &self,
        kind: BusTransactionKind,
        peers: PeerResponse,
    ) -> Result<Resolution, ProtocolError>;

    /// reaction of a resident line to another core's transaction
    fn on_foreign_transaction(
        &self,
        state: LineState,
        kind: BusTransactionKind,
    ) -> Result<SnoopAction, ProtocolError>;
}

impl Protocol {
    pub fn table(&self) -> &'static dyn CoherenceProtocol {
        match self {
            Protocol::MSI => &Msi,
            Protocol::MESI => &Mesi,
            Protocol::Dragon => &Dragon,
        }
    }
}

// MSI

#[derive(Debug, Clone, Copy)]
pub struct Msi;

impl CoherenceProtocol for Msi {
    fn name(&self) -> &'static str {
        "MSI"
    }
    fn states(&self) -> &'static [LineState] {
        &[Modified, SharedClean, Invalid]
    }
    fn on_local_miss(&self, access: Access) -> BusTransactionKind {
        match access {
            Access::Load => BusRead,
            Access::Store => BusReadExclusive,
        }
    }
    fn on_local_hit_for_write(&self, state: LineState) -> Result<WriteHit, ProtocolError> {
        match state {
            Modified => Ok(WriteHit::Silent(Modified)),
            SharedClean => Ok(WriteHit::Bus(BusReadExclusive)),
            state => Err(ProtocolError::NoWriteHitTransition { protocol: self.name(), state }),
        }
    }
    fn on_self_resolved(
        &self,
        kind: BusTransactionKind,
        _peers: PeerResponse,
    ) -> Result<Resolution, ProtocolError> {
        match kind {
            BusRead => Ok(Resolution::to(SharedClean)),
            BusReadExclusive => Ok(Resolution::to(Modified)),
            kind => Err(ProtocolError::NoSelfTransition { protocol: self.name(), kind }),
        }
    }
    fn on_foreign_transaction(
        &self,
        state: LineState,
        kind: BusTransactionKind,
    ) -> Result<SnoopAction, ProtocolError> {
        match (state, kind) {
            (Modified, BusRead) => Ok(SnoopAction::to(SharedClean).flush()),
            (Modified, BusReadExclusive) => Ok(SnoopAction::to(Invalid).flush().invalidate()),
            (SharedClean, BusRead) => Ok(SnoopAction::stay(SharedClean)),
            (SharedClean, BusReadExclusive) => Ok(SnoopAction::to(Invalid).invalidate()),
            (Invalid, BusRead | BusReadExclusive) => Ok(SnoopAction::stay(Invalid)),
            (state, kind) => Err(ProtocolError::NoForeignTransition { protocol: self.name(), state, kind }),
        }
    }
}

// MESI

#[derive(Debug, Clone, Copy)]
pub struct Mesi;

impl CoherenceProtocol for Mesi {
    fn name(&self) -> &'static str {
        "MESI"
    }
    fn states(&self) -> &'static [LineState] {
        &[Modified, Exclusive, SharedClean, Invalid]
    }
    fn on_local_miss(&self, access: Access) -> BusTransactionKind {
        Msi.on_local_miss(access)
    }
    fn on_local_hit_for_write(&self, state: LineState) -> Result<WriteHit, ProtocolError> {
        match state {
            Exclusive => Ok(WriteHit::Silent(Modified)),
            state => Msi.on_local_hit_for_write(state).map_err(|_| {
                ProtocolError::NoWriteHitTransition { protocol: self.name(), state }
            }),
        }
    }
    fn on_self_resolved(
        &self,
        kind: BusTransactionKind,
        peers: PeerResponse,
    ) -> Result<Resolution, ProtocolError> {
        match kind {
            BusRead if !peers.had_copy => Ok(Resolution::to(Exclusive)),
            BusRead => Ok(Resolution::to(SharedClean)),
            BusReadExclusive => Ok(Resolution::to(Modified)),
            kind => Err(ProtocolError::NoSelfTransition { protocol: self.name(), kind }),
        }
    }
    fn on_foreign_transaction(
        &self,
        state: LineState,
        kind: BusTransactionKind,
    ) -> Result<SnoopAction, ProtocolError> {
        match (state, kind) {
            (Exclusive, BusRead) => Ok(SnoopAction::to(SharedClean).supply()),
            (Exclusive, BusReadExclusive) => Ok(SnoopAction::to(Invalid).supply().invalidate()),
            (state, kind) => Msi.on_foreign_transaction(state, kind).map_err(|_| {
                ProtocolError::NoForeignTransition { protocol: self.name(), state, kind }
            }),
        }
    }
}

// Dragon (write-update, no invalid state for resident lines)

#[derive(Debug, Clone, Copy)]
pub struct Dragon;

impl CoherenceProtocol for Dragon {
    fn name(&self) -> &'static str {
        "Dragon"
    }
    fn states(&self) -> &'static [LineState] {
        &[Modified, Exclusive, SharedClean, SharedModified]
    }
    // every resident Dragon line is valid; a stray Invalid is caught by the tables
    fn is_valid(&self, _state: LineState) -> bool {
        true
    }
    fn on_local_miss(&self, access: Access) -> BusTransactionKind {
        match access {
            Access::Load => ProcessorReadMiss,
            Access::Store => ProcessorWriteMiss,
        }
    }
    fn on_local_hit_for_write(&self, state: LineState) -> Result<WriteHit, ProtocolError> {
        match state {
            Modified | Exclusive => Ok(WriteHit::Silent(Modified)),
            SharedClean | SharedModified => Ok(WriteHit::Bus(BusUpdate)),
            state => Err(ProtocolError::NoWriteHitTransition { protocol: self.name(), state }),
        }
    }
    fn on_self_resolved(
        &self,
        kind: BusTransactionKind,
        peers: PeerResponse,
    ) -> Result<Resolution, ProtocolError> {
        match kind {
            ProcessorReadMiss if !peers.had_copy => Ok(Resolution::to(Exclusive)),
            ProcessorReadMiss => Ok(Resolution::to(SharedClean)),
            ProcessorWriteMiss if !peers.had_copy => Ok(Resolution::to(Modified)),
            ProcessorWriteMiss => Ok(Resolution { state: SharedModified, deferred_update: true }),
            BusUpdate if !peers.update_acked => Ok(Resolution::to(Modified)),
            BusUpdate => Ok(Resolution::to(SharedModified)),
            kind => Err(ProtocolError::NoSelfTransition { protocol: self.name(), kind }),
        }
    }
    fn on_foreign_transaction(
        &self,
        state: LineState,
        kind: BusTransactionKind,
    ) -> Result<SnoopAction, ProtocolError> {
        match (state, kind) {
            (Modified, BusRead | ProcessorReadMiss | ProcessorWriteMiss) => {
                Ok(SnoopAction::to(SharedModified).flush())
            }
            (Modified | SharedModified, BusUpdate) | (SharedModified, ProcessorWriteMiss) => {
                Ok(SnoopAction::to(SharedClean).update().supply())
            }
            (SharedModified, BusRead | ProcessorReadMiss) => Ok(SnoopAction::stay(SharedModified).flush()),
            (SharedClean, BusUpdate | ProcessorReadMiss) => {
                Ok(SnoopAction::stay(SharedClean).update().supply())
            }
            // the written word follows as a deferred update
            (SharedClean, ProcessorWriteMiss) => Ok(SnoopAction::stay(SharedClean).supply()),
            (Exclusive, BusRead | ProcessorReadMiss | ProcessorWriteMiss) => {
                Ok(SnoopAction::to(SharedClean).supply())
            }
            (Exclusive, BusUpdate) => Ok(SnoopAction::to(SharedClean).update().supply()),
            (state, kind) => Err(ProtocolError::NoForeignTransition { protocol: self.name(), state, kind }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNOOPED: [BusTransactionKind; 5] =
        [ProcessorReadMiss, ProcessorWriteMiss, BusRead, BusReadExclusive, BusUpdate];
    const NO_PEERS: PeerResponse = PeerResponse { had_copy: false, update_acked: false };
    const PEERS: PeerResponse = PeerResponse { had_copy: true, update_acked: true };

    fn tables() -> [&'static dyn CoherenceProtocol; 3] {
        [Protocol::MSI.table(), Protocol::MESI.table(), Protocol::Dragon.table()]
    }

    #[test]
    fn transitions_stay_within_protocol_states() {
        for p in tables() {
            for &state in p.states() {
                for kind in SNOOPED {
                    if let Ok(action) = p.on_foreign_transaction(state, kind) {
                        assert!(
                            p.states().contains(&action.state),
                            "{}: {state:?} + {kind:?} -> {:?}",
                            p.name(),
                            action.state
                        );
                    }
                }
                if let Ok(WriteHit::Silent(next)) = p.on_local_hit_for_write(state) {
                    assert!(p.states().contains(&next));
                }
            }
            for kind in SNOOPED {
                for peers in [NO_PEERS, PEERS] {
                    if let Ok(r) = p.on_self_resolved(kind, peers) {
                        assert!(p.states().contains(&r.state), "{}: own {kind:?} -> {:?}", p.name(), r.state);
                    }
                }
            }
        }
    }

    #[test]
    fn dragon_answers_every_resident_line() {
        let p = Protocol::Dragon.table();
        for &state in p.states() {
            for kind in [ProcessorReadMiss, ProcessorWriteMiss, BusUpdate] {
                let action = p.on_foreign_transaction(state, kind).unwrap();
                assert!(action.supply, "{state:?} + {kind:?}");
                assert_ne!(action.state, Invalid);
                assert!(!action.invalidate);
            }
        }
        assert!(p.on_foreign_transaction(Invalid, BusUpdate).is_err());
    }

    #[test]
    fn states_outside_protocol_are_rejected() {
        assert!(Msi.on_foreign_transaction(Exclusive, BusRead).is_err());
        assert!(Msi.on_foreign_transaction(SharedModified, BusRead).is_err());
        assert!(Mesi.on_foreign_transaction(SharedModified, BusReadExclusive).is_err());
        assert!(Msi.on_foreign_transaction(Modified, BusUpdate).is_err());
        assert!(Mesi.on_foreign_transaction(SharedClean, ProcessorReadMiss).is_err());
        assert!(Msi.on_self_resolved(BusUpdate, PEERS).is_err());
        assert!(Dragon.on_self_resolved(BusRead, PEERS).is_err());
        assert!(Msi.on_local_hit_for_write(Exclusive).is_err());
        assert!(Dragon.on_local_hit_for_write(Invalid).is_err());
    }

    #[test]
    fn msi_table() {
        let a = Msi.on_foreign_transaction(Modified, BusRead).unwrap();
        assert_eq!((a.state, a.flush, a.invalidate), (SharedClean, true, false));
        let a = Msi.on_foreign_transaction(Modified, BusReadExclusive).unwrap();
        assert_eq!((a.state, a.flush, a.invalidate), (Invalid, true, true));
        let a = Msi.on_foreign_transaction(SharedClean, BusReadExclusive).unwrap();
        assert_eq!((a.state, a.supply, a.invalidate), (Invalid, false, true));
        let a = Msi.on_foreign_transaction(Invalid, BusReadExclusive).unwrap();
        assert_eq!(a, SnoopAction::stay(Invalid));

        assert_eq!(Msi.on_self_resolved(BusRead, NO_PEERS).unwrap().state, SharedClean);
        assert_eq!(Msi.on_self_resolved(BusReadExclusive, PEERS).unwrap().state, Modified);
        assert_eq!(Msi.on_local_hit_for_write(SharedClean), Ok(WriteHit::Bus(BusReadExclusive)));
    }

    #[test]
    fn mesi_table() {
        assert_eq!(Mesi.on_self_resolved(BusRead, NO_PEERS).unwrap().state, Exclusive);
        assert_eq!(Mesi.on_self_resolved(BusRead, PEERS).unwrap().state, SharedClean);
        assert_eq!(Mesi.on_local_hit_for_write(Exclusive), Ok(WriteHit::Silent(Modified)));

        let a = Mesi.on_foreign_transaction(Exclusive, BusRead).unwrap();
        assert_eq!((a.state, a.supply, a.flush), (SharedClean, true, false));
        let a = Mesi.on_foreign_transaction(Exclusive, BusReadExclusive).unwrap();
        assert_eq!((a.state, a.supply, a.invalidate), (Invalid, true, true));
        let a = Mesi.on_foreign_transaction(Modified, BusRead).unwrap();
        assert_eq!((a.state, a.flush), (SharedClean, true));
    }

    #[test]
    fn dragon_table() {
        let r = Dragon.on_self_resolved(ProcessorWriteMiss, PEERS).unwrap();
        assert_eq!(r, Resolution { state: SharedModified, deferred_update: true });
        let r = Dragon.on_self_resolved(ProcessorWriteMiss, NO_PEERS).unwrap();
        assert_eq!(r, Resolution { state: Modified, deferred_update: false });
        assert_eq!(Dragon.on_self_resolved(ProcessorReadMiss, NO_PEERS).unwrap().state, Exclusive);
        assert_eq!(Dragon.on_self_resolved(ProcessorReadMiss, PEERS).unwrap().state, SharedClean);
        assert_eq!(Dragon.on_self_resolved(BusUpdate, PEERS).unwrap().state, SharedModified);
        assert_eq!(Dragon.on_self_resolved(BusUpdate, NO_PEERS).unwrap().state, Modified);

        let a = Dragon.on_foreign_transaction(Modified, ProcessorWriteMiss).unwrap();
        assert_eq!((a.state, a.flush, a.update), (SharedModified, true, false));
        let a = Dragon.on_foreign_transaction(SharedModified, BusUpdate).unwrap();
        assert_eq!((a.state, a.update), (SharedClean, true));
        let a = Dragon.on_foreign_transaction(SharedModified, ProcessorReadMiss).unwrap();
        assert_eq!((a.state, a.flush, a.update), (SharedModified, true, false));
        let a = Dragon.on_foreign_transaction(Exclusive, ProcessorReadMiss).unwrap();
        assert_eq!((a.state, a.supply), (SharedClean, true));

        assert_eq!(Dragon.on_local_hit_for_write(Exclusive), Ok(WriteHit::Silent(Modified)));
        assert_eq!(Dragon.on_local_hit_for_write(SharedModified), Ok(WriteHit::Bus(BusUpdate)));
    }

    #[test]
    fn write_hit_on_every_valid_state() {
        for p in tables() {
            for &state in p.states().iter().filter(|&&s| p.is_valid(s)) {
                assert!(p.on_local_hit_for_write(state).is_ok(), "{}: {state:?}", p.name());
            }
        }
    }
}
