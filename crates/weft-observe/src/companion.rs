#![forbid(unsafe_code)]

//! Companion table for the wrap-around ownership model.
//!
//! When the engine must not touch target containers, owner identity lives
//! here instead: a side table keyed by cell address, one companion slot per
//! live target. Slots hold the target weakly so the table never extends a
//! container's lifetime, and dead slots are swept opportunistically as new
//! companions are created. A reused address never inherits the identity of
//! the freed cell that occupied it.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::debug;

use crate::key::OwnerId;
use crate::value::{DateCell, MapCell, RecordCell, SeqCell, SetCell};

/// Companion inserts between opportunistic dead-slot sweeps.
const SWEEP_INTERVAL: u32 = 64;

/// Weak handle to a container cell of any kind.
pub(crate) enum CellRef {
    Record(Weak<RecordCell>),
    Seq(Weak<SeqCell>),
    Map(Weak<MapCell>),
    Set(Weak<SetCell>),
    Date(Weak<DateCell>),
}

impl CellRef {
    fn is_alive(&self) -> bool {
        match self {
            Self::Record(w) => w.strong_count() > 0,
            Self::Seq(w) => w.strong_count() > 0,
            Self::Map(w) => w.strong_count() > 0,
            Self::Set(w) => w.strong_count() > 0,
            Self::Date(w) => w.strong_count() > 0,
        }
    }
}

/// Cells that can carry owner identity, in either ownership model.
pub(crate) trait ContainerCell {
    /// In-place instrumentation slot.
    fn mark(&self) -> &Cell<Option<OwnerId>>;

    /// Weak handle for the companion table.
    fn weak(cell: &Rc<Self>) -> CellRef
    where
        Self: Sized;
}

impl ContainerCell for RecordCell {
    fn mark(&self) -> &Cell<Option<OwnerId>> {
        &self.mark
    }

    fn weak(cell: &Rc<Self>) -> CellRef {
        CellRef::Record(Rc::downgrade(cell))
    }
}

impl ContainerCell for SeqCell {
    fn mark(&self) -> &Cell<Option<OwnerId>> {
        &self.mark
    }

    fn weak(cell: &Rc<Self>) -> CellRef {
        CellRef::Seq(Rc::downgrade(cell))
    }
}

impl ContainerCell for MapCell {
    fn mark(&self) -> &Cell<Option<OwnerId>> {
        &self.mark
    }

    fn weak(cell: &Rc<Self>) -> CellRef {
        CellRef::Map(Rc::downgrade(cell))
    }
}

impl ContainerCell for SetCell {
    fn mark(&self) -> &Cell<Option<OwnerId>> {
        &self.mark
    }

    fn weak(cell: &Rc<Self>) -> CellRef {
        CellRef::Set(Rc::downgrade(cell))
    }
}

impl ContainerCell for DateCell {
    fn mark(&self) -> &Cell<Option<OwnerId>> {
        &self.mark
    }

    fn weak(cell: &Rc<Self>) -> CellRef {
        CellRef::Date(Rc::downgrade(cell))
    }
}

/// One companion slot: stable identity for a wrap-around target.
struct Companion {
    owner: OwnerId,
    target: CellRef,
}

/// Address-keyed table of companion slots.
pub(crate) struct CompanionTable {
    slots: RefCell<AHashMap<usize, Companion>>,
    /// Inserts since the last sweep.
    churn: Cell<u32>,
}

impl CompanionTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: RefCell::new(AHashMap::new()),
            churn: Cell::new(0),
        }
    }

    /// Stable owner identity for the cell at `addr`.
    ///
    /// Returns the existing companion while its target is alive. A dead slot
    /// at a reused address is replaced via `alloc`, so a new container never
    /// inherits the identity of a freed one.
    pub(crate) fn resolve(
        &self,
        addr: usize,
        target: CellRef,
        alloc: impl FnOnce() -> OwnerId,
    ) -> OwnerId {
        let owner = {
            let mut slots = self.slots.borrow_mut();
            if let Some(slot) = slots.get(&addr) {
                if slot.target.is_alive() {
                    return slot.owner;
                }
            }
            let owner = alloc();
            slots.insert(addr, Companion { owner, target });
            owner
        };
        debug!(addr, owner = owner.raw(), "companion slot created");

        self.churn.set(self.churn.get() + 1);
        if self.churn.get() >= SWEEP_INTERVAL {
            self.churn.set(0);
            let removed = self.sweep();
            if removed > 0 {
                debug!(removed, "swept dead companion slots");
            }
        }
        owner
    }

    /// Drop every slot whose target has been freed. Returns slots removed.
    pub(crate) fn sweep(&self) -> usize {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|_, slot| slot.target.is_alive());
        before - slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.borrow().len()
    }
}
