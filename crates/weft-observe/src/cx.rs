#![forbid(unsafe_code)]

//! Engine context: the registry, the companion table, and the ownership
//! model behind one cheaply cloneable handle.
//!
//! # Architecture
//!
//! Everything stateful hangs off one `Rc<CxInner>`. Wrappers hold a clone of
//! the handle, so wrappers created from the same context always agree on
//! owner identity and notify through the same registry. There is no global
//! state: two contexts are fully isolated engines.
//!
//! # Invariants
//!
//! 1. `wrap` is idempotent per context: wrapping the same container twice
//!    yields wrappers that compare equal and share one owner identity.
//! 2. Owner identity never migrates between live containers.
//! 3. The active-observer stack is strictly LIFO; guards restore it even on
//!    unwind.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::companion::{CompanionTable, ContainerCell};
use crate::dispatch::{self, Observed};
use crate::key::{ObserverId, OwnerId, PropKey};
use crate::registry::DepRegistry;
use crate::value::Raw;

/// How containers acquire owner identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    /// Stamp the identity into the container cell itself. One slot per
    /// container, no side table on the read/write path.
    #[default]
    InPlace,
    /// Leave containers untouched; identity lives in a companion table
    /// keyed by cell address. For targets the engine must not modify.
    WrapAround,
}

struct CxInner {
    registry: DepRegistry,
    companions: CompanionTable,
    model: Ownership,
    next_owner: Cell<u64>,
}

/// Handle to one observation engine.
#[derive(Clone)]
pub struct ObserveCx {
    inner: Rc<CxInner>,
}

impl ObserveCx {
    /// Fresh engine with the given ownership model.
    #[must_use]
    pub fn new(model: Ownership) -> Self {
        Self {
            inner: Rc::new(CxInner {
                registry: DepRegistry::new(),
                companions: CompanionTable::new(),
                model,
                next_owner: Cell::new(1),
            }),
        }
    }

    #[must_use]
    pub fn model(&self) -> Ownership {
        self.inner.model
    }

    /// Allocate a fresh owner identity. Facade layers that stamp their own
    /// containers draw from the same sequence the engine uses internally.
    pub fn alloc_owner(&self) -> OwnerId {
        let id = OwnerId::new(self.inner.next_owner.get());
        self.inner.next_owner.set(id.raw() + 1);
        id
    }

    // ─── Observers ──────────────────────────────────────────────────────

    /// Register a change callback. The id stays valid until unregistered.
    pub fn register_observer(&self, callback: impl Fn(OwnerId, &PropKey) + 'static) -> ObserverId {
        self.inner.registry.register(Rc::new(callback))
    }

    /// Remove an observer and scrub every edge pointing at it.
    pub fn unregister_observer(&self, id: ObserverId) {
        self.inner.registry.unregister(id);
    }

    #[must_use]
    pub fn is_registered(&self, id: ObserverId) -> bool {
        self.inner.registry.is_registered(id)
    }

    /// Mark `id` active for dependency collection until the guard drops.
    ///
    /// Guards nest; reads see the innermost one. They must drop in LIFO
    /// order, which scoped use guarantees.
    pub fn enter(&self, id: ObserverId) -> ActiveGuard {
        self.inner.registry.push_active(id);
        ActiveGuard { cx: self.clone() }
    }

    /// Run `body` with `id` active, restoring the previous state after.
    pub fn tracked<R>(&self, id: ObserverId, body: impl FnOnce() -> R) -> R {
        let _guard = self.enter(id);
        body()
    }

    /// Run `body` with dependency collection suppressed, even inside a
    /// tracked scope.
    pub fn untracked<R>(&self, body: impl FnOnce() -> R) -> R {
        let _guard = QuietGuard::new(self);
        body()
    }

    /// Innermost active observer, or `None` outside tracked scopes.
    #[must_use]
    pub fn current_observer(&self) -> Option<ObserverId> {
        self.inner.registry.current()
    }

    // ─── Dependency primitives ──────────────────────────────────────────

    /// Record a dependency from `(owner, key)` to the active observer.
    /// No-op when no observer is active.
    pub fn add_ref(&self, owner: OwnerId, key: PropKey) {
        self.inner.registry.add_ref(owner, key);
    }

    /// Synchronously notify observers of `(owner, key)`.
    pub fn fire_change(&self, owner: OwnerId, key: &PropKey) {
        self.inner.registry.fire_change(owner, key);
    }

    // ─── Wrap and unwrap ────────────────────────────────────────────────

    /// Wrap a raw value for tracked use. Containers come back as interceptor
    /// wrappers sharing this context; primitives and functions pass through.
    #[must_use]
    pub fn wrap(&self, raw: &Raw) -> Observed {
        dispatch::resolve(self, raw.clone())
    }

    /// Raw value behind a wrapped one. Inverse of [`ObserveCx::wrap`].
    #[must_use]
    pub fn unwrap(&self, wrapped: &Observed) -> Raw {
        wrapped.to_raw()
    }

    /// Owner identity of a container under this context's ownership model,
    /// allocating on first sight. `None` for primitives and functions.
    #[must_use]
    pub fn owner_of(&self, raw: &Raw) -> Option<OwnerId> {
        match raw {
            Raw::Record(cell) => Some(self.owner_of_cell(cell)),
            Raw::Seq(cell) => Some(self.owner_of_cell(cell)),
            Raw::Map(cell) => Some(self.owner_of_cell(cell)),
            Raw::Set(cell) => Some(self.owner_of_cell(cell)),
            Raw::Date(cell) => Some(self.owner_of_cell(cell)),
            _ => None,
        }
    }

    pub(crate) fn owner_of_cell<C: ContainerCell>(&self, cell: &Rc<C>) -> OwnerId {
        match self.inner.model {
            Ownership::InPlace => {
                if let Some(owner) = cell.mark().get() {
                    return owner;
                }
                let owner = self.alloc_owner();
                cell.mark().set(Some(owner));
                owner
            }
            Ownership::WrapAround => {
                let addr = Rc::as_ptr(cell) as usize;
                self.inner
                    .companions
                    .resolve(addr, C::weak(cell), || self.alloc_owner())
            }
        }
    }

    // ─── Introspection ──────────────────────────────────────────────────

    /// Number of `(owner, key)` pairs currently observed.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.registry.edge_count()
    }

    /// Observers currently registered on one `(owner, key)` pair.
    #[must_use]
    pub fn observer_count(&self, owner: OwnerId, key: &PropKey) -> usize {
        self.inner.registry.observer_count(owner, key)
    }

    /// Sorted observer ids on one `(owner, key)` pair.
    #[must_use]
    pub fn observers_of(&self, owner: OwnerId, key: &PropKey) -> Vec<ObserverId> {
        self.inner.registry.observers_of(owner, key)
    }

    /// Registered observer callbacks.
    #[must_use]
    pub fn observer_total(&self) -> usize {
        self.inner.registry.observer_total()
    }

    /// Companion slots currently in the table (wrap-around model).
    #[must_use]
    pub fn companion_count(&self) -> usize {
        self.inner.companions.len()
    }

    /// Drop companion slots whose targets were freed. Returns slots removed.
    pub fn sweep_companions(&self) -> usize {
        self.inner.companions.sweep()
    }

    /// True when both handles drive the same engine.
    #[must_use]
    pub fn same_engine(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for ObserveCx {
    fn default() -> Self {
        Self::new(Ownership::default())
    }
}

impl fmt::Debug for ObserveCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserveCx")
            .field("model", &self.inner.model)
            .field("observers", &self.inner.registry.observer_total())
            .field("edges", &self.inner.registry.edge_count())
            .finish()
    }
}

/// Keeps an observer active for dependency collection. Pops on drop.
#[must_use = "collection stops when the guard drops"]
pub struct ActiveGuard {
    cx: ObserveCx,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.cx.inner.registry.pop_active();
    }
}

struct QuietGuard {
    cx: ObserveCx,
}

impl QuietGuard {
    fn new(cx: &ObserveCx) -> Self {
        cx.inner.registry.enter_quiet();
        Self { cx: cx.clone() }
    }
}

impl Drop for QuietGuard {
    fn drop(&mut self) {
        self.cx.inner.registry.exit_quiet();
    }
}
