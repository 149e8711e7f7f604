#![forbid(unsafe_code)]

//! The dependency registry: edges from `(owner, key)` to observers.
//!
//! # Architecture
//!
//! The registry is a nested map `owner → key → {observer}` plus an explicit
//! stack of active observers. Interceptor reads call [`DepRegistry::add_ref`],
//! which records an edge to the innermost active observer, if any. Writes
//! call [`DepRegistry::fire_change`], which synchronously invokes every
//! observer registered for exactly that `(owner, key)` pair.
//!
//! # Invariants
//!
//! 1. `add_ref` with no active observer is a no-op.
//! 2. `fire_change` iterates a snapshot: observers registered or edges added
//!    while a notification pass runs do not receive that pass.
//! 3. An observer unregistered mid-pass is skipped, never invoked stale.
//! 4. No registry borrow is held while an observer callback runs, so
//!    callbacks may freely read, write, register, and unregister.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::key::{ObserverId, OwnerId, PropKey};

/// Observer callback. Receives the owner and key that changed.
pub type ChangeFn = dyn Fn(OwnerId, &PropKey);

pub(crate) struct DepRegistry {
    edges: RefCell<AHashMap<OwnerId, AHashMap<PropKey, AHashSet<ObserverId>>>>,
    observers: RefCell<AHashMap<ObserverId, Rc<ChangeFn>>>,
    active: RefCell<Vec<ObserverId>>,
    /// Depth of `untracked` scopes; nonzero suppresses edge collection.
    quiet: Cell<u32>,
    next_observer: Cell<u64>,
}

impl DepRegistry {
    pub(crate) fn new() -> Self {
        Self {
            edges: RefCell::new(AHashMap::new()),
            observers: RefCell::new(AHashMap::new()),
            active: RefCell::new(Vec::new()),
            quiet: Cell::new(0),
            next_observer: Cell::new(1),
        }
    }

    // ─── Observers ──────────────────────────────────────────────────────

    pub(crate) fn register(&self, callback: Rc<ChangeFn>) -> ObserverId {
        let id = ObserverId::new(self.next_observer.get());
        self.next_observer.set(id.raw() + 1);
        self.observers.borrow_mut().insert(id, callback);
        debug!(observer = id.raw(), "observer registered");
        id
    }

    /// Remove an observer and scrub every edge pointing at it.
    pub(crate) fn unregister(&self, id: ObserverId) {
        if self.observers.borrow_mut().remove(&id).is_none() {
            return;
        }
        let mut edges = self.edges.borrow_mut();
        edges.retain(|_, keys| {
            keys.retain(|_, observers| {
                observers.remove(&id);
                !observers.is_empty()
            });
            !keys.is_empty()
        });
        debug!(observer = id.raw(), "observer unregistered");
    }

    pub(crate) fn is_registered(&self, id: ObserverId) -> bool {
        self.observers.borrow().contains_key(&id)
    }

    // ─── Active-observer stack ──────────────────────────────────────────

    pub(crate) fn push_active(&self, id: ObserverId) {
        self.active.borrow_mut().push(id);
    }

    pub(crate) fn pop_active(&self) {
        self.active.borrow_mut().pop();
    }

    /// Innermost active observer, unless inside an `untracked` scope.
    pub(crate) fn current(&self) -> Option<ObserverId> {
        if self.quiet.get() > 0 {
            return None;
        }
        self.active.borrow().last().copied()
    }

    pub(crate) fn enter_quiet(&self) {
        self.quiet.set(self.quiet.get() + 1);
    }

    pub(crate) fn exit_quiet(&self) {
        self.quiet.set(self.quiet.get().saturating_sub(1));
    }

    // ─── Edges ──────────────────────────────────────────────────────────

    /// Record a dependency edge from `(owner, key)` to the active observer.
    pub(crate) fn add_ref(&self, owner: OwnerId, key: PropKey) {
        let Some(active) = self.current() else {
            return;
        };
        trace!(owner = owner.raw(), key = %key, observer = active.raw(), "add_ref");
        self.edges
            .borrow_mut()
            .entry(owner)
            .or_default()
            .entry(key)
            .or_default()
            .insert(active);
    }

    /// Notify every observer registered for exactly `(owner, key)`.
    ///
    /// The observer set is snapshotted before any callback runs. Callbacks
    /// may re-enter the registry; an observer unregistered by an earlier
    /// callback in the same pass is skipped.
    pub(crate) fn fire_change(&self, owner: OwnerId, key: &PropKey) {
        let snapshot: SmallVec<[ObserverId; 8]> = {
            let edges = self.edges.borrow();
            let Some(observers) = edges.get(&owner).and_then(|keys| keys.get(key)) else {
                return;
            };
            observers.iter().copied().collect()
        };
        trace!(owner = owner.raw(), key = %key, fanout = snapshot.len(), "fire_change");
        for id in snapshot {
            let callback = self.observers.borrow().get(&id).cloned();
            if let Some(callback) = callback {
                (*callback)(owner, key);
            }
        }
    }

    // ─── Introspection ──────────────────────────────────────────────────

    /// Sorted observer ids registered on one `(owner, key)` pair.
    pub(crate) fn observers_of(&self, owner: OwnerId, key: &PropKey) -> Vec<ObserverId> {
        let edges = self.edges.borrow();
        let mut ids: Vec<ObserverId> = edges
            .get(&owner)
            .and_then(|keys| keys.get(key))
            .map(|observers| observers.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn observer_count(&self, owner: OwnerId, key: &PropKey) -> usize {
        self.edges
            .borrow()
            .get(&owner)
            .and_then(|keys| keys.get(key))
            .map_or(0, |observers| observers.len())
    }

    /// Total number of `(owner, key)` pairs with at least one observer.
    pub(crate) fn edge_count(&self) -> usize {
        self.edges.borrow().values().map(|keys| keys.len()).sum()
    }

    pub(crate) fn observer_total(&self) -> usize {
        self.observers.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spy(registry: &DepRegistry) -> (ObserverId, Rc<RefCell<Vec<(OwnerId, PropKey)>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let id = registry.register(Rc::new(move |owner, key: &PropKey| {
            sink.borrow_mut().push((owner, key.clone()));
        }));
        (id, log)
    }

    #[test]
    fn add_ref_without_active_observer_is_noop() {
        let registry = DepRegistry::new();
        registry.add_ref(OwnerId::new(1), PropKey::field("a"));
        assert_eq!(registry.edge_count(), 0);
    }

    #[test]
    fn add_ref_targets_innermost_active() {
        let registry = DepRegistry::new();
        let (outer, _) = spy(&registry);
        let (inner, _) = spy(&registry);
        let owner = OwnerId::new(1);

        registry.push_active(outer);
        registry.push_active(inner);
        registry.add_ref(owner, PropKey::field("a"));
        registry.pop_active();
        registry.add_ref(owner, PropKey::field("b"));
        registry.pop_active();

        assert_eq!(registry.observers_of(owner, &PropKey::field("a")), vec![inner]);
        assert_eq!(registry.observers_of(owner, &PropKey::field("b")), vec![outer]);
    }

    #[test]
    fn fire_change_hits_exact_key_only() {
        let registry = DepRegistry::new();
        let (id, log) = spy(&registry);
        let owner = OwnerId::new(1);

        registry.push_active(id);
        registry.add_ref(owner, PropKey::field("a"));
        registry.pop_active();

        registry.fire_change(owner, &PropKey::field("b"));
        registry.fire_change(OwnerId::new(2), &PropKey::field("a"));
        assert!(log.borrow().is_empty());

        registry.fire_change(owner, &PropKey::field("a"));
        assert_eq!(*log.borrow(), vec![(owner, PropKey::field("a"))]);
    }

    #[test]
    fn duplicate_edges_collapse() {
        let registry = DepRegistry::new();
        let (id, log) = spy(&registry);
        let owner = OwnerId::new(1);

        registry.push_active(id);
        registry.add_ref(owner, PropKey::field("a"));
        registry.add_ref(owner, PropKey::field("a"));
        registry.pop_active();

        registry.fire_change(owner, &PropKey::field("a"));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn quiet_scope_suppresses_collection() {
        let registry = DepRegistry::new();
        let (id, _) = spy(&registry);
        let owner = OwnerId::new(1);

        registry.push_active(id);
        registry.enter_quiet();
        assert_eq!(registry.current(), None);
        registry.add_ref(owner, PropKey::field("a"));
        registry.exit_quiet();
        assert_eq!(registry.current(), Some(id));
        registry.pop_active();

        assert_eq!(registry.edge_count(), 0);
    }

    #[test]
    fn unregister_scrubs_edges() {
        let registry = DepRegistry::new();
        let (id, log) = spy(&registry);
        let owner = OwnerId::new(1);

        registry.push_active(id);
        registry.add_ref(owner, PropKey::field("a"));
        registry.add_ref(owner, PropKey::Length);
        registry.pop_active();
        assert_eq!(registry.edge_count(), 2);

        registry.unregister(id);
        assert_eq!(registry.edge_count(), 0);
        assert!(!registry.is_registered(id));

        registry.fire_change(owner, &PropKey::field("a"));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn edges_added_during_pass_miss_that_pass() {
        let registry = Rc::new(DepRegistry::new());
        let owner = OwnerId::new(1);
        let key = PropKey::field("a");

        let late_log = Rc::new(RefCell::new(Vec::new()));
        let late_sink = Rc::clone(&late_log);
        let late = registry.register(Rc::new(move |owner, key: &PropKey| {
            late_sink.borrow_mut().push((owner, key.clone()));
        }));

        // The driver's callback wires `late` onto the same key mid-pass.
        let reg = Rc::clone(&registry);
        let driver_key = key.clone();
        let driver = registry.register(Rc::new(move |_, _| {
            reg.push_active(late);
            reg.add_ref(owner, driver_key.clone());
            reg.pop_active();
        }));

        registry.push_active(driver);
        registry.add_ref(owner, key.clone());
        registry.pop_active();

        registry.fire_change(owner, &key);
        assert!(late_log.borrow().is_empty(), "late observer ran in the same pass");

        registry.fire_change(owner, &key);
        assert_eq!(late_log.borrow().len(), 1);
    }

    #[test]
    fn self_unregister_during_pass_is_safe() {
        let registry = Rc::new(DepRegistry::new());
        let owner = OwnerId::new(1);
        let key = PropKey::field("a");

        let hits = Rc::new(Cell::new(0));
        let seen = Rc::clone(&hits);
        let reg = Rc::clone(&registry);
        let id = Rc::new(Cell::new(ObserverId::new(0)));
        let id_slot = Rc::clone(&id);
        let observer = registry.register(Rc::new(move |_, _| {
            seen.set(seen.get() + 1);
            reg.unregister(id_slot.get());
        }));
        id.set(observer);

        registry.push_active(observer);
        registry.add_ref(owner, key.clone());
        registry.pop_active();

        registry.fire_change(owner, &key);
        registry.fire_change(owner, &key);
        assert_eq!(hits.get(), 1);
        assert_eq!(registry.edge_count(), 0);
    }

    #[test]
    fn reentrant_fire_from_callback() {
        let registry = Rc::new(DepRegistry::new());
        let upstream = OwnerId::new(1);
        let downstream = OwnerId::new(2);

        let (tail, tail_log) = spy(&registry);
        registry.push_active(tail);
        registry.add_ref(downstream, PropKey::Length);
        registry.pop_active();

        let reg = Rc::clone(&registry);
        let head = registry.register(Rc::new(move |_, _| {
            reg.fire_change(downstream, &PropKey::Length);
        }));
        registry.push_active(head);
        registry.add_ref(upstream, PropKey::field("x"));
        registry.pop_active();

        registry.fire_change(upstream, &PropKey::field("x"));
        assert_eq!(*tail_log.borrow(), vec![(downstream, PropKey::Length)]);
    }
}
